//! EVF2 `case_data` and `device_information` sections
//!
//! Both carry the same textual key/value shape, UTF-16LE with a BOM,
//! zlib-compressed and 16-byte aligned on disk. `case_data` holds the chunk
//! geometry (`sb`, `tb`), `device_information` the sector size (`bp`).

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::common::binary::read_bytes;
use crate::common::codec::{align_to_16, compress_zlib, Decompressor};
use crate::common::text::{utf8_to_utf16le, MetadataTable};
use crate::error::{EwfError, Result};

use super::types::{SectionDescriptor, SectionType, DESCRIPTOR_SIZE};

/// Keys recognized in `case_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseDataKey {
    Name,
    CaseNumber,
    EvidenceNumber,
    ExaminerName,
    Notes,
    ApplicationVersion,
    OperatingSystem,
    TargetTime,
    ActualTime,
    ChunkCount,
    CompressionMethod,
    SectorsPerChunk,
    ErrorGranularity,
    WriteBlockerType,
}

impl CaseDataKey {
    pub const ALL: [CaseDataKey; 14] = [
        CaseDataKey::Name,
        CaseDataKey::CaseNumber,
        CaseDataKey::EvidenceNumber,
        CaseDataKey::ExaminerName,
        CaseDataKey::Notes,
        CaseDataKey::ApplicationVersion,
        CaseDataKey::OperatingSystem,
        CaseDataKey::TargetTime,
        CaseDataKey::ActualTime,
        CaseDataKey::ChunkCount,
        CaseDataKey::CompressionMethod,
        CaseDataKey::SectorsPerChunk,
        CaseDataKey::ErrorGranularity,
        CaseDataKey::WriteBlockerType,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            CaseDataKey::Name => "nm",
            CaseDataKey::CaseNumber => "cn",
            CaseDataKey::EvidenceNumber => "en",
            CaseDataKey::ExaminerName => "ex",
            CaseDataKey::Notes => "nt",
            CaseDataKey::ApplicationVersion => "av",
            CaseDataKey::OperatingSystem => "os",
            CaseDataKey::TargetTime => "tt",
            CaseDataKey::ActualTime => "at",
            CaseDataKey::ChunkCount => "tb",
            CaseDataKey::CompressionMethod => "cp",
            CaseDataKey::SectorsPerChunk => "sb",
            CaseDataKey::ErrorGranularity => "gr",
            CaseDataKey::WriteBlockerType => "wb",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CaseDataKey::Name => "Name",
            CaseDataKey::CaseNumber => "Case Number",
            CaseDataKey::EvidenceNumber => "Evidence Number",
            CaseDataKey::ExaminerName => "Examiner Name",
            CaseDataKey::Notes => "Notes",
            CaseDataKey::ApplicationVersion => "Application Version",
            CaseDataKey::OperatingSystem => "Operating System",
            CaseDataKey::TargetTime => "Target Time",
            CaseDataKey::ActualTime => "Actual Time",
            CaseDataKey::ChunkCount => "Number of Chunks",
            CaseDataKey::CompressionMethod => "Compression Method",
            CaseDataKey::SectorsPerChunk => "Number of Sectors Per Chunk",
            CaseDataKey::ErrorGranularity => "Error Granularity",
            CaseDataKey::WriteBlockerType => "Write-Blocker Type",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }
}

/// Keys recognized in `device_information`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInfoKey {
    SerialNumber,
    DriveModel,
    DriveLabel,
    NumberOfSectors,
    HpaSectors,
    DcoSectors,
    DriveType,
    ProcessId,
    PalmSectors,
    SmartLogs,
    BytesPerSector,
    IsPhysical,
}

impl DeviceInfoKey {
    pub const ALL: [DeviceInfoKey; 12] = [
        DeviceInfoKey::SerialNumber,
        DeviceInfoKey::DriveModel,
        DeviceInfoKey::DriveLabel,
        DeviceInfoKey::NumberOfSectors,
        DeviceInfoKey::HpaSectors,
        DeviceInfoKey::DcoSectors,
        DeviceInfoKey::DriveType,
        DeviceInfoKey::ProcessId,
        DeviceInfoKey::PalmSectors,
        DeviceInfoKey::SmartLogs,
        DeviceInfoKey::BytesPerSector,
        DeviceInfoKey::IsPhysical,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DeviceInfoKey::SerialNumber => "sn",
            DeviceInfoKey::DriveModel => "md",
            DeviceInfoKey::DriveLabel => "lb",
            DeviceInfoKey::NumberOfSectors => "ts",
            DeviceInfoKey::HpaSectors => "hs",
            DeviceInfoKey::DcoSectors => "dc",
            DeviceInfoKey::DriveType => "dt",
            DeviceInfoKey::ProcessId => "pid",
            DeviceInfoKey::PalmSectors => "rs",
            DeviceInfoKey::SmartLogs => "ls",
            DeviceInfoKey::BytesPerSector => "bp",
            DeviceInfoKey::IsPhysical => "ph",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceInfoKey::SerialNumber => "Serial Number",
            DeviceInfoKey::DriveModel => "Drive Model",
            DeviceInfoKey::DriveLabel => "Drive Label",
            DeviceInfoKey::NumberOfSectors => "Number of Sectors",
            DeviceInfoKey::HpaSectors => "Number of HPA Protected Sectors",
            DeviceInfoKey::DcoSectors => "Number of DCO Protected Sectors",
            DeviceInfoKey::DriveType => "Drive Type",
            DeviceInfoKey::ProcessId => "Process Identifier",
            DeviceInfoKey::PalmSectors => "Number of Sectors PALM RAM Device",
            DeviceInfoKey::SmartLogs => "SMART or ATA Logs",
            DeviceInfoKey::BytesPerSector => "Bytes Per Sector",
            DeviceInfoKey::IsPhysical => "Is Physical",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }
}

// =============================================================================
// Shared text-section codec
// =============================================================================

fn decode_text_section<R: Read + Seek>(
    fh: &mut R,
    section: &SectionDescriptor,
    decompressor: Decompressor,
    known_key: impl Fn(&str) -> bool,
) -> Result<MetadataTable> {
    fh.seek(SeekFrom::Start(section.data_offset))?;
    let raw = read_bytes(fh, section.data_size as usize)?;
    let data = decompressor(&raw)?;
    MetadataTable::parse(&data, known_key)
}

/// Write text payload (UTF-16LE + BOM, zlib, 16-byte aligned) followed by
/// its descriptor. Returns (payload bytes written, descriptor bytes written).
fn encode_text_section<W: Write>(
    w: &mut W,
    table: &MetadataTable,
    section_type: SectionType,
    previous: u64,
) -> Result<(usize, usize)> {
    let text = utf8_to_utf16le(&table.to_text(true));
    let mut compressed = compress_zlib(&text)?;
    let data_size = compressed.len() as u64;
    let padding = align_to_16(&mut compressed) as u32;

    w.write_all(&compressed)?;

    let (desc, _) = SectionDescriptor::encode(section_type, 0, previous, data_size, padding);
    w.write_all(&desc)?;

    Ok((compressed.len(), DESCRIPTOR_SIZE as usize))
}

fn display_map(table: &MetadataTable, name_of: impl Fn(&str) -> Option<&'static str>) -> HashMap<String, String> {
    table
        .iter()
        .map(|(k, v)| {
            let name = name_of(k).map(str::to_string).unwrap_or_else(|| k.to_string());
            (name, v.to_string())
        })
        .collect()
}

// =============================================================================
// case_data
// =============================================================================

#[derive(Debug, Clone)]
pub struct CaseDataSection {
    pub table: MetadataTable,
}

impl CaseDataSection {
    pub fn new() -> Self {
        Self {
            table: MetadataTable::new("main"),
        }
    }

    pub fn set(&mut self, key: CaseDataKey, value: &str) {
        self.table.set(key.code(), value);
    }

    pub fn decode<R: Read + Seek>(
        fh: &mut R,
        section: &SectionDescriptor,
        decompressor: Decompressor,
    ) -> Result<Self> {
        let table = decode_text_section(fh, section, decompressor, |k| {
            CaseDataKey::from_code(k).is_some()
        })?;
        Ok(Self { table })
    }

    pub fn encode<W: Write>(&self, w: &mut W, previous: u64) -> Result<(usize, usize)> {
        encode_text_section(w, &self.table, SectionType::CaseData, previous)
    }

    /// `sb`: sectors per chunk
    pub fn sectors_per_chunk(&self) -> Result<u32> {
        parse_geometry(self.table.get(CaseDataKey::SectorsPerChunk.code()), "sb")
    }

    /// `tb`: total chunk count of the image
    pub fn chunk_count(&self) -> Result<u64> {
        parse_geometry(self.table.get(CaseDataKey::ChunkCount.code()), "tb")
    }

    pub fn display_map(&self) -> HashMap<String, String> {
        display_map(&self.table, |k| {
            CaseDataKey::from_code(k).map(|key| key.display_name())
        })
    }
}

impl Default for CaseDataSection {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// device_information
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeviceInformationSection {
    pub table: MetadataTable,
}

impl DeviceInformationSection {
    pub fn new() -> Self {
        Self {
            table: MetadataTable::new("main"),
        }
    }

    pub fn set(&mut self, key: DeviceInfoKey, value: &str) {
        self.table.set(key.code(), value);
    }

    pub fn decode<R: Read + Seek>(
        fh: &mut R,
        section: &SectionDescriptor,
        decompressor: Decompressor,
    ) -> Result<Self> {
        let table = decode_text_section(fh, section, decompressor, |k| {
            DeviceInfoKey::from_code(k).is_some()
        })?;
        Ok(Self { table })
    }

    pub fn encode<W: Write>(&self, w: &mut W, previous: u64) -> Result<(usize, usize)> {
        encode_text_section(w, &self.table, SectionType::DeviceInformation, previous)
    }

    /// `bp`: bytes per sector
    pub fn bytes_per_sector(&self) -> Result<u32> {
        parse_geometry(self.table.get(DeviceInfoKey::BytesPerSector.code()), "bp")
    }

    pub fn display_map(&self) -> HashMap<String, String> {
        display_map(&self.table, |k| {
            DeviceInfoKey::from_code(k).map(|key| key.display_name())
        })
    }
}

impl Default for DeviceInformationSection {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_geometry<T: std::str::FromStr>(value: Option<&str>, key: &str) -> Result<T> {
    let text = value.ok_or_else(|| {
        EwfError::InvariantViolation(format!("metadata has no `{}` value", key))
    })?;
    text.trim().parse().map_err(|_| {
        EwfError::InvariantViolation(format!("metadata `{}` is not numeric: {}", key, text))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::codec::decompress_zlib;
    use std::io::Cursor;

    #[test]
    fn test_case_data_round_trip() {
        let mut section = CaseDataSection::new();
        section.set(CaseDataKey::CaseNumber, "TEST-002");
        section.set(CaseDataKey::SectorsPerChunk, "64");
        section.set(CaseDataKey::ChunkCount, "12");

        let mut out = Vec::new();
        let (data_n, desc_n) = section.encode(&mut out, 0x30).unwrap();
        assert_eq!(data_n % 16, 0);
        assert_eq!(out.len(), data_n + desc_n);

        let mut cur = Cursor::new(out);
        cur.set_position(data_n as u64);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.section_type, SectionType::CaseData);
        assert_eq!(desc.previous, 0x30);
        assert_eq!(desc.data_offset, 0);

        let decoded = CaseDataSection::decode(&mut cur, &desc, decompress_zlib).unwrap();
        assert_eq!(decoded.table.get("cn"), Some("TEST-002"));
        assert_eq!(decoded.sectors_per_chunk().unwrap(), 64);
        assert_eq!(decoded.chunk_count().unwrap(), 12);
    }

    #[test]
    fn test_device_information_round_trip() {
        let mut section = DeviceInformationSection::new();
        section.set(DeviceInfoKey::BytesPerSector, "512");
        section.set(DeviceInfoKey::DriveModel, "Virtual Test Drive");

        let mut out = Vec::new();
        let (data_n, _) = section.encode(&mut out, 0).unwrap();

        let mut cur = Cursor::new(out);
        cur.set_position(data_n as u64);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        let decoded =
            DeviceInformationSection::decode(&mut cur, &desc, decompress_zlib).unwrap();
        assert_eq!(decoded.bytes_per_sector().unwrap(), 512);
        assert_eq!(
            decoded.display_map().get("Drive Model").map(String::as_str),
            Some("Virtual Test Drive")
        );
    }

    #[test]
    fn test_unknown_key_is_fatal() {
        // Hand-build a payload with a key outside the catalog
        let text = utf8_to_utf16le("1\nmain\ncn\tzz\nX\tY\n\n");
        let mut compressed = compress_zlib(&text).unwrap();
        let data_size = compressed.len() as u64;
        let padding = align_to_16(&mut compressed) as u32;

        let mut file = compressed.clone();
        let (desc, _) =
            SectionDescriptor::encode(SectionType::CaseData, 0, 0, data_size, padding);
        file.extend_from_slice(&desc);

        let mut cur = Cursor::new(file);
        cur.set_position(compressed.len() as u64);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        match CaseDataSection::decode(&mut cur, &desc, decompress_zlib) {
            Err(EwfError::UnknownMediaKey(k)) => assert_eq!(k, "zz"),
            other => panic!("expected UnknownMediaKey, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_geometry_is_invariant_violation() {
        let section = CaseDataSection::new();
        assert!(matches!(
            section.sectors_per_chunk(),
            Err(EwfError::InvariantViolation(_))
        ));
    }
}
