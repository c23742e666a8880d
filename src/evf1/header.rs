//! EVF1 `header`/`header2` metadata section
//!
//! A zlib-compressed key/value text table describing the acquisition. The
//! section (descriptor plus payload) is emitted twice back-to-back, as
//! imaging tools expect.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::common::binary::read_bytes;
use crate::common::codec::{compress_zlib, decompress_zlib};
use crate::common::text::MetadataTable;
use crate::error::Result;

use super::types::{SectionDescriptor, DESCRIPTOR_SIZE, SECTION_HEADER};

/// Keys recognized in EVF1 header sections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaInfoKey {
    Description,
    CaseNumber,
    ExaminerName,
    EvidenceNumber,
    Notes,
    AcquirySoftwareVersion,
    AcquiryOperatingSystem,
    AcquiryDate,
    SystemDate,
    Password,
    ProcessIdentifier,
    UnknownDc,
    Extents,
    CompressionType,
    Model,
    SerialNumber,
    DeviceLabel,
}

impl MediaInfoKey {
    pub const ALL: [MediaInfoKey; 17] = [
        MediaInfoKey::Description,
        MediaInfoKey::CaseNumber,
        MediaInfoKey::ExaminerName,
        MediaInfoKey::EvidenceNumber,
        MediaInfoKey::Notes,
        MediaInfoKey::AcquirySoftwareVersion,
        MediaInfoKey::AcquiryOperatingSystem,
        MediaInfoKey::AcquiryDate,
        MediaInfoKey::SystemDate,
        MediaInfoKey::Password,
        MediaInfoKey::ProcessIdentifier,
        MediaInfoKey::UnknownDc,
        MediaInfoKey::Extents,
        MediaInfoKey::CompressionType,
        MediaInfoKey::Model,
        MediaInfoKey::SerialNumber,
        MediaInfoKey::DeviceLabel,
    ];

    /// Short identifier stored on disk
    pub fn code(&self) -> &'static str {
        match self {
            MediaInfoKey::Description => "a",
            MediaInfoKey::CaseNumber => "c",
            MediaInfoKey::ExaminerName => "e",
            MediaInfoKey::EvidenceNumber => "n",
            MediaInfoKey::Notes => "t",
            MediaInfoKey::AcquirySoftwareVersion => "av",
            MediaInfoKey::AcquiryOperatingSystem => "ov",
            MediaInfoKey::AcquiryDate => "m",
            MediaInfoKey::SystemDate => "u",
            MediaInfoKey::Password => "p",
            MediaInfoKey::ProcessIdentifier => "pid",
            MediaInfoKey::UnknownDc => "dc",
            MediaInfoKey::Extents => "ext",
            MediaInfoKey::CompressionType => "r",
            MediaInfoKey::Model => "md",
            MediaInfoKey::SerialNumber => "sn",
            MediaInfoKey::DeviceLabel => "l",
        }
    }

    /// Human-readable name surfaced through `metadata()`
    pub fn display_name(&self) -> &'static str {
        match self {
            MediaInfoKey::Description => "Description",
            MediaInfoKey::CaseNumber => "Case Number",
            MediaInfoKey::ExaminerName => "Examiner Name",
            MediaInfoKey::EvidenceNumber => "Evidence Number",
            MediaInfoKey::Notes => "Notes",
            MediaInfoKey::AcquirySoftwareVersion => "Version",
            MediaInfoKey::AcquiryOperatingSystem => "Platform",
            MediaInfoKey::AcquiryDate => "Acquired Date",
            MediaInfoKey::SystemDate => "System Date",
            MediaInfoKey::Password => "Password Hash",
            MediaInfoKey::ProcessIdentifier => "Process Identifiers",
            MediaInfoKey::UnknownDc => "Unknown",
            MediaInfoKey::Extents => "Extents",
            MediaInfoKey::CompressionType => "Compression level",
            MediaInfoKey::Model => "Media model",
            MediaInfoKey::SerialNumber => "Serial number",
            MediaInfoKey::DeviceLabel => "Device label",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }
}

/// Parsed header section contents
#[derive(Debug, Clone)]
pub struct HeaderSection {
    pub table: MetadataTable,
}

impl HeaderSection {
    pub fn new() -> Self {
        Self {
            table: MetadataTable::new("main"),
        }
    }

    pub fn set(&mut self, key: MediaInfoKey, value: &str) {
        self.table.set(key.code(), value);
    }

    /// Media info with short codes mapped to display names
    pub fn display_map(&self) -> HashMap<String, String> {
        self.table
            .iter()
            .map(|(k, v)| {
                let name = MediaInfoKey::from_code(k)
                    .map(|key| key.display_name().to_string())
                    .unwrap_or_else(|| k.to_string());
                (name, v.to_string())
            })
            .collect()
    }

    pub fn decode<R: Read + Seek>(fh: &mut R, section: &SectionDescriptor) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;
        let raw = read_bytes(fh, section.payload_size() as usize)?;
        let data = decompress_zlib(&raw)?;

        let table = MetadataTable::parse(&data, |k| MediaInfoKey::from_code(k).is_some())?;
        Ok(Self { table })
    }

    /// Write the section twice: descriptor + compressed payload, then again
    /// with the `next` link advanced past the repeat.
    pub fn encode<W: Write + Seek>(&self, w: &mut W) -> Result<()> {
        let compressed = compress_zlib(self.table.to_text(false).as_bytes())?;
        let size = compressed.len() as u64 + DESCRIPTOR_SIZE;

        let position = w.stream_position()?;
        let (desc, _) = SectionDescriptor::encode(SECTION_HEADER, position + size, size);
        w.write_all(&desc)?;
        w.write_all(&compressed)?;

        let (desc, _) = SectionDescriptor::encode(SECTION_HEADER, position + 2 * size, size);
        w.write_all(&desc)?;
        w.write_all(&compressed)?;

        Ok(())
    }
}

impl Default for HeaderSection {
    fn default() -> Self {
        Self::new()
    }
}
