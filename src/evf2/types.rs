//! Core constants and the section descriptor of the EVF2 dialect
//!
//! EVF2 sections are typed by numeric tag and linked backwards: each
//! descriptor points at the previous one, and the payload sits immediately
//! before its descriptor.

use std::fmt;
use std::io::{Read, Seek};

use crate::common::binary::{read_bytes, validated_body, ByteBuf, ByteReader};
use crate::error::{EwfError, Result};

/// Signature of a physical-media segment file (`.Ex01`)
pub const EVF2_SIGNATURE: &[u8; 8] = b"EVF2\x0d\x0a\x81\x00";
/// Signature of a logical-evidence segment file (`.Lx01`)
pub const LVF2_SIGNATURE: &[u8; 8] = b"LVF2\x0d\x0a\x81\x00";

/// On-disk size of the section descriptor record
pub const DESCRIPTOR_SIZE: u64 = 64;

/// Chunk data flag bits carried in table entries and descriptors
pub mod data_flags {
    /// The chunk data is zlib/bzip2-compressed
    pub const IS_COMPRESSED: u32 = 0x0000_0001;
    /// The chunk data carries a trailing Adler-32
    pub const HAS_CHECKSUM: u32 = 0x0000_0002;
    /// The stored payload is an 8-byte fill pattern
    pub const USES_PATTERN_FILL: u32 = 0x0000_0004;
}

/// Compression methods selectable in the segment header
pub mod compression_method {
    pub const NONE: u16 = 0;
    pub const ZLIB: u16 = 1;
    pub const BZIP2: u16 = 2;
}

/// Numeric section tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionType {
    DeviceInformation = 1,
    CaseData = 2,
    SectorData = 3,
    SectorTable = 4,
    ErrorTable = 5,
    SessionTable = 6,
    IncrementData = 7,
    Md5Hash = 8,
    Sha1Hash = 9,
    RestartData = 10,
    EncryptionKeys = 11,
    MemoryExtentsTable = 12,
    Next = 13,
    FinalInformation = 14,
    Done = 15,
    AnalyticalData = 16,
}

impl SectionType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            1 => SectionType::DeviceInformation,
            2 => SectionType::CaseData,
            3 => SectionType::SectorData,
            4 => SectionType::SectorTable,
            5 => SectionType::ErrorTable,
            6 => SectionType::SessionTable,
            7 => SectionType::IncrementData,
            8 => SectionType::Md5Hash,
            9 => SectionType::Sha1Hash,
            10 => SectionType::RestartData,
            11 => SectionType::EncryptionKeys,
            12 => SectionType::MemoryExtentsTable,
            13 => SectionType::Next,
            14 => SectionType::FinalInformation,
            15 => SectionType::Done,
            16 => SectionType::AnalyticalData,
            _ => return None,
        })
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionType::DeviceInformation => "device_information",
            SectionType::CaseData => "case_data",
            SectionType::SectorData => "sector_data",
            SectionType::SectorTable => "sector_table",
            SectionType::ErrorTable => "error_table",
            SectionType::SessionTable => "session_table",
            SectionType::IncrementData => "increment_data",
            SectionType::Md5Hash => "md5_hash",
            SectionType::Sha1Hash => "sha1_hash",
            SectionType::RestartData => "restart_data",
            SectionType::EncryptionKeys => "encryption_keys",
            SectionType::MemoryExtentsTable => "memory_extents_table",
            SectionType::Next => "next",
            SectionType::FinalInformation => "final_information",
            SectionType::Done => "done",
            SectionType::AnalyticalData => "analytical_data",
        };
        f.write_str(name)
    }
}

/// Decoded form of the 64-byte section descriptor
///
/// `data_size` excludes the trailing alignment zeros counted by
/// `padding_size`, so the payload starts at
/// `offset - data_size - padding_size`.
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub section_type: SectionType,
    pub data_flags: u32,
    pub previous: u64,
    pub data_size: u64,
    pub padding_size: u32,
    pub checksum: u32,
    /// Offset of this descriptor in the segment file
    pub offset: u64,
    /// Offset of the section payload
    pub data_offset: u64,
}

impl SectionDescriptor {
    /// Read and validate a descriptor at the stream's current position
    pub fn decode<R: Read + Seek>(fh: &mut R) -> Result<Self> {
        let offset = fh.stream_position()?;
        let raw = read_bytes(fh, DESCRIPTOR_SIZE as usize)?;
        let body = validated_body(&raw, "section descriptor")?;

        let mut rd = ByteReader::new(body);
        let tag = rd.u32()?;
        let data_flags = rd.u32()?;
        let previous = rd.u64()?;
        let data_size = rd.u64()?;
        let _descriptor_size = rd.u32()?;
        let padding_size = rd.u32()?;

        let section_type = SectionType::from_tag(tag)
            .ok_or_else(|| EwfError::UnknownSection(format!("tag {}", tag)))?;
        let checksum = u32::from_le_bytes([raw[60], raw[61], raw[62], raw[63]]);

        Ok(Self {
            section_type,
            data_flags,
            previous,
            data_size,
            padding_size,
            checksum,
            offset,
            data_offset: offset.saturating_sub(data_size + u64::from(padding_size)),
        })
    }

    /// Build the on-disk bytes of a descriptor, checksum included
    pub fn encode(
        section_type: SectionType,
        data_flags: u32,
        previous: u64,
        data_size: u64,
        padding_size: u32,
    ) -> (Vec<u8>, u32) {
        let mut buf = ByteBuf::with_capacity(DESCRIPTOR_SIZE as usize);
        buf.u32(section_type as u32)
            .u32(data_flags)
            .u64(previous)
            .u64(data_size)
            .u32(DESCRIPTOR_SIZE as u32)
            .u32(padding_size)
            .zeros(16) // md5 of the section, unused by this writer
            .zeros(12);
        buf.finish_with_sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_descriptor_round_trip() {
        let (bytes, _) =
            SectionDescriptor::encode(SectionType::SectorTable, 0, 0x100, 0x40, 12);
        assert_eq!(bytes.len(), DESCRIPTOR_SIZE as usize);

        // Payload precedes the descriptor: place it at offset 0x200
        let mut file = vec![0u8; 0x200];
        file.extend_from_slice(&bytes);
        let mut cur = Cursor::new(file);
        cur.set_position(0x200);

        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.section_type, SectionType::SectorTable);
        assert_eq!(desc.previous, 0x100);
        assert_eq!(desc.data_size, 0x40);
        assert_eq!(desc.padding_size, 12);
        assert_eq!(desc.data_offset, 0x200 - 0x40 - 12);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = crate::common::binary::ByteBuf::new();
        buf.u32(99).u32(0).u64(0).u64(0).u32(64).u32(0).zeros(28);
        let (bytes, _) = buf.finish_with_sum();

        let mut cur = Cursor::new(bytes);
        assert!(matches!(
            SectionDescriptor::decode(&mut cur),
            Err(EwfError::UnknownSection(_))
        ));
    }

    #[test]
    fn test_section_type_names() {
        assert_eq!(SectionType::CaseData.to_string(), "case_data");
        assert_eq!(SectionType::Done.to_string(), "done");
        assert_eq!(SectionType::from_tag(15), Some(SectionType::Done));
        assert_eq!(SectionType::from_tag(0), None);
    }
}
