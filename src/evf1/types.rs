//! Core constants and the section descriptor of the legacy EVF1 dialect

use std::io::{Read, Seek};

use crate::common::binary::{read_bytes, string_to_array, validated_body, ByteBuf, ByteReader};
use crate::error::Result;

/// Signature of a physical-media segment file (`.E01`)
pub const EVF_SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";
/// Signature of a logical-evidence segment file (`.L01`)
pub const LVF_SIGNATURE: &[u8; 8] = b"LVF\x09\x0d\x0a\xff\x00";

/// Every EVF1 section opens with this fixed-size descriptor
pub const DESCRIPTOR_SIZE: u64 = 76;

pub const SECTION_HEADER: &str = "header";
pub const SECTION_HEADER2: &str = "header2";
pub const SECTION_VOLUME: &str = "volume";
pub const SECTION_DISK: &str = "disk";
pub const SECTION_TABLE: &str = "table";
pub const SECTION_TABLE2: &str = "table2";
pub const SECTION_DATA: &str = "data";
pub const SECTION_SECTORS: &str = "sectors";
pub const SECTION_ERROR2: &str = "error2";
pub const SECTION_NEXT: &str = "next";
pub const SECTION_SESSION: &str = "session";
pub const SECTION_HASH: &str = "hash";
pub const SECTION_DIGEST: &str = "digest";
pub const SECTION_DONE: &str = "done";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaType {
    Removable = 0x00,
    Fixed = 0x01,
    Optical = 0x03,
    Logical = 0x0e,
    Ram = 0x10,
}

/// Media flag bits stored in the volume/data sections
pub mod media_flags {
    pub const IMAGE: u8 = 0x01;
    pub const PHYSICAL: u8 = 0x02;
    pub const FASTBLOC: u8 = 0x04;
    pub const TABLEAU: u8 = 0x08;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionLevel {
    None = 0x00,
    Good = 0x01,
    Best = 0x02,
}

/// Decoded form of the 76-byte section descriptor
///
/// `size` covers the descriptor itself plus the payload; `next` is the
/// absolute offset of the following descriptor within the segment file.
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub type_name: String,
    pub next: u64,
    pub size: u64,
    pub checksum: u32,
    /// Offset of this descriptor in the segment file
    pub offset: u64,
    /// Offset of the section payload (descriptor end)
    pub data_offset: u64,
}

impl SectionDescriptor {
    /// Read and validate a descriptor at the stream's current position
    pub fn decode<R: Read + Seek>(fh: &mut R) -> Result<Self> {
        let offset = fh.stream_position()?;
        let raw = read_bytes(fh, DESCRIPTOR_SIZE as usize)?;
        let body = validated_body(&raw, "section descriptor")?;

        let mut rd = ByteReader::new(body);
        let type_bytes: [u8; 16] = rd.array()?;
        let next = rd.u64()?;
        let size = rd.u64()?;

        let checksum = u32::from_le_bytes([raw[72], raw[73], raw[74], raw[75]]);
        let type_name = crate::common::binary::bytes_to_string(&type_bytes);

        Ok(Self {
            type_name,
            next,
            size,
            checksum,
            offset,
            data_offset: offset + DESCRIPTOR_SIZE,
        })
    }

    /// Build the on-disk bytes of a descriptor, checksum included
    pub fn encode(type_name: &str, next: u64, size: u64) -> (Vec<u8>, u32) {
        let mut buf = ByteBuf::with_capacity(DESCRIPTOR_SIZE as usize);
        buf.bytes(&string_to_array::<16>(type_name))
            .u64(next)
            .u64(size)
            .zeros(40);
        buf.finish_with_sum()
    }

    /// Payload size implied by `size`
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(DESCRIPTOR_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_descriptor_round_trip() {
        let (bytes, _) = SectionDescriptor::encode(SECTION_VOLUME, 0x500, 0x41C + 76);
        assert_eq!(bytes.len(), DESCRIPTOR_SIZE as usize);

        let mut cur = Cursor::new(bytes);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.type_name, "volume");
        assert_eq!(desc.next, 0x500);
        assert_eq!(desc.payload_size(), 0x41C);
        assert_eq!(desc.data_offset, 76);
    }

    #[test]
    fn test_descriptor_rejects_bad_checksum() {
        let (mut bytes, _) = SectionDescriptor::encode(SECTION_DONE, 0, 76);
        bytes[20] ^= 0x01;
        let mut cur = Cursor::new(bytes);
        assert!(SectionDescriptor::decode(&mut cur).is_err());
    }
}
