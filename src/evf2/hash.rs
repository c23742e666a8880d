//! EVF2 `md5_hash` and `sha1_hash` sections
//!
//! Each payload is the digest plus its Adler-32, followed by alignment
//! zeros declared in the descriptor's `padding_size` so the payload offset
//! formula holds on readback.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::common::binary::{read_bytes, validated_body, write_with_sum, ByteReader};
use crate::error::Result;

use super::types::{data_flags, SectionDescriptor, SectionType, DESCRIPTOR_SIZE};

const MD5_PAYLOAD_SIZE: usize = 20;
const MD5_PADDING: u32 = 12;
const SHA1_PAYLOAD_SIZE: usize = 24;
const SHA1_PADDING: u32 = 8;

#[derive(Debug, Clone, Default)]
pub struct Md5Section {
    pub hash: [u8; 16],
    pub checksum: u32,
}

impl Md5Section {
    pub fn decode<R: Read + Seek>(fh: &mut R, section: &SectionDescriptor) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;
        let raw = read_bytes(fh, MD5_PAYLOAD_SIZE)?;
        let body = validated_body(&raw, "md5_hash section")?;

        let mut rd = ByteReader::new(body);
        Ok(Self {
            hash: rd.array::<16>()?,
            checksum: u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]),
        })
    }

    /// Write payload + alignment + descriptor; returns (payload+pad, descriptor) sizes
    pub fn encode<W: Write>(&mut self, w: &mut W, previous: u64) -> Result<(usize, usize)> {
        let (_, sum) = write_with_sum(w, &self.hash)?;
        self.checksum = sum;
        w.write_all(&[0u8; MD5_PADDING as usize])?;

        let (desc, _) = SectionDescriptor::encode(
            SectionType::Md5Hash,
            data_flags::HAS_CHECKSUM,
            previous,
            MD5_PAYLOAD_SIZE as u64,
            MD5_PADDING,
        );
        w.write_all(&desc)?;

        Ok((
            MD5_PAYLOAD_SIZE + MD5_PADDING as usize,
            DESCRIPTOR_SIZE as usize,
        ))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.hash)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sha1Section {
    pub hash: [u8; 20],
    pub checksum: u32,
}

impl Sha1Section {
    pub fn decode<R: Read + Seek>(fh: &mut R, section: &SectionDescriptor) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;
        let raw = read_bytes(fh, SHA1_PAYLOAD_SIZE)?;
        let body = validated_body(&raw, "sha1_hash section")?;

        let mut rd = ByteReader::new(body);
        Ok(Self {
            hash: rd.array::<20>()?,
            checksum: u32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]),
        })
    }

    /// Write payload + alignment + descriptor; returns (payload+pad, descriptor) sizes
    pub fn encode<W: Write>(&mut self, w: &mut W, previous: u64) -> Result<(usize, usize)> {
        let (_, sum) = write_with_sum(w, &self.hash)?;
        self.checksum = sum;
        w.write_all(&[0u8; SHA1_PADDING as usize])?;

        let (desc, _) = SectionDescriptor::encode(
            SectionType::Sha1Hash,
            data_flags::HAS_CHECKSUM,
            previous,
            SHA1_PAYLOAD_SIZE as u64,
            SHA1_PADDING,
        );
        w.write_all(&desc)?;

        Ok((
            SHA1_PAYLOAD_SIZE + SHA1_PADDING as usize,
            DESCRIPTOR_SIZE as usize,
        ))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_md5_round_trip() {
        let mut section = Md5Section {
            hash: [0x5A; 16],
            checksum: 0,
        };

        let mut out = Vec::new();
        let (data_n, desc_n) = section.encode(&mut out, 0x80).unwrap();
        assert_eq!(out.len(), data_n + desc_n);
        assert_eq!(data_n % 16, 0);

        let mut cur = Cursor::new(out);
        cur.set_position(data_n as u64);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.section_type, SectionType::Md5Hash);
        assert_eq!(desc.data_offset, 0);

        let decoded = Md5Section::decode(&mut cur, &desc).unwrap();
        assert_eq!(decoded.hash, [0x5A; 16]);
        assert_eq!(decoded.hex(), "5a".repeat(16));
    }

    #[test]
    fn test_sha1_round_trip() {
        let mut section = Sha1Section {
            hash: [0xC3; 20],
            checksum: 0,
        };

        let mut out = Vec::new();
        let (data_n, _) = section.encode(&mut out, 0).unwrap();

        let mut cur = Cursor::new(out);
        cur.set_position(data_n as u64);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        let decoded = Sha1Section::decode(&mut cur, &desc).unwrap();
        assert_eq!(decoded.hash, [0xC3; 20]);
    }
}
