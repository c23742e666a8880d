//! EVF1 terminal hash sections
//!
//! `digest` stores MD5 + SHA-1; `hash` stores MD5 only. The `hash` payload
//! has two historical shapes (20 or 36 bytes); the writer emits the 36-byte
//! shape and the decoder accepts both.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::common::binary::{read_bytes, validated_body, write_with_sum, ByteBuf, ByteReader};
use crate::error::Result;

use super::types::{SectionDescriptor, DESCRIPTOR_SIZE, SECTION_DIGEST, SECTION_HASH};

const DIGEST_PAYLOAD_SIZE: u64 = 80;
const HASH_PAYLOAD_SIZE: u64 = 36;
const HASH_PAYLOAD_SIZE_SHORT: u64 = 20;

/// `digest` section: MD5 + SHA-1 + 40 bytes of padding
#[derive(Debug, Clone, Default)]
pub struct DigestSection {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub checksum: u32,
}

impl DigestSection {
    pub fn decode<R: Read + Seek>(fh: &mut R, section: &SectionDescriptor) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;
        let raw = read_bytes(fh, DIGEST_PAYLOAD_SIZE as usize)?;
        let body = validated_body(&raw, "digest section")?;

        let mut rd = ByteReader::new(body);
        let md5 = rd.array::<16>()?;
        let sha1 = rd.array::<20>()?;
        let checksum = u32::from_le_bytes([raw[76], raw[77], raw[78], raw[79]]);

        Ok(Self {
            md5,
            sha1,
            checksum,
        })
    }

    pub fn encode<W: Write + Seek>(&mut self, w: &mut W) -> Result<()> {
        let current = w.stream_position()?;
        let size = DIGEST_PAYLOAD_SIZE + DESCRIPTOR_SIZE;
        let (desc, _) = SectionDescriptor::encode(SECTION_DIGEST, current + size, size);
        w.write_all(&desc)?;

        let mut buf = ByteBuf::with_capacity(DIGEST_PAYLOAD_SIZE as usize);
        buf.bytes(&self.md5).bytes(&self.sha1).zeros(40);
        let (_, sum) = write_with_sum(w, &buf.into_inner())?;
        self.checksum = sum;
        Ok(())
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    pub fn sha1_hex(&self) -> String {
        hex::encode(self.sha1)
    }
}

/// `hash` section: MD5 + 16 undocumented bytes
#[derive(Debug, Clone, Default)]
pub struct HashSection {
    pub md5: [u8; 16],
    pub checksum: u32,
}

impl HashSection {
    pub fn decode<R: Read + Seek>(fh: &mut R, section: &SectionDescriptor) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;

        // Historical payloads are 20 or 36 bytes
        let payload = match section.payload_size() {
            HASH_PAYLOAD_SIZE_SHORT => HASH_PAYLOAD_SIZE_SHORT,
            _ => HASH_PAYLOAD_SIZE,
        };
        let raw = read_bytes(fh, payload as usize)?;
        let body = validated_body(&raw, "hash section")?;

        let mut rd = ByteReader::new(body);
        let md5 = rd.array::<16>()?;
        let checksum = u32::from_le_bytes([
            raw[raw.len() - 4],
            raw[raw.len() - 3],
            raw[raw.len() - 2],
            raw[raw.len() - 1],
        ]);

        Ok(Self { md5, checksum })
    }

    pub fn encode<W: Write + Seek>(&mut self, w: &mut W) -> Result<()> {
        let current = w.stream_position()?;
        let size = HASH_PAYLOAD_SIZE + DESCRIPTOR_SIZE;
        let (desc, _) = SectionDescriptor::encode(SECTION_HASH, current + size, size);
        w.write_all(&desc)?;

        let mut buf = ByteBuf::with_capacity(HASH_PAYLOAD_SIZE as usize);
        buf.bytes(&self.md5).zeros(16);
        let (_, sum) = write_with_sum(w, &buf.into_inner())?;
        self.checksum = sum;
        Ok(())
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_digest_round_trip() {
        let mut section = DigestSection {
            md5: [0xAB; 16],
            sha1: [0xCD; 20],
            checksum: 0,
        };

        let mut cur = Cursor::new(Vec::new());
        section.encode(&mut cur).unwrap();

        cur.set_position(0);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.type_name, "digest");

        let decoded = DigestSection::decode(&mut cur, &desc).unwrap();
        assert_eq!(decoded.md5, [0xAB; 16]);
        assert_eq!(decoded.sha1, [0xCD; 20]);
        assert_eq!(decoded.md5_hex(), "ab".repeat(16));
    }

    #[test]
    fn test_hash_accepts_short_shape() {
        // 20-byte historical payload: MD5 + checksum
        let mut body = ByteBuf::new();
        body.bytes(&[0x11; 16]);
        let (payload, _) = body.finish_with_sum();

        let mut file = Vec::new();
        let (desc, _) = SectionDescriptor::encode(
            SECTION_HASH,
            0,
            HASH_PAYLOAD_SIZE_SHORT + DESCRIPTOR_SIZE,
        );
        file.extend_from_slice(&desc);
        file.extend_from_slice(&payload);

        let mut cur = Cursor::new(file);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        let decoded = HashSection::decode(&mut cur, &desc).unwrap();
        assert_eq!(decoded.md5, [0x11; 16]);
    }

    #[test]
    fn test_hash_round_trip() {
        let mut section = HashSection {
            md5: [0x42; 16],
            checksum: 0,
        };

        let mut cur = Cursor::new(Vec::new());
        section.encode(&mut cur).unwrap();

        cur.set_position(0);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.payload_size(), HASH_PAYLOAD_SIZE);
        let decoded = HashSection::decode(&mut cur, &desc).unwrap();
        assert_eq!(decoded.md5, [0x42; 16]);
    }
}
