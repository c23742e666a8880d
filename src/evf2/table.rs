//! EVF2 chunk table (`sector_table`)
//!
//! Entries are explicit `{offset, size, flags}` triples with absolute file
//! offsets, so no base-offset arithmetic is needed. Entry arrays can reach
//! tens of MiB on large images; only the header is decoded eagerly and the
//! entries are loaded and cached on first chunk access.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::trace;

use crate::common::binary::{adler32_of, read_bytes, validated_body, ByteBuf, ByteReader};
use crate::common::codec::{padding_for, Decompressor};
use crate::error::{EwfError, Result};

use super::types::{data_flags, SectionDescriptor, SectionType, DESCRIPTOR_SIZE};

/// Fixed part of the table payload before its alignment padding
const TABLE_HEADER_SIZE: usize = 20;
/// On-disk size of one entry
const ENTRY_SIZE: usize = 16;
/// Trailing Adler-32 carried by raw chunks flagged HAS_CHECKSUM
const CHUNK_CHECKSUM_SIZE: usize = 4;

/// One `{offset, size, flags}` chunk index entry
#[derive(Debug, Clone, Copy)]
pub struct TableEntry {
    pub data_offset: u64,
    pub size: u32,
    pub flags: u32,
}

/// One chunk index section of a segment
#[derive(Debug, Clone)]
pub struct TableSection {
    /// Absolute number of the first chunk indexed here
    pub first_chunk: u64,
    pub num_entries: u32,
    /// Loaded lazily on the read side; always present on the write side
    entries: Option<Vec<TableEntry>>,
    /// File offset of the entry array, for lazy loading
    entries_position: u64,

    /// First sector covered, relative to the segment
    pub sector_offset: u64,
    /// Sectors covered by this table
    pub sector_count: u64,
}

impl TableSection {
    pub fn new_for_write(first_chunk: u64) -> Self {
        Self {
            first_chunk,
            num_entries: 0,
            entries: Some(Vec::new()),
            entries_position: 0,
            sector_offset: 0,
            sector_count: 0,
        }
    }

    /// Decode the table header; entries stay on disk until first access
    pub fn decode<R: Read + Seek>(
        fh: &mut R,
        section: &SectionDescriptor,
        sectors_per_chunk: u32,
    ) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;

        let header = read_bytes(fh, TABLE_HEADER_SIZE)?;
        let body = validated_body(&header, "table checksum")?;
        let mut rd = ByteReader::new(body);
        let first_chunk = rd.u64()?;
        let num_entries = rd.u32()?;

        let entries_position =
            section.data_offset + (TABLE_HEADER_SIZE + padding_for(TABLE_HEADER_SIZE)) as u64;

        trace!(
            first_chunk,
            num_entries,
            entries_position,
            "Decoded sector_table header"
        );

        Ok(Self {
            first_chunk,
            num_entries,
            entries: None,
            entries_position,
            sector_offset: 0,
            sector_count: u64::from(num_entries) * u64::from(sectors_per_chunk),
        })
    }

    /// Entry accessor that loads and caches the array on first use
    pub(crate) fn entries<R: Read + Seek>(&mut self, fh: &mut R) -> Result<&[TableEntry]> {
        if self.entries.is_none() {
            fh.seek(SeekFrom::Start(self.entries_position))?;
            let raw = read_bytes(fh, self.num_entries as usize * ENTRY_SIZE)?;

            let footer = read_bytes(fh, 4)?;
            let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
            if adler32_of(&raw) != stored {
                return Err(EwfError::CorruptChecksum("table checksum"));
            }

            let mut entries = Vec::with_capacity(self.num_entries as usize);
            let mut rd = ByteReader::new(&raw);
            for _ in 0..self.num_entries {
                entries.push(TableEntry {
                    data_offset: rd.u64()?,
                    size: rd.u32()?,
                    flags: rd.u32()?,
                });
            }
            self.entries = Some(entries);
        }
        Ok(self.entries.as_deref().unwrap())
    }

    pub fn push(&mut self, entry: TableEntry) {
        self.num_entries += 1;
        self.entries
            .as_mut()
            .expect("write-side table has entries")
            .push(entry);
    }

    /// Serialize the payload; returns the bytes and the trailing pad length
    fn serialize(&self) -> (Vec<u8>, u32) {
        let mut header = ByteBuf::with_capacity(TABLE_HEADER_SIZE);
        header.u64(self.first_chunk).u32(self.num_entries).u32(0);
        let (mut payload, _) = header.finish_with_sum();
        payload.resize(payload.len() + padding_for(payload.len()), 0);

        let entries_start = payload.len();
        for entry in self.entries.as_deref().unwrap_or_default() {
            payload.extend_from_slice(&entry.data_offset.to_le_bytes());
            payload.extend_from_slice(&entry.size.to_le_bytes());
            payload.extend_from_slice(&entry.flags.to_le_bytes());
        }

        let footer = adler32_of(&payload[entries_start..]);
        payload.extend_from_slice(&footer.to_le_bytes());

        let trailing = padding_for(4) as u32;
        payload.resize(payload.len() + trailing as usize, 0);
        (payload, trailing)
    }

    /// Write the table payload followed by its descriptor
    ///
    /// Returns (payload+padding bytes, descriptor bytes).
    pub fn encode<W: Write>(&self, w: &mut W, previous: u64) -> Result<(usize, usize)> {
        let (payload, trailing) = self.serialize();
        w.write_all(&payload)?;

        let data_size = payload.len() as u64 - u64::from(trailing);
        let (desc, _) = SectionDescriptor::encode(
            SectionType::SectorTable,
            0,
            previous,
            data_size,
            trailing,
        );
        w.write_all(&desc)?;

        Ok((payload.len(), DESCRIPTOR_SIZE as usize))
    }

    /// Read and decode one chunk of this table
    pub fn read_chunk<R: Read + Seek>(
        &mut self,
        fh: &mut R,
        index: usize,
        chunk_size: usize,
        decompressor: Decompressor,
    ) -> Result<Vec<u8>> {
        if index >= self.num_entries as usize {
            return Err(EwfError::OutOfRange(format!(
                "chunk {} past table with {} entries",
                index, self.num_entries
            )));
        }

        let entry = self.entries(fh)?[index];
        fh.seek(SeekFrom::Start(entry.data_offset))?;
        let buf = read_bytes(fh, entry.size as usize)?;

        if entry.flags & data_flags::USES_PATTERN_FILL != 0 {
            return expand_pattern_fill(&buf, chunk_size);
        }
        if entry.flags & data_flags::IS_COMPRESSED != 0 {
            return decompressor(&buf);
        }
        // Raw chunks only carry a trailing Adler-32 when flagged
        if entry.flags & data_flags::HAS_CHECKSUM != 0 && buf.len() > CHUNK_CHECKSUM_SIZE {
            return Ok(buf[..buf.len() - CHUNK_CHECKSUM_SIZE].to_vec());
        }
        Ok(buf)
    }
}

/// Repeat an 8-byte pattern out to the chunk size
fn expand_pattern_fill(pattern: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    if pattern.len() != 8 {
        return Err(EwfError::InvariantViolation(format!(
            "pattern-fill payload is {} bytes, expected 8",
            pattern.len()
        )));
    }

    let mut out = vec![0u8; chunk_size];
    for piece in out.chunks_mut(8) {
        piece.copy_from_slice(&pattern[..piece.len()]);
    }
    Ok(out)
}

/// Record a chunk entry, opening a fresh table at the entry cap
pub fn push_chunk_entry(tables: &mut Vec<TableSection>, entry: TableEntry, max_entries: u32) {
    if tables.is_empty() {
        tables.push(TableSection::new_for_write(0));
    }

    {
        let last = tables.last().unwrap();
        if last.num_entries >= max_entries {
            let first_chunk = last.first_chunk + u64::from(last.num_entries);
            tables.push(TableSection::new_for_write(first_chunk));
        }
    }

    tables.last_mut().unwrap().push(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::codec::{compress_zlib, decompress_zlib};
    use std::io::Cursor;

    #[test]
    fn test_table_round_trip_with_lazy_entries() {
        let mut table = TableSection::new_for_write(5);
        table.push(TableEntry {
            data_offset: 0x40,
            size: 100,
            flags: data_flags::IS_COMPRESSED,
        });
        table.push(TableEntry {
            data_offset: 0x200,
            size: 32_768,
            flags: 0,
        });

        let mut out = Vec::new();
        let (data_n, _) = table.encode(&mut out, 0x30).unwrap();

        let mut cur = Cursor::new(out);
        cur.set_position(data_n as u64);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.section_type, SectionType::SectorTable);
        assert_eq!(desc.data_offset, 0);

        let mut decoded = TableSection::decode(&mut cur, &desc, 64).unwrap();
        assert_eq!(decoded.first_chunk, 5);
        assert_eq!(decoded.num_entries, 2);
        assert_eq!(decoded.sector_count, 128);
        assert!(decoded.entries.is_none());

        let entries = decoded.entries(&mut cur).unwrap();
        assert_eq!(entries[0].data_offset, 0x40);
        assert_eq!(entries[0].flags, data_flags::IS_COMPRESSED);
        assert_eq!(entries[1].size, 32_768);
        // Second access serves the cache
        assert!(decoded.entries.is_some());
    }

    #[test]
    fn test_corrupt_entry_footer_rejected() {
        let mut table = TableSection::new_for_write(0);
        table.push(TableEntry {
            data_offset: 0x10,
            size: 8,
            flags: 0,
        });

        let mut out = Vec::new();
        let (data_n, _) = table.encode(&mut out, 0).unwrap();
        out[32] ^= 0x01; // first entry byte

        let mut cur = Cursor::new(out);
        cur.set_position(data_n as u64);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        let mut decoded = TableSection::decode(&mut cur, &desc, 64).unwrap();
        assert!(matches!(
            decoded.entries(&mut cur),
            Err(EwfError::CorruptChecksum("table checksum"))
        ));
    }

    #[test]
    fn test_read_chunk_variants() {
        // File layout: compressed chunk, raw chunk, 8-byte pattern
        let compressed = compress_zlib(b"compressed chunk").unwrap();
        let mut file = Vec::new();
        let comp_off = 0u64;
        file.extend_from_slice(&compressed);
        let raw_off = file.len() as u64;
        file.extend_from_slice(b"raw bytes stored verbatim");
        let pattern_off = file.len() as u64;
        file.extend_from_slice(&[0xAB, 0xCD, 0, 0, 0, 0, 0, 1]);

        let mut table = TableSection::new_for_write(0);
        table.push(TableEntry {
            data_offset: comp_off,
            size: compressed.len() as u32,
            flags: data_flags::IS_COMPRESSED,
        });
        table.push(TableEntry {
            data_offset: raw_off,
            size: 25,
            flags: 0,
        });
        table.push(TableEntry {
            data_offset: pattern_off,
            size: 8,
            flags: data_flags::USES_PATTERN_FILL,
        });

        let mut cur = Cursor::new(file);
        assert_eq!(
            table.read_chunk(&mut cur, 0, 32, decompress_zlib).unwrap(),
            b"compressed chunk"
        );
        assert_eq!(
            table.read_chunk(&mut cur, 1, 32, decompress_zlib).unwrap(),
            b"raw bytes stored verbatim"
        );

        let pattern = table.read_chunk(&mut cur, 2, 32, decompress_zlib).unwrap();
        assert_eq!(pattern.len(), 32);
        assert_eq!(&pattern[..8], &[0xAB, 0xCD, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&pattern[24..], &[0xAB, 0xCD, 0, 0, 0, 0, 0, 1]);

        assert!(matches!(
            table.read_chunk(&mut cur, 3, 32, decompress_zlib),
            Err(EwfError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_entry_cap_splits_tables() {
        let mut tables = Vec::new();
        for i in 0..5u64 {
            push_chunk_entry(
                &mut tables,
                TableEntry {
                    data_offset: i * 0x100,
                    size: 64,
                    flags: data_flags::IS_COMPRESSED,
                },
                2,
            );
        }

        assert_eq!(tables.len(), 3);
        assert_eq!(tables[0].first_chunk, 0);
        assert_eq!(tables[1].first_chunk, 2);
        assert_eq!(tables[2].first_chunk, 4);
        assert_eq!(tables[2].num_entries, 1);
    }
}
