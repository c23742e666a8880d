//! EVF1 chunk table
//!
//! Each entry is a 32-bit value: bit 31 is the compression flag, the low 31
//! bits are an offset relative to the table's `base_offset`. A chunk may
//! therefore never sit at `base_offset + 2^31` or beyond; the writer opens a
//! new table before that boundary, and when the entry cap is reached.
//!
//! The format does not record compressed chunk sizes. They are recovered
//! from the next entry's offset, or for the final entry of a table from the
//! table section's own position and size.

use std::io::{Read, Seek, SeekFrom};

use tracing::trace;

use crate::common::binary::{adler32_of, read_bytes, validated_body, ByteBuf, ByteReader};
use crate::common::codec::decompress_zlib;
use crate::error::{EwfError, Result};

use super::types::{SectionDescriptor, DESCRIPTOR_SIZE, SECTION_TABLE, SECTION_TABLE2};

/// Low 31 bits of an entry: offset relative to `base_offset`
pub const OFFSET_MASK: u32 = 0x7FFF_FFFF;
/// Bit 31: chunk payload is zlib-compressed
pub const COMPRESSED_FLAG: u32 = 1 << 31;
/// Trailing Adler-32 carried by uncompressed chunks
const CHUNK_CHECKSUM_SIZE: u64 = 4;

/// Fixed part of the table payload before the entry array
const TABLE_HEADER_SIZE: usize = 32;

/// One chunk index section of a segment
#[derive(Debug, Clone)]
pub struct TableSection {
    /// Absolute number of the first chunk indexed here
    pub first_chunk: u64,
    /// Anchor added to every entry's 31-bit offset
    pub base_offset: u64,
    pub entries: Vec<u32>,

    /// Descriptor offset of the `table` section in the segment file
    pub section_offset: u64,
    /// Descriptor `size` field (descriptor + payload)
    pub section_size: u64,
    /// First sector covered, relative to the segment
    pub sector_offset: u64,
    /// Sectors covered by this table
    pub sector_count: u64,
}

impl TableSection {
    pub fn new_for_write(first_chunk: u64) -> Self {
        Self {
            first_chunk,
            base_offset: 0,
            entries: Vec::new(),
            section_offset: 0,
            section_size: 0,
            sector_offset: 0,
            sector_count: 0,
        }
    }

    pub fn num_entries(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Decode a `table` section at its descriptor
    pub fn decode<R: Read + Seek>(
        fh: &mut R,
        section: &SectionDescriptor,
        sectors_per_chunk: u32,
    ) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;

        let header = read_bytes(fh, TABLE_HEADER_SIZE)?;
        let header_body = validated_body(&header, "table checksum")?;
        let mut rd = ByteReader::new(header_body);
        let first_chunk = rd.u64()?;
        let num_entries = rd.u32()?;
        rd.skip(4)?;
        let base_offset = rd.u64()?;

        let entry_bytes = read_bytes(fh, num_entries as usize * 4)?;
        let footer = read_bytes(fh, 4)?;
        let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        if adler32_of(&entry_bytes) != stored {
            return Err(EwfError::CorruptChecksum("table checksum"));
        }

        let entries = entry_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        trace!(
            first_chunk,
            num_entries,
            base_offset,
            offset = section.offset,
            "Decoded table section"
        );

        Ok(Self {
            first_chunk,
            base_offset,
            entries,
            section_offset: section.offset,
            section_size: section.size,
            sector_offset: 0,
            sector_count: u64::from(num_entries) * u64::from(sectors_per_chunk),
        })
    }

    /// Serialize the table payload: checksummed header, entries, entry footer
    fn serialize(&self) -> Vec<u8> {
        let mut header = ByteBuf::with_capacity(TABLE_HEADER_SIZE);
        header
            .u64(self.first_chunk)
            .u32(self.num_entries())
            .u32(0)
            .u64(self.base_offset)
            .u32(0);
        let (mut payload, _) = header.finish_with_sum();

        let entries_start = payload.len();
        for entry in &self.entries {
            payload.extend_from_slice(&entry.to_le_bytes());
        }
        let footer = adler32_of(&payload[entries_start..]);
        payload.extend_from_slice(&footer.to_le_bytes());
        payload
    }

    /// Emit `table` immediately followed by its `table2` mirror
    ///
    /// The same payload buffer is written twice; it is never duplicated.
    pub fn encode<W: std::io::Write + Seek>(&self, w: &mut W) -> Result<()> {
        let payload = self.serialize();
        let size = payload.len() as u64 + DESCRIPTOR_SIZE;

        let position = w.stream_position()?;
        let (desc, _) = SectionDescriptor::encode(SECTION_TABLE, position + size, size);
        w.write_all(&desc)?;
        w.write_all(&payload)?;

        let position = position + size;
        let (desc, _) = SectionDescriptor::encode(SECTION_TABLE2, position + size, size);
        w.write_all(&desc)?;
        w.write_all(&payload)?;
        Ok(())
    }

    /// Absolute file offset and compression flag of a chunk entry
    fn entry_location(&self, index: usize) -> (u64, bool) {
        let entry = self.entries[index];
        let offset = self.base_offset + u64::from(entry & OFFSET_MASK);
        (offset, entry & COMPRESSED_FLAG != 0)
    }

    /// Read and decompress one chunk of this table
    ///
    /// `segment_size` bounds the entry offset; `index` is table-relative.
    pub fn read_chunk<R: Read + Seek>(
        &self,
        fh: &mut R,
        index: usize,
        segment_size: u64,
    ) -> Result<Vec<u8>> {
        if index >= self.entries.len() {
            return Err(EwfError::OutOfRange(format!(
                "chunk {} past table with {} entries",
                index,
                self.entries.len()
            )));
        }

        let (offset, compressed) = self.entry_location(index);
        if offset >= segment_size {
            return Err(EwfError::OutOfRange(format!(
                "chunk out of range: offset {:#x} beyond segment end {:#x}",
                offset, segment_size
            )));
        }

        let mut size = if index + 1 < self.entries.len() {
            let (next_offset, _) = self.entry_location(index + 1);
            next_offset - offset
        } else if offset < self.section_offset {
            // Chunk data precedes the table section
            self.section_offset - offset
        } else if offset < self.section_offset + self.section_size {
            // Chunk data is contained within the table section
            self.section_offset + self.section_size - offset
        } else {
            return Err(EwfError::UnknownChunkSize);
        };

        // Uncompressed chunks carry a trailing Adler-32
        if !compressed {
            size = size.saturating_sub(CHUNK_CHECKSUM_SIZE);
        }

        fh.seek(SeekFrom::Start(offset))?;
        let buf = read_bytes(fh, size as usize)?;

        if compressed {
            decompress_zlib(&buf)
        } else {
            Ok(buf)
        }
    }
}

/// Record a chunk written at `absolute_offset` into the open table list
///
/// Opens a fresh table when the current one is full or when the relative
/// offset would overflow 31 bits. EVF1 chunks are always compressed, so the
/// flag bit is always set.
pub fn push_chunk_offset(tables: &mut Vec<TableSection>, absolute_offset: u64, max_entries: u32) {
    if tables.is_empty() {
        tables.push(TableSection::new_for_write(0));
    }

    {
        let last = tables.last().unwrap();
        if last.num_entries() >= max_entries {
            let first_chunk = last.first_chunk + u64::from(last.num_entries());
            tables.push(TableSection::new_for_write(first_chunk));
        }
    }

    let needs_new_base = {
        let table = tables.last_mut().unwrap();
        if table.entries.is_empty() {
            table.base_offset = absolute_offset;
        }
        absolute_offset - table.base_offset > u64::from(OFFSET_MASK)
    };

    if needs_new_base {
        let last = tables.last().unwrap();
        let first_chunk = last.first_chunk + u64::from(last.num_entries());
        let mut fresh = TableSection::new_for_write(first_chunk);
        fresh.base_offset = absolute_offset;
        tables.push(fresh);
    }

    let table = tables.last_mut().unwrap();
    let relative = (absolute_offset - table.base_offset) as u32;
    table.entries.push(relative | COMPRESSED_FLAG);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::codec::compress_zlib;
    use std::io::Cursor;

    #[test]
    fn test_31_bit_overflow_opens_new_table() {
        let mut tables = Vec::new();

        push_chunk_offset(&mut tables, 0x10, u32::MAX);
        push_chunk_offset(&mut tables, 0x7FFF_FFF0, u32::MAX);
        push_chunk_offset(&mut tables, 0x8000_0010, u32::MAX);

        assert_eq!(tables.len(), 2);

        let t0 = &tables[0];
        assert_eq!(t0.base_offset, 0x10);
        assert_eq!(t0.entries.len(), 2);
        assert_eq!(t0.entries[0] & OFFSET_MASK, 0);
        assert_eq!(t0.entries[1] & OFFSET_MASK, 0x7FFF_FFE0);
        assert!(t0.entries.iter().all(|e| e & COMPRESSED_FLAG != 0));

        let t1 = &tables[1];
        assert_eq!(t1.base_offset, 0x8000_0010);
        assert_eq!(t1.first_chunk, 2);
        assert_eq!(t1.entries.len(), 1);
        assert_eq!(t1.entries[0] & OFFSET_MASK, 0);
        assert!(t1.entries[0] & COMPRESSED_FLAG != 0);
    }

    #[test]
    fn test_entry_cap_splits_tables() {
        let mut tables = Vec::new();
        for i in 0..5u64 {
            push_chunk_offset(&mut tables, 0x100 + i * 0x40, 2);
        }

        assert_eq!(tables.len(), 3);
        assert_eq!(tables[0].first_chunk, 0);
        assert_eq!(tables[1].first_chunk, 2);
        assert_eq!(tables[2].first_chunk, 4);
        assert_eq!(tables[0].num_entries(), 2);
        assert_eq!(tables[1].num_entries(), 2);
        assert_eq!(tables[2].num_entries(), 1);
    }

    #[test]
    fn test_table_round_trip_with_mirror() {
        let mut table = TableSection::new_for_write(7);
        table.base_offset = 0x1000;
        table.entries = vec![COMPRESSED_FLAG, COMPRESSED_FLAG | 0x200];

        let mut cur = Cursor::new(Vec::new());
        table.encode(&mut cur).unwrap();

        cur.set_position(0);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(desc.type_name, "table");
        let decoded = TableSection::decode(&mut cur, &desc, 64).unwrap();
        assert_eq!(decoded.first_chunk, 7);
        assert_eq!(decoded.base_offset, 0x1000);
        assert_eq!(decoded.entries, table.entries);
        assert_eq!(decoded.sector_count, 2 * 64);

        // The mirror follows at `next` with identical content
        cur.set_position(desc.next);
        let mirror = SectionDescriptor::decode(&mut cur).unwrap();
        assert_eq!(mirror.type_name, "table2");
        let decoded2 = TableSection::decode(&mut cur, &mirror, 64).unwrap();
        assert_eq!(decoded2.entries, table.entries);
    }

    #[test]
    fn test_corrupt_entry_footer_rejected() {
        let mut table = TableSection::new_for_write(0);
        table.base_offset = 0x10;
        table.entries = vec![COMPRESSED_FLAG | 1];

        let mut cur = Cursor::new(Vec::new());
        table.encode(&mut cur).unwrap();

        // Flip a bit inside the entry array
        let mut bytes = cur.into_inner();
        bytes[76 + TABLE_HEADER_SIZE] ^= 0x01;
        let mut cur = Cursor::new(bytes);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        assert!(matches!(
            TableSection::decode(&mut cur, &desc, 64),
            Err(EwfError::CorruptChecksum("table checksum"))
        ));
    }

    #[test]
    fn test_read_chunk_resolves_sizes() {
        // Layout: 16 filler bytes, two compressed chunks, then the table
        let chunk0 = compress_zlib(b"first chunk payload").unwrap();
        let chunk1 = compress_zlib(b"the second one").unwrap();

        let mut file = vec![0u8; 16];
        let off0 = file.len() as u64;
        file.extend_from_slice(&chunk0);
        let off1 = file.len() as u64;
        file.extend_from_slice(&chunk1);

        let mut table = TableSection::new_for_write(0);
        table.base_offset = off0;
        table.entries = vec![
            COMPRESSED_FLAG,
            COMPRESSED_FLAG | (off1 - off0) as u32,
        ];

        let table_pos = file.len() as u64;
        let mut cur = Cursor::new(file);
        cur.set_position(table_pos);
        table.encode(&mut cur).unwrap();

        cur.set_position(table_pos);
        let desc = SectionDescriptor::decode(&mut cur).unwrap();
        let decoded = TableSection::decode(&mut cur, &desc, 64).unwrap();
        let segment_size = cur.get_ref().len() as u64;

        // Size of chunk 0 comes from the next entry, chunk 1 from the
        // table section position.
        assert_eq!(
            decoded.read_chunk(&mut cur, 0, segment_size).unwrap(),
            b"first chunk payload"
        );
        assert_eq!(
            decoded.read_chunk(&mut cur, 1, segment_size).unwrap(),
            b"the second one"
        );

        assert!(matches!(
            decoded.read_chunk(&mut cur, 2, segment_size),
            Err(EwfError::OutOfRange(_))
        ));
    }
}
