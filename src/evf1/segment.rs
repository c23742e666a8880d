//! EVF1 segment: one `.E01` file
//!
//! Decoding walks the forward `next` links of section descriptors, starting
//! right after the 13-byte segment header, and stops at `done` (or when a
//! link stops advancing). Unknown section types are skipped; imaging tools
//! emit `digest`, `data`, `hash`, `error2`, `session` in any order.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, trace, warn};

use crate::common::binary::{read_bytes, ByteBuf, ByteReader};
use crate::error::{EwfError, Result};

use super::hash::{DigestSection, HashSection};
use super::header::HeaderSection;
use super::table::TableSection;
use super::types::{
    SectionDescriptor, EVF_SIGNATURE, LVF_SIGNATURE, SECTION_DATA, SECTION_DIGEST, SECTION_DISK,
    SECTION_DONE, SECTION_HASH, SECTION_HEADER, SECTION_HEADER2, SECTION_SECTORS, SECTION_TABLE,
    SECTION_TABLE2, SECTION_VOLUME,
};
use super::volume::{DataSection, Volume};

/// Size of the segment file header
pub const SEGMENT_HEADER_SIZE: u64 = 13;

/// The 13-byte header opening every EVF1 segment file
#[derive(Debug, Clone)]
pub struct SegmentHeader {
    pub signature: [u8; 8],
    pub fields_start: u8,
    pub segment_number: u16,
    pub fields_end: u16,
}

impl SegmentHeader {
    pub fn new(segment_number: u16) -> Self {
        Self {
            signature: *EVF_SIGNATURE,
            fields_start: 1,
            segment_number,
            fields_end: 0,
        }
    }

    pub fn decode<R: Read>(fh: &mut R) -> Result<Self> {
        let raw = read_bytes(fh, SEGMENT_HEADER_SIZE as usize)?;
        let mut rd = ByteReader::new(&raw);
        let signature: [u8; 8] = rd.array()?;
        if &signature != EVF_SIGNATURE && &signature != LVF_SIGNATURE {
            return Err(EwfError::InvalidSignature);
        }

        Ok(Self {
            signature,
            fields_start: rd.u8()?,
            segment_number: rd.u16()?,
            fields_end: rd.u16()?,
        })
    }

    pub fn encode<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        let mut buf = ByteBuf::with_capacity(SEGMENT_HEADER_SIZE as usize);
        buf.bytes(&self.signature)
            .u8(self.fields_start)
            .u16(self.segment_number)
            .u16(self.fields_end);
        w.write_all(&buf.into_inner())?;
        Ok(())
    }
}

/// One decoded segment file and its chunk index
pub struct Segment<R> {
    fh: R,
    file_size: u64,
    pub header: SegmentHeader,
    pub metadata: Option<HeaderSection>,
    pub volume: Option<Volume>,
    pub tables: Vec<TableSection>,
    pub digest: Option<DigestSection>,
    pub hash: Option<HashSection>,
    pub data: Option<DataSection>,

    decoded: bool,
    pub chunk_count: u64,
    pub sector_count: u64,
    /// First sector of this segment in the global sector space
    pub sector_offset: u64,
    sectors_per_chunk: u32,
}

impl<R: Read + Seek> Segment<R> {
    /// Open a segment: read the header, leave the sections for `decode`
    pub fn new(mut fh: R) -> Result<Self> {
        let file_size = fh.seek(SeekFrom::End(0))?;
        fh.seek(SeekFrom::Start(0))?;
        let header = SegmentHeader::decode(&mut fh)?;

        Ok(Self {
            fh,
            file_size,
            header,
            metadata: None,
            volume: None,
            tables: Vec::new(),
            digest: None,
            hash: None,
            data: None,
            decoded: false,
            chunk_count: 0,
            sector_count: 0,
            sector_offset: 0,
            sectors_per_chunk: 0,
        })
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    /// Walk the section chain and index the segment
    ///
    /// Later segments of a set carry no `volume`; the geometry of the first
    /// segment is handed in through `inherited_volume`, and `sector_offset`
    /// is the running total from the segments before this one.
    pub fn decode(&mut self, inherited_volume: Option<Volume>, sector_offset: u64) -> Result<()> {
        if self.decoded {
            return Ok(());
        }

        if self.volume.is_none() {
            self.volume = inherited_volume;
        }

        self.fh.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE))?;
        let mut table_sector_offset = 0u64;

        loop {
            let section = SectionDescriptor::decode(&mut self.fh)?;
            trace!(
                section = %section.type_name,
                offset = section.offset,
                size = section.size,
                next = section.next,
                "EVF1 section"
            );

            match section.type_name.as_str() {
                SECTION_HEADER | SECTION_HEADER2 => {
                    if self.metadata.is_none() {
                        self.metadata = Some(HeaderSection::decode(&mut self.fh, &section)?);
                    }
                }
                SECTION_VOLUME | SECTION_DISK => {
                    if self.volume.is_none() {
                        self.volume = Some(Volume::decode(&mut self.fh, &section)?);
                    }
                }
                SECTION_SECTORS => {
                    // Chunk payloads; indexed through the tables
                }
                SECTION_TABLE => {
                    let volume = self.volume.as_ref().ok_or_else(|| {
                        EwfError::InvariantViolation(
                            "table section before volume geometry".to_string(),
                        )
                    })?;
                    let mut table =
                        TableSection::decode(&mut self.fh, &section, volume.sectors_per_chunk())?;
                    table.sector_offset = table_sector_offset;
                    table_sector_offset += table.sector_count;
                    self.tables.push(table);
                }
                SECTION_TABLE2 => {
                    // Mirror of the preceding table
                }
                SECTION_DIGEST => {
                    self.digest = Some(DigestSection::decode(&mut self.fh, &section)?);
                }
                SECTION_HASH => {
                    self.hash = Some(HashSection::decode(&mut self.fh, &section)?);
                }
                SECTION_DATA => {
                    self.data = Some(DataSection::decode(&mut self.fh, &section)?);
                }
                SECTION_DONE => {
                    break;
                }
                other => {
                    debug!(section = %other, "Skipping unknown EVF1 section");
                }
            }

            if section.next <= section.offset {
                warn!(
                    offset = section.offset,
                    "Section chain ended without done marker"
                );
                break;
            }
            self.fh.seek(SeekFrom::Start(section.next))?;
        }

        // Chunk numbers must be contiguous across the segment's tables
        let mut expected_first = 0u64;
        for table in &self.tables {
            if table.first_chunk != expected_first {
                return Err(EwfError::InvariantViolation(format!(
                    "table declares first chunk {} where {} was expected",
                    table.first_chunk, expected_first
                )));
            }
            expected_first += u64::from(table.num_entries());
        }

        let volume = self
            .volume
            .as_ref()
            .ok_or_else(|| EwfError::InvariantViolation("segment has no volume".to_string()))?;
        self.sectors_per_chunk = volume.sectors_per_chunk();
        self.chunk_count = self.tables.iter().map(|t| u64::from(t.num_entries())).sum();
        self.sector_count = self.chunk_count * u64::from(self.sectors_per_chunk);
        self.sector_offset = sector_offset;
        self.decoded = true;

        debug!(
            segment = self.header.segment_number,
            tables = self.tables.len(),
            chunks = self.chunk_count,
            "EVF1 segment decoded"
        );
        Ok(())
    }

    /// Decompress the chunk containing `segment_sector`
    ///
    /// Returns the chunk bytes and the segment-relative sector at which the
    /// chunk begins.
    pub fn read_chunk_at(&mut self, segment_sector: u64) -> Result<(Vec<u8>, u64)> {
        let idx = self
            .tables
            .partition_point(|t| t.sector_offset + t.sector_count <= segment_sector);
        let table = self.tables.get(idx).ok_or_else(|| {
            EwfError::OutOfRange(format!("sector {} past last table", segment_sector))
        })?;

        let chunk_in_table =
            (segment_sector - table.sector_offset) / u64::from(self.sectors_per_chunk);
        let data = table.read_chunk(&mut self.fh, chunk_in_table as usize, self.file_size)?;

        let chunk_start_sector =
            table.sector_offset + chunk_in_table * u64::from(self.sectors_per_chunk);
        Ok((data, chunk_start_sector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_segment_header_round_trip() {
        let header = SegmentHeader::new(3);
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), SEGMENT_HEADER_SIZE as usize);

        let decoded = SegmentHeader::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.segment_number, 3);
        assert_eq!(&decoded.signature, EVF_SIGNATURE);
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let bogus = b"NOTEWF\x00\x00\x01\x01\x00\x00\x00";
        assert!(matches!(
            SegmentHeader::decode(&mut Cursor::new(bogus.to_vec())),
            Err(EwfError::InvalidSignature)
        ));
    }
}
