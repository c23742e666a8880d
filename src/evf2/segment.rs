//! EVF2 segment: one `.Ex01` file
//!
//! Sections are located by seeking to the last descriptor at EOF and
//! chasing `previous_offset` links down to zero, then processing the
//! collected descriptors in their original forward order.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, trace};

use crate::common::binary::{read_bytes, ByteBuf, ByteReader};
use crate::common::codec::Decompressor;
use crate::error::{EwfError, Result};

use super::hash::{Md5Section, Sha1Section};
use super::metadata::{CaseDataSection, DeviceInformationSection};
use super::table::TableSection;
use super::types::{SectionDescriptor, SectionType, DESCRIPTOR_SIZE, EVF2_SIGNATURE, LVF2_SIGNATURE};

/// Size of the segment file header record (padded to 32 bytes on disk)
pub const SEGMENT_HEADER_SIZE: usize = 22;

/// The header record opening every EVF2 segment file
#[derive(Debug, Clone)]
pub struct SegmentHeader {
    pub signature: [u8; 8],
    pub major_version: u8,
    pub minor_version: u8,
    pub compression_method: u16,
    pub segment_number: u16,
    pub set_identifier: [u8; 8],
}

impl SegmentHeader {
    pub fn new(segment_number: u16, compression_method: u16) -> Self {
        Self {
            signature: *EVF2_SIGNATURE,
            major_version: 2,
            minor_version: 1,
            compression_method,
            segment_number,
            set_identifier: [0u8; 8],
        }
    }

    pub fn decode<R: Read>(fh: &mut R) -> Result<Self> {
        let raw = read_bytes(fh, SEGMENT_HEADER_SIZE)?;
        let mut rd = ByteReader::new(&raw);
        let signature: [u8; 8] = rd.array()?;
        if &signature != EVF2_SIGNATURE && &signature != LVF2_SIGNATURE {
            return Err(EwfError::InvalidSignature);
        }

        Ok(Self {
            signature,
            major_version: rd.u8()?,
            minor_version: rd.u8()?,
            compression_method: rd.u16()?,
            segment_number: rd.u16()?,
            set_identifier: rd.array()?,
        })
    }

    pub fn encode<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        let mut buf = ByteBuf::with_capacity(SEGMENT_HEADER_SIZE);
        buf.bytes(&self.signature)
            .u8(self.major_version)
            .u8(self.minor_version)
            .u16(self.compression_method)
            .u16(self.segment_number)
            .bytes(&self.set_identifier);
        w.write_all(&buf.into_inner())?;
        Ok(())
    }
}

/// One decoded segment file and its chunk index
pub struct Segment<R> {
    fh: R,
    pub header: SegmentHeader,
    pub device_information: Option<DeviceInformationSection>,
    pub case_data: Option<CaseDataSection>,
    pub tables: Vec<TableSection>,
    pub md5_hash: Option<Md5Section>,
    pub sha1_hash: Option<Sha1Section>,

    decoded: bool,
    pub chunk_count: u64,
    pub sector_count: u64,
    /// First sector of this segment in the global sector space
    pub sector_offset: u64,
    sectors_per_chunk: u32,
    chunk_size: usize,
    decompressor: Decompressor,
}

impl<R: Read + Seek> Segment<R> {
    /// Open a segment: read the header, leave the sections for `decode`
    pub fn new(mut fh: R) -> Result<Self> {
        fh.seek(SeekFrom::Start(0))?;
        let header = SegmentHeader::decode(&mut fh)?;

        Ok(Self {
            fh,
            header,
            device_information: None,
            case_data: None,
            tables: Vec::new(),
            md5_hash: None,
            sha1_hash: None,
            decoded: false,
            chunk_count: 0,
            sector_count: 0,
            sector_offset: 0,
            sectors_per_chunk: 0,
            chunk_size: 0,
            decompressor: crate::common::codec::decompress_zlib,
        })
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    /// Walk the reverse-linked descriptor chain and index the segment
    ///
    /// `inherited_geometry` is `(sectors_per_chunk, bytes_per_sector)` from
    /// the first segment, for segments that carry no metadata of their own.
    pub fn decode(
        &mut self,
        inherited_geometry: Option<(u32, u32)>,
        sector_offset: u64,
        decompressor: Decompressor,
    ) -> Result<()> {
        if self.decoded {
            return Ok(());
        }
        self.decompressor = decompressor;

        // Collect descriptors from the back of the file to offset zero
        self.fh.seek(SeekFrom::End(-(DESCRIPTOR_SIZE as i64)))?;
        let mut sections = Vec::new();
        loop {
            let section = SectionDescriptor::decode(&mut self.fh)?;
            trace!(
                section = %section.section_type,
                offset = section.offset,
                data_size = section.data_size,
                previous = section.previous,
                "EVF2 section"
            );
            let previous = section.previous;
            sections.push(section);
            if previous == 0 {
                break;
            }
            self.fh.seek(SeekFrom::Start(previous))?;
        }
        sections.reverse();

        // Process in forward order so geometry precedes the tables
        let mut table_sector_offset = 0u64;
        for section in &sections {
            match section.section_type {
                SectionType::DeviceInformation => {
                    if self.device_information.is_none() {
                        self.device_information = Some(DeviceInformationSection::decode(
                            &mut self.fh,
                            section,
                            decompressor,
                        )?);
                    }
                }
                SectionType::CaseData => {
                    if self.case_data.is_none() {
                        self.case_data =
                            Some(CaseDataSection::decode(&mut self.fh, section, decompressor)?);
                    }
                }
                SectionType::SectorData => {
                    // Chunk payloads; indexed through the tables
                }
                SectionType::SectorTable => {
                    let spc = self.resolve_sectors_per_chunk(inherited_geometry)?;
                    let mut table = TableSection::decode(&mut self.fh, section, spc)?;
                    table.sector_offset = table_sector_offset;
                    table_sector_offset += table.sector_count;
                    self.tables.push(table);
                }
                SectionType::Md5Hash => {
                    self.md5_hash = Some(Md5Section::decode(&mut self.fh, section)?);
                }
                SectionType::Sha1Hash => {
                    self.sha1_hash = Some(Sha1Section::decode(&mut self.fh, section)?);
                }
                SectionType::Done => {}
                other => {
                    debug!(section = %other, "Skipping unhandled EVF2 section");
                }
            }
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
            expected_first += u64::from(table.num_entries);
        }

        let (spc, bps) = self.resolve_geometry(inherited_geometry)?;
        self.sectors_per_chunk = spc;
        self.chunk_size = spc as usize * bps as usize;
        self.chunk_count = self.tables.iter().map(|t| u64::from(t.num_entries)).sum();
        self.sector_count = self.chunk_count * u64::from(spc);
        self.sector_offset = sector_offset;
        self.decoded = true;

        debug!(
            segment = self.header.segment_number,
            tables = self.tables.len(),
            chunks = self.chunk_count,
            "EVF2 segment decoded"
        );
        Ok(())
    }

    fn resolve_sectors_per_chunk(&self, inherited: Option<(u32, u32)>) -> Result<u32> {
        if let Some(case_data) = &self.case_data {
            return case_data.sectors_per_chunk();
        }
        inherited.map(|(spc, _)| spc).ok_or_else(|| {
            EwfError::InvariantViolation("table section before case_data geometry".to_string())
        })
    }

    fn resolve_geometry(&self, inherited: Option<(u32, u32)>) -> Result<(u32, u32)> {
        match (&self.case_data, &self.device_information) {
            (Some(case_data), Some(device)) => {
                Ok((case_data.sectors_per_chunk()?, device.bytes_per_sector()?))
            }
            _ => inherited.ok_or_else(|| {
                EwfError::InvariantViolation("segment has no geometry metadata".to_string())
            }),
        }
    }

    /// Decompress the chunk containing `segment_sector`
    ///
    /// Returns the chunk bytes and the segment-relative sector at which the
    /// chunk begins.
    pub fn read_chunk_at(&mut self, segment_sector: u64) -> Result<(Vec<u8>, u64)> {
        let idx = self
            .tables
            .partition_point(|t| t.sector_offset + t.sector_count <= segment_sector);
        if idx >= self.tables.len() {
            return Err(EwfError::OutOfRange(format!(
                "sector {} past last table",
                segment_sector
            )));
        }

        let chunk_size = self.chunk_size;
        let decompressor = self.decompressor;
        let table = &mut self.tables[idx];
        let chunk_in_table =
            (segment_sector - table.sector_offset) / u64::from(self.sectors_per_chunk);
        let data = table.read_chunk(
            &mut self.fh,
            chunk_in_table as usize,
            chunk_size,
            decompressor,
        )?;

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
        let header = SegmentHeader::new(4, super::super::types::compression_method::ZLIB);
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), SEGMENT_HEADER_SIZE);

        let decoded = SegmentHeader::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.segment_number, 4);
        assert_eq!(decoded.major_version, 2);
        assert_eq!(decoded.minor_version, 1);
        assert_eq!(decoded.compression_method, 1);
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let bogus = vec![0u8; SEGMENT_HEADER_SIZE];
        assert!(matches!(
            SegmentHeader::decode(&mut Cursor::new(bogus)),
            Err(EwfError::InvalidSignature)
        ));
    }
}
