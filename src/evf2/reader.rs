//! EVF2 random-access image reader
//!
//! Geometry comes from `case_data` (`sb`, `tb`) and `device_information`
//! (`bp`); the chunk decompressor is selected once from the first segment
//! header's compression method.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::common::codec::{decompress_bzip2, decompress_zlib, skip_decompress, Decompressor};
use crate::error::{EwfError, Result};

use super::hash::{Md5Section, Sha1Section};
use super::segment::Segment;
use super::types::compression_method;

pub struct EwfReader<R> {
    segments: Vec<Segment<R>>,
    decompressor: Decompressor,
    sectors_per_chunk: u32,
    bytes_per_sector: u32,
    chunk_size: u32,
    declared_chunk_count: u64,
    size: u64,
    position: u64,
}

impl<R: Read + Seek> EwfReader<R> {
    /// Open an image from one or more segment sources
    pub fn open(sources: Vec<R>) -> Result<Self> {
        let mut segments = sources
            .into_iter()
            .map(Segment::new)
            .collect::<Result<Vec<_>>>()?;
        if segments.is_empty() {
            return Err(EwfError::InvariantViolation(
                "no segment sources given".to_string(),
            ));
        }

        segments.sort_by_key(|s| s.header.segment_number);

        let decompressor: Decompressor = match segments[0].header.compression_method {
            compression_method::NONE => skip_decompress,
            compression_method::ZLIB => decompress_zlib,
            compression_method::BZIP2 => decompress_bzip2,
            other => {
                return Err(EwfError::Compression(format!(
                    "unsupported compression method: {}",
                    other
                )))
            }
        };

        segments[0].decode(None, 0, decompressor)?;

        let case_data = segments[0].case_data.as_ref().ok_or_else(|| {
            EwfError::InvariantViolation("first segment has no case_data".to_string())
        })?;
        let device = segments[0].device_information.as_ref().ok_or_else(|| {
            EwfError::InvariantViolation("first segment has no device_information".to_string())
        })?;

        let sectors_per_chunk = case_data.sectors_per_chunk()?;
        let bytes_per_sector = device.bytes_per_sector()?;
        let declared_chunk_count = case_data.chunk_count()?;
        let chunk_size = sectors_per_chunk * bytes_per_sector;
        let size = declared_chunk_count * u64::from(chunk_size);

        let mut reader = Self {
            segments,
            decompressor,
            sectors_per_chunk,
            bytes_per_sector,
            chunk_size,
            declared_chunk_count,
            size,
            position: 0,
        };

        if reader.segments.len() == 1 {
            reader.check_chunk_count()?;
        }

        debug!(
            segments = reader.segments.len(),
            size = reader.size,
            chunk_size = reader.chunk_size,
            "EVF2 image opened"
        );
        Ok(reader)
    }

    /// Logical image size: always a multiple of the chunk size
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Case metadata with short codes mapped to display names
    pub fn case_data(&self) -> HashMap<String, String> {
        self.segments[0]
            .case_data
            .as_ref()
            .map(|s| s.display_map())
            .unwrap_or_default()
    }

    /// Device metadata with short codes mapped to display names
    pub fn device_information(&self) -> HashMap<String, String> {
        self.segments[0]
            .device_information
            .as_ref()
            .map(|s| s.display_map())
            .unwrap_or_default()
    }

    /// Stored MD5 of the first segment, if present
    pub fn md5_hash(&self) -> Option<&Md5Section> {
        self.segments[0].md5_hash.as_ref()
    }

    /// Stored SHA-1 of the first segment, if present
    pub fn sha1_hash(&self) -> Option<&Sha1Section> {
        self.segments[0].sha1_hash.as_ref()
    }

    /// Read into `buf` at absolute offset `off`; returns bytes read
    pub fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize> {
        if off >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let end = (off + buf.len() as u64).min(self.size);
        let sector_size = u64::from(self.bytes_per_sector);

        let mut pos = off;
        while pos < end {
            let sector = pos / sector_size;
            let seg_idx = self.segment_for_sector(sector)?;
            let segment = &mut self.segments[seg_idx];

            let (chunk, chunk_start_sector) =
                segment.read_chunk_at(sector - segment.sector_offset)?;
            let chunk_byte = (segment.sector_offset + chunk_start_sector) * sector_size;

            let from = (pos - chunk_byte) as usize;
            let to = ((end - chunk_byte).min(chunk.len() as u64)) as usize;
            if to <= from {
                return Err(EwfError::InvariantViolation(
                    "decoded chunk shorter than requested window".to_string(),
                ));
            }

            let out = (pos - off) as usize;
            buf[out..out + (to - from)].copy_from_slice(&chunk[from..to]);
            pos = chunk_byte + to as u64;
        }

        Ok((end - off) as usize)
    }

    /// Locate the segment covering `sector`, decoding lazily on the way
    fn segment_for_sector(&mut self, sector: u64) -> Result<usize> {
        for i in 0..self.segments.len() {
            self.ensure_decoded(i)?;
            let segment = &self.segments[i];
            if sector < segment.sector_offset + segment.sector_count {
                return Ok(i);
            }
        }
        Err(EwfError::OutOfRange(format!(
            "sector {} beyond all segments",
            sector
        )))
    }

    fn ensure_decoded(&mut self, idx: usize) -> Result<()> {
        if self.segments[idx].is_decoded() {
            return Ok(());
        }
        let sector_offset = if idx == 0 {
            0
        } else {
            self.segments[idx - 1].sector_offset + self.segments[idx - 1].sector_count
        };
        let geometry = Some((self.sectors_per_chunk, self.bytes_per_sector));
        self.segments[idx].decode(geometry, sector_offset, self.decompressor)?;

        if idx + 1 == self.segments.len() {
            self.check_chunk_count()?;
        }
        Ok(())
    }

    /// Cross-check `case_data.tb` against the decoded tables
    fn check_chunk_count(&self) -> Result<()> {
        if self.segments.iter().any(|s| !s.is_decoded()) {
            return Ok(());
        }
        let actual: u64 = self.segments.iter().map(|s| s.chunk_count).sum();
        if actual != self.declared_chunk_count {
            return Err(EwfError::InvariantViolation(format!(
                "case_data declares {} chunks but tables hold {}",
                self.declared_chunk_count, actual
            )));
        }
        Ok(())
    }
}

impl<R: Read + Seek> Read for EwfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.read_at(buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for EwfReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(off) => self.position as i64 + off,
            SeekFrom::End(off) => self.size as i64 + off,
        };
        if new_pos < 0 {
            return Err(EwfError::OutOfRange("negative seek position".to_string()).into());
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}
