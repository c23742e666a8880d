//! EVF1 random-access image reader
//!
//! Opens one byte source per segment file, sorts them by segment number,
//! decodes the first segment eagerly for geometry and the rest lazily on
//! first access. Reads decompress each touched chunk at most once per call
//! and never hold more than one chunk of uncompressed data at a time.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::error::{EwfError, Result};

use super::hash::{DigestSection, HashSection};
use super::segment::Segment;
use super::volume::Volume;

pub struct EwfReader<R> {
    segments: Vec<Segment<R>>,
    volume: Volume,
    chunk_size: u32,
    bytes_per_sector: u32,
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
        segments[0].decode(None, 0)?;

        if segments[0].metadata.is_none() {
            return Err(EwfError::InvariantViolation(
                "first segment has no header section".to_string(),
            ));
        }
        let volume = segments[0]
            .volume
            .clone()
            .ok_or_else(|| EwfError::InvariantViolation("segment has no volume".to_string()))?;

        let chunk_size = volume.chunk_size();
        let size = u64::from(volume.chunk_count()) * u64::from(chunk_size);

        let mut reader = Self {
            segments,
            bytes_per_sector: volume.bytes_per_sector(),
            chunk_size,
            volume,
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
            "EVF1 image opened"
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

    /// Acquisition metadata with short codes mapped to display names
    pub fn metadata(&self) -> HashMap<String, String> {
        self.segments[0]
            .metadata
            .as_ref()
            .map(|h| h.display_map())
            .unwrap_or_default()
    }

    /// Stored MD5+SHA-1 digest of the first segment, if present
    pub fn digest(&self) -> Option<&DigestSection> {
        self.segments[0].digest.as_ref()
    }

    /// Stored MD5 hash section of the first segment, if present
    pub fn stored_hash(&self) -> Option<&HashSection> {
        self.segments[0].hash.as_ref()
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
        // Segments chain their sector offsets, so everything before idx is
        // already decoded by the sequential walk in segment_for_sector.
        let sector_offset = if idx == 0 {
            0
        } else {
            self.segments[idx - 1].sector_offset + self.segments[idx - 1].sector_count
        };
        let volume = Some(self.volume.clone());
        self.segments[idx].decode(volume, sector_offset)?;

        if idx + 1 == self.segments.len() {
            self.check_chunk_count()?;
        }
        Ok(())
    }

    /// Cross-check the volume's declared chunk count against the tables
    fn check_chunk_count(&self) -> Result<()> {
        if self.segments.iter().any(|s| !s.is_decoded()) {
            return Ok(());
        }
        let actual: u64 = self.segments.iter().map(|s| s.chunk_count).sum();
        let declared = u64::from(self.volume.chunk_count());
        if actual != declared {
            return Err(EwfError::InvariantViolation(format!(
                "volume declares {} chunks but tables hold {}",
                declared, actual
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
