//! EVF1 streaming image writer
//!
//! The sink must be seekable: the `volume` chunk count and the `sectors`
//! descriptor are written as placeholders up front and patched on close.
//! Chunks are always zlib-compressed in this dialect.

use std::io::{Seek, SeekFrom, Write};

use md5::Md5;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::common::binary::pad_to;
use crate::common::codec::ZlibCompressor;
use crate::common::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_TABLE_ENTRIES};
use crate::error::Result;

use super::hash::{DigestSection, HashSection};
use super::header::{HeaderSection, MediaInfoKey};
use super::segment::SegmentHeader;
use super::table::{push_chunk_offset, TableSection};
use super::types::{SectionDescriptor, DESCRIPTOR_SIZE, SECTION_DONE, SECTION_SECTORS};
use super::volume::{DataSection, VolumeData, VolumeSection};

/// Writer-side `sectors` section
///
/// The descriptor is written before the chunk payloads it frames, so the
/// first encode emits a placeholder and remembers its position; the close
/// path re-encodes it there with the real size and table link.
struct SectorsSection {
    position: u64,
}

impl SectorsSection {
    fn new() -> Self {
        Self { position: 0 }
    }

    fn encode<W: Write + Seek>(&mut self, w: &mut W, data_size: u64, next: u64) -> Result<()> {
        let current = w.stream_position()?;
        let patching = self.position != 0;
        if !patching {
            self.position = current;
        }

        w.seek(SeekFrom::Start(self.position))?;
        let (desc, _) =
            SectionDescriptor::encode(SECTION_SECTORS, next, data_size + DESCRIPTOR_SIZE);
        w.write_all(&desc)?;

        if patching {
            w.seek(SeekFrom::Start(current))?;
        }
        Ok(())
    }
}

/// Stages metadata before the segment layout is committed to the sink
pub struct EwfCreator<W: Write + Seek> {
    writer: EwfWriter<W>,
}

/// Begin creating an `.E01` image on a seekable sink
pub fn create<W: Write + Seek>(dest: W) -> Result<EwfCreator<W>> {
    Ok(EwfCreator {
        writer: EwfWriter {
            dest,
            buf: Vec::with_capacity(DEFAULT_CHUNK_SIZE),
            compressor: ZlibCompressor::new(),
            md5: Md5::new(),
            sha1: Sha1::new(),
            header: HeaderSection::new(),
            volume: VolumeSection::new(VolumeData::default_volume()),
            sectors: SectorsSection::new(),
            tables: vec![TableSection::new_for_write(0)],
            data_size: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_table_entries: DEFAULT_MAX_TABLE_ENTRIES,
        },
    })
}

impl<W: Write + Seek> EwfCreator<W> {
    pub fn add_media_info(&mut self, key: MediaInfoKey, value: &str) {
        self.writer.header.set(key, value);
    }

    /// Commit the segment prologue and hand over the streaming writer
    pub fn start(mut self) -> Result<EwfWriter<W>> {
        let w = &mut self.writer;

        SegmentHeader::new(1).encode(&mut w.dest)?;
        w.header.encode(&mut w.dest)?;
        // Volume precedes the data it describes; a default is written as a
        // placeholder and patched with the chunk count on close.
        w.volume.encode(&mut w.dest)?;
        // Same for the sectors descriptor framing the chunk stream.
        w.sectors.encode(&mut w.dest, 0, 0)?;

        Ok(self.writer)
    }
}

/// Streaming writer for a single `.E01` segment
pub struct EwfWriter<W: Write + Seek> {
    dest: W,
    buf: Vec<u8>,
    compressor: ZlibCompressor,
    md5: Md5,
    sha1: Sha1,

    header: HeaderSection,
    volume: VolumeSection,
    sectors: SectorsSection,
    tables: Vec<TableSection>,
    data_size: u64,

    chunk_size: usize,
    pub(crate) max_table_entries: u32,
}

impl<W: Write + Seek> EwfWriter<W> {
    /// Compress one full chunk, append it, and record the table entry
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let position = self.dest.stream_position()?;
        let packed = self.compressor.compress(chunk)?;

        self.dest.write_all(&packed)?;
        self.data_size += packed.len() as u64;

        push_chunk_offset(&mut self.tables, position, self.max_table_entries);
        self.volume.data.increment_chunk_count();

        self.md5.update(chunk);
        self.sha1.update(chunk);
        Ok(())
    }

    /// Finish the image: flush the final padded chunk, patch the
    /// placeholders, and emit tables, hashes, geometry, and `done`.
    ///
    /// Returns the sink.
    pub fn close(mut self) -> Result<W> {
        if !self.buf.is_empty() {
            let mut last = std::mem::take(&mut self.buf);
            pad_to(&mut last, self.chunk_size);
            self.write_chunk(&last)?;
        }

        let table_position = self.dest.stream_position()?;
        self.sectors
            .encode(&mut self.dest, self.data_size, table_position)?;

        for table in &self.tables {
            table.encode(&mut self.dest)?;
        }

        let md5: [u8; 16] = self.md5.finalize().into();
        let sha1: [u8; 20] = self.sha1.finalize().into();

        let mut digest = DigestSection {
            md5,
            sha1,
            checksum: 0,
        };
        digest.encode(&mut self.dest)?;

        let mut hash = HashSection { md5, checksum: 0 };
        hash.encode(&mut self.dest)?;

        // Patch the volume with the final chunk count
        self.volume.encode(&mut self.dest)?;

        let mut data = DataSection {
            data: self.volume.data.clone(),
        };
        data.encode(&mut self.dest)?;

        let position = self.dest.stream_position()?;
        let (done, _) = SectionDescriptor::encode(SECTION_DONE, position, DESCRIPTOR_SIZE);
        self.dest.write_all(&done)?;
        self.dest.flush()?;

        debug!(
            chunks = self.volume.data.chunk_count,
            tables = self.tables.len(),
            compressed_bytes = self.data_size,
            "EVF1 image closed"
        );
        Ok(self.dest)
    }
}

impl<W: Write + Seek> Write for EwfWriter<W> {
    fn write(&mut self, p: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(p);

        while self.buf.len() >= self.chunk_size {
            let chunk: Vec<u8> = self.buf.drain(..self.chunk_size).collect();
            self.write_chunk(&chunk)?;
        }
        Ok(p.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.dest.flush()
    }
}
