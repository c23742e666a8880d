//! EVF2 streaming image writer
//!
//! Append-only: the sink never needs to seek. Every section chains backward
//! through `previous_offset`, chunk payloads are 16-byte aligned, and a
//! chunk whose compressed form would not shrink is stored raw with the
//! compressed flag clear.

use std::io::Write;

use chrono::Utc;
use md5::Md5;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::common::binary::pad_to;
use crate::common::codec::{padding_for, ZlibCompressor};
use crate::common::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_TABLE_ENTRIES};
use crate::error::Result;

use super::hash::{Md5Section, Sha1Section};
use super::metadata::{CaseDataKey, CaseDataSection, DeviceInfoKey, DeviceInformationSection};
use super::segment::{SegmentHeader, SEGMENT_HEADER_SIZE};
use super::table::{push_chunk_entry, TableEntry, TableSection};
use super::types::{compression_method, data_flags, SectionDescriptor, SectionType};

/// Append-only sink wrapper that tracks the write position
struct CountingWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Stages metadata before the segment layout is committed to the sink
pub struct EwfCreator<W: Write> {
    writer: EwfWriter<W>,
}

/// Begin creating an `.Ex01` image on an append-only sink
pub fn create<W: Write>(dest: W) -> Result<EwfCreator<W>> {
    let timestamp = Utc::now().timestamp().to_string();

    let mut case_data = CaseDataSection::new();
    case_data.set(CaseDataKey::Name, "");
    case_data.set(CaseDataKey::CaseNumber, "");
    case_data.set(CaseDataKey::EvidenceNumber, "");
    case_data.set(CaseDataKey::ExaminerName, "");
    case_data.set(CaseDataKey::Notes, "");
    case_data.set(CaseDataKey::ActualTime, &timestamp);
    case_data.set(CaseDataKey::TargetTime, &timestamp);
    case_data.set(CaseDataKey::OperatingSystem, std::env::consts::OS);
    case_data.set(CaseDataKey::CompressionMethod, "1");
    case_data.set(CaseDataKey::WriteBlockerType, "");
    case_data.set(CaseDataKey::ErrorGranularity, "");

    let mut device_information = DeviceInformationSection::new();
    device_information.set(DeviceInfoKey::DriveModel, "");
    device_information.set(DeviceInfoKey::SerialNumber, "");
    device_information.set(DeviceInfoKey::DriveLabel, "");
    device_information.set(DeviceInfoKey::SmartLogs, "");
    device_information.set(DeviceInfoKey::HpaSectors, "");
    device_information.set(DeviceInfoKey::PalmSectors, "");
    device_information.set(DeviceInfoKey::DriveType, "f");
    device_information.set(DeviceInfoKey::IsPhysical, "1");

    Ok(EwfCreator {
        writer: EwfWriter {
            dest: CountingWriter::new(dest),
            buf: Vec::with_capacity(DEFAULT_CHUNK_SIZE),
            compressor: ZlibCompressor::new(),
            md5: Md5::new(),
            sha1: Sha1::new(),
            case_data,
            device_information,
            tables: vec![TableSection::new_for_write(0)],
            data_size: 0,
            data_pad_size: 0,
            previous_descriptor: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_table_entries: DEFAULT_MAX_TABLE_ENTRIES,
        },
    })
}

impl<W: Write> EwfCreator<W> {
    pub fn add_case_data(&mut self, key: CaseDataKey, value: &str) {
        self.writer.case_data.set(key, value);
    }

    pub fn add_device_information(&mut self, key: DeviceInfoKey, value: &str) {
        self.writer.device_information.set(key, value);
    }

    /// Commit the segment prologue and hand over the streaming writer
    ///
    /// `total_size` is the expected input length; the chunk count, sector
    /// total, and chunk geometry are derived from it and injected into the
    /// metadata sections before they are written.
    pub fn start(mut self, total_size: u64) -> Result<EwfWriter<W>> {
        let w = &mut self.writer;

        SegmentHeader::new(1, compression_method::ZLIB).encode(&mut w.dest)?;
        w.dest
            .write_all(&vec![0u8; padding_for(SEGMENT_HEADER_SIZE)])?;

        let num_chunks = total_size.div_ceil(DEFAULT_CHUNK_SIZE as u64);

        w.device_information.set(DeviceInfoKey::BytesPerSector, "512");
        w.device_information.set(
            DeviceInfoKey::NumberOfSectors,
            &(num_chunks * 64).to_string(),
        );
        let (_, desc_n) = w.device_information.encode(&mut w.dest, 0)?;
        w.previous_descriptor = w.dest.position - desc_n as u64;

        w.case_data
            .set(CaseDataKey::ChunkCount, &num_chunks.to_string());
        w.case_data.set(CaseDataKey::SectorsPerChunk, "64");
        w.case_data.set(CaseDataKey::ErrorGranularity, "64");
        let (_, desc_n) = w.case_data.encode(&mut w.dest, w.previous_descriptor)?;
        w.previous_descriptor = w.dest.position - desc_n as u64;

        Ok(self.writer)
    }
}

/// Streaming writer for a single `.Ex01` segment
pub struct EwfWriter<W: Write> {
    dest: CountingWriter<W>,
    buf: Vec<u8>,
    compressor: ZlibCompressor,
    md5: Md5,
    sha1: Sha1,

    case_data: CaseDataSection,
    device_information: DeviceInformationSection,
    tables: Vec<TableSection>,
    data_size: u64,
    data_pad_size: u64,
    previous_descriptor: u64,

    chunk_size: usize,
    pub(crate) max_table_entries: u32,
}

impl<W: Write> EwfWriter<W> {
    /// Compress one full chunk (or store it raw), align, and index it
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let packed = self.compressor.compress(chunk)?;

        // Store raw whenever compression does not shrink the chunk
        let (bytes, flags): (&[u8], u32) = if packed.len() >= chunk.len() {
            (chunk, 0)
        } else {
            (&packed, data_flags::IS_COMPRESSED)
        };

        let position = self.dest.position;
        self.dest.write_all(bytes)?;
        self.data_size += bytes.len() as u64;

        let pad = padding_for(bytes.len());
        self.dest.write_all(&vec![0u8; pad])?;
        self.data_pad_size += pad as u64;

        push_chunk_entry(
            &mut self.tables,
            TableEntry {
                data_offset: position,
                size: bytes.len() as u32,
                flags,
            },
            self.max_table_entries,
        );

        self.md5.update(chunk);
        self.sha1.update(chunk);
        Ok(())
    }

    /// Finish the image: flush the final padded chunk, then emit the
    /// sector_data descriptor, the tables, both hashes, and `done`.
    ///
    /// Returns the sink.
    pub fn close(mut self) -> Result<W> {
        if !self.buf.is_empty() {
            let mut last = std::mem::take(&mut self.buf);
            pad_to(&mut last, self.chunk_size);
            self.write_chunk(&last)?;
        }

        // sector_data: descriptor only, covering chunk bytes + padding
        let (desc, _) = SectionDescriptor::encode(
            SectionType::SectorData,
            0,
            self.previous_descriptor,
            self.data_size + self.data_pad_size,
            self.data_pad_size as u32,
        );
        let desc_position = self.dest.position;
        self.dest.write_all(&desc)?;
        self.previous_descriptor = desc_position;

        for table in &self.tables {
            let (_, desc_n) = table.encode(&mut self.dest, self.previous_descriptor)?;
            self.previous_descriptor = self.dest.position - desc_n as u64;
        }

        let mut md5_section = Md5Section {
            hash: self.md5.finalize().into(),
            checksum: 0,
        };
        let (_, desc_n) = md5_section.encode(&mut self.dest, self.previous_descriptor)?;
        self.previous_descriptor = self.dest.position - desc_n as u64;

        let mut sha1_section = Sha1Section {
            hash: self.sha1.finalize().into(),
            checksum: 0,
        };
        let (_, desc_n) = sha1_section.encode(&mut self.dest, self.previous_descriptor)?;
        self.previous_descriptor = self.dest.position - desc_n as u64;

        let (done, _) = SectionDescriptor::encode(
            SectionType::Done,
            data_flags::HAS_CHECKSUM,
            self.previous_descriptor,
            0,
            0,
        );
        self.dest.write_all(&done)?;
        self.dest.flush()?;

        debug!(
            tables = self.tables.len(),
            data_bytes = self.data_size,
            pad_bytes = self.data_pad_size,
            "EVF2 image closed"
        );
        Ok(self.dest.inner)
    }
}

impl<W: Write> Write for EwfWriter<W> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evf2::reader::EwfReader;
    use crate::evf2::segment::Segment;
    use std::io::{Cursor, Read, Seek, SeekFrom};

    fn deterministic_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 131) % 251) as u8).collect()
    }

    /// High-entropy data that zlib cannot shrink
    fn incompressible_data(len: usize) -> Vec<u8> {
        let mut state = 0x2545F4914F6CDD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 32) as u8
            })
            .collect()
    }

    fn build_image(data: &[u8], max_entries: Option<u32>) -> Vec<u8> {
        let mut creator = create(Vec::new()).unwrap();
        creator.add_case_data(CaseDataKey::CaseNumber, "TEST-002");
        creator.add_case_data(CaseDataKey::ExaminerName, "Test Examiner");
        creator.add_device_information(DeviceInfoKey::DriveModel, "Virtual Test Drive");

        let mut writer = creator.start(data.len() as u64).unwrap();
        if let Some(n) = max_entries {
            writer.max_table_entries = n;
        }
        writer.write_all(data).unwrap();
        writer.close().unwrap()
    }

    #[test]
    fn test_round_trip_hello() {
        let image = build_image(b"HELLO", None);

        let mut reader = EwfReader::open(vec![Cursor::new(image)]).unwrap();
        assert_eq!(reader.size(), 32_768);
        assert_eq!(reader.chunk_size(), 32_768);

        let mut head = [0u8; 5];
        assert_eq!(reader.read_at(&mut head, 0).unwrap(), 5);
        assert_eq!(&head, b"HELLO");

        let mut tail = vec![0u8; 32_768 - 5];
        assert_eq!(reader.read_at(&mut tail, 5).unwrap(), tail.len());
        assert!(tail.iter().all(|&b| b == 0));

        let case = reader.case_data();
        assert_eq!(case.get("Case Number").map(String::as_str), Some("TEST-002"));
        assert_eq!(
            case.get("Number of Chunks").map(String::as_str),
            Some("1")
        );
        assert_eq!(
            case.get("Number of Sectors Per Chunk").map(String::as_str),
            Some("64")
        );
        assert_eq!(
            case.get("Error Granularity").map(String::as_str),
            Some("64")
        );

        let device = reader.device_information();
        assert_eq!(
            device.get("Bytes Per Sector").map(String::as_str),
            Some("512")
        );
        assert_eq!(
            device.get("Number of Sectors").map(String::as_str),
            Some("64")
        );
    }

    #[test]
    fn test_hashes_cover_padded_stream() {
        let data = b"HELLO";
        let image = build_image(data, None);

        let reader = EwfReader::open(vec![Cursor::new(image)]).unwrap();

        let mut padded = data.to_vec();
        pad_to(&mut padded, 32_768);
        let expect_md5: [u8; 16] = {
            let mut h = Md5::new();
            h.update(&padded);
            h.finalize().into()
        };
        let expect_sha1: [u8; 20] = {
            let mut h = Sha1::new();
            h.update(&padded);
            h.finalize().into()
        };

        assert_eq!(reader.md5_hash().unwrap().hash, expect_md5);
        assert_eq!(reader.sha1_hash().unwrap().hash, expect_sha1);
    }

    #[test]
    fn test_multi_table_split_and_cross_table_read() {
        let data = deterministic_data(3 * 32_768);
        let image = build_image(&data, Some(2));

        // Structural check: two tables, contiguous first-chunk numbers
        let mut segment = Segment::new(Cursor::new(image.clone())).unwrap();
        segment
            .decode(None, 0, crate::common::codec::decompress_zlib)
            .unwrap();
        assert_eq!(segment.tables.len(), 2);
        assert_eq!(segment.tables[0].first_chunk, 0);
        assert_eq!(segment.tables[0].num_entries, 2);
        assert_eq!(segment.tables[1].first_chunk, 2);
        assert_eq!(segment.tables[1].num_entries, 1);

        let mut reader = EwfReader::open(vec![Cursor::new(image)]).unwrap();
        let mut all = vec![0u8; data.len()];
        assert_eq!(reader.read_at(&mut all, 0).unwrap(), data.len());
        assert_eq!(all, data);

        let off = 2 * 32_768 + 123;
        let mut window = vec![0u8; 4096];
        assert_eq!(reader.read_at(&mut window, off as u64).unwrap(), 4096);
        assert_eq!(&window[..], &data[off..off + 4096]);
    }

    #[test]
    fn test_incompressible_chunks_stored_raw() {
        let data = incompressible_data(2 * 32_768);
        let image = build_image(&data, None);

        // Entries for random data must have the compressed flag clear and
        // hold the chunk verbatim.
        let mut cur = Cursor::new(image.clone());
        cur.seek(SeekFrom::End(-64)).unwrap();
        let table_desc = loop {
            let desc = SectionDescriptor::decode(&mut cur).unwrap();
            if desc.section_type == SectionType::SectorTable {
                break desc;
            }
            assert_ne!(desc.previous, 0, "no sector_table found");
            cur.set_position(desc.previous);
        };
        let mut table = TableSection::decode(&mut cur, &table_desc, 64).unwrap();
        let entries = table.entries(&mut cur).unwrap().to_vec();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.flags & data_flags::IS_COMPRESSED, 0);
            assert_eq!(entry.size, 32_768);
        }

        let mut reader = EwfReader::open(vec![Cursor::new(image)]).unwrap();
        let mut all = vec![0u8; data.len()];
        assert_eq!(reader.read_at(&mut all, 0).unwrap(), data.len());
        assert_eq!(all, data);
    }

    #[test]
    fn test_chunked_write_sweep() {
        let data = deterministic_data(100_000);

        for piece_size in [1024usize, 4096, 16_384, 65_536] {
            let creator = create(Vec::new()).unwrap();
            let mut writer = creator.start(data.len() as u64).unwrap();
            for piece in data.chunks(piece_size) {
                writer.write_all(piece).unwrap();
            }
            let image = writer.close().unwrap();

            let mut reader = EwfReader::open(vec![Cursor::new(image)]).unwrap();
            let mut all = vec![0u8; data.len()];
            reader.read_at(&mut all, 0).unwrap();
            assert_eq!(all, data, "piece size {}", piece_size);
        }
    }

    #[test]
    fn test_seek_and_sequential_read() {
        let data = deterministic_data(2 * 32_768);
        let image = build_image(&data, None);
        let mut reader = EwfReader::open(vec![Cursor::new(image)]).unwrap();

        reader.seek(SeekFrom::Start(1024)).unwrap();
        let mut buf = [0u8; 512];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[1024..1536]);

        assert!(reader.seek(SeekFrom::Current(-1_000_000)).is_err());
    }

    #[test]
    fn test_multi_segment_read_across_boundary() {
        let data = deterministic_data(2 * 32_768);

        // Segment 1 declares the total size but holds only the first chunk.
        let creator = create(Vec::new()).unwrap();
        let mut writer = creator.start(data.len() as u64).unwrap();
        writer.write_all(&data[..32_768]).unwrap();
        let seg1 = writer.close().unwrap();

        let creator = create(Vec::new()).unwrap();
        let mut writer = creator.start(32_768).unwrap();
        writer.write_all(&data[32_768..]).unwrap();
        let mut seg2 = writer.close().unwrap();

        // Mark the second file as segment 2 (u16 at offset 12)
        seg2[12] = 2;

        // Opened in reverse order; the reader sorts by segment number.
        let mut reader = EwfReader::open(vec![Cursor::new(seg2), Cursor::new(seg1)]).unwrap();
        assert_eq!(reader.size(), 2 * 32_768);

        let off = 32_768 - 100;
        let mut window = vec![0u8; 200];
        assert_eq!(reader.read_at(&mut window, off as u64).unwrap(), 200);
        assert_eq!(&window[..], &data[off..off + 200]);
    }
}
