//! EVF1 `volume`/`disk` and `data` sections
//!
//! Both carry the media geometry. The `volume` payload comes in two
//! historical shapes: the 1052-byte variant (recognized by a payload size of
//! 0x41C) and a 128-byte variant used by early tools. The writer emits the
//! 1052-byte shape and patches the chunk count back in on close.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::common::binary::{read_bytes, validated_body, write_with_sum, ByteBuf, ByteReader};
use crate::common::{DEFAULT_SECTORS_PER_CHUNK, DEFAULT_SECTOR_SIZE};
use crate::error::Result;

use super::types::{
    media_flags, CompressionLevel, MediaType, SectionDescriptor, DESCRIPTOR_SIZE, SECTION_DATA,
    SECTION_VOLUME,
};

/// Payload size of the 1052-byte volume variant
const VOLUME_DATA_SIZE: u64 = 0x41C;
/// Payload size of the early spec variant
const VOLUME_SPEC_SIZE: u64 = 128;

/// The 1052-byte media geometry record shared by `volume` and `data`
#[derive(Debug, Clone)]
pub struct VolumeData {
    pub media_type: u8,
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub total_sector_count: u64,
    pub num_cylinders: u32,
    pub num_heads: u32,
    pub num_sectors: u32,
    pub media_flags: u8,
    pub palm_start_sector: u32,
    pub smart_start_sector: u32,
    pub compression_level: u8,
    pub error_granularity: u32,
    pub uuid: [u8; 16],
    pub checksum: u32,
}

impl VolumeData {
    /// Geometry the writer starts from: fixed media, 64 x 512 chunks
    pub fn default_volume() -> Self {
        Self {
            media_type: MediaType::Fixed as u8,
            chunk_count: 0,
            sectors_per_chunk: DEFAULT_SECTORS_PER_CHUNK,
            bytes_per_sector: DEFAULT_SECTOR_SIZE,
            total_sector_count: 0,
            num_cylinders: 0,
            num_heads: 0,
            num_sectors: 0,
            media_flags: media_flags::IMAGE,
            palm_start_sector: 0,
            smart_start_sector: 0,
            compression_level: CompressionLevel::None as u8,
            error_granularity: 0,
            uuid: [0u8; 16],
            checksum: 0,
        }
    }

    pub fn increment_chunk_count(&mut self) {
        self.chunk_count += 1;
        self.total_sector_count = u64::from(self.chunk_count) * u64::from(self.sectors_per_chunk);
    }

    /// Serialize without the trailing checksum (1048 bytes)
    fn body(&self) -> Vec<u8> {
        let mut buf = ByteBuf::with_capacity(VOLUME_DATA_SIZE as usize);
        buf.u8(self.media_type)
            .zeros(3)
            .u32(self.chunk_count)
            .u32(self.sectors_per_chunk)
            .u32(self.bytes_per_sector)
            .u64(self.total_sector_count)
            .u32(self.num_cylinders)
            .u32(self.num_heads)
            .u32(self.num_sectors)
            .u8(self.media_flags)
            .zeros(3)
            .u32(self.palm_start_sector)
            .zeros(4)
            .u32(self.smart_start_sector)
            .u8(self.compression_level)
            .zeros(3)
            .u32(self.error_granularity)
            .zeros(4)
            .bytes(&self.uuid)
            .zeros(963)
            .zeros(5);
        buf.into_inner()
    }

    fn write_to<W: Write>(&mut self, w: &mut W) -> Result<()> {
        let (_, sum) = write_with_sum(w, &self.body())?;
        self.checksum = sum;
        Ok(())
    }

    fn parse(raw: &[u8]) -> Result<Self> {
        let body = validated_body(raw, "volume section")?;
        let mut rd = ByteReader::new(body);
        let media_type = rd.u8()?;
        rd.skip(3)?;
        let chunk_count = rd.u32()?;
        let sectors_per_chunk = rd.u32()?;
        let bytes_per_sector = rd.u32()?;
        let total_sector_count = rd.u64()?;
        let num_cylinders = rd.u32()?;
        let num_heads = rd.u32()?;
        let num_sectors = rd.u32()?;
        let media_flags = rd.u8()?;
        rd.skip(3)?;
        let palm_start_sector = rd.u32()?;
        rd.skip(4)?;
        let smart_start_sector = rd.u32()?;
        let compression_level = rd.u8()?;
        rd.skip(3)?;
        let error_granularity = rd.u32()?;
        rd.skip(4)?;
        let uuid = rd.array::<16>()?;
        let checksum = u32::from_le_bytes([
            raw[raw.len() - 4],
            raw[raw.len() - 3],
            raw[raw.len() - 2],
            raw[raw.len() - 1],
        ]);

        Ok(Self {
            media_type,
            chunk_count,
            sectors_per_chunk,
            bytes_per_sector,
            total_sector_count,
            num_cylinders,
            num_heads,
            num_sectors,
            media_flags,
            palm_start_sector,
            smart_start_sector,
            compression_level,
            error_granularity,
            uuid,
            checksum,
        })
    }
}

/// The 128-byte early volume variant, read-only
#[derive(Debug, Clone)]
pub struct VolumeSpec {
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub total_sector_count: u32,
}

impl VolumeSpec {
    fn parse(raw: &[u8]) -> Result<Self> {
        let body = validated_body(raw, "volume section")?;
        let mut rd = ByteReader::new(body);
        rd.skip(4)?; // reserved
        let chunk_count = rd.u32()?;
        let sectors_per_chunk = rd.u32()?;
        let bytes_per_sector = rd.u32()?;
        let total_sector_count = rd.u32()?;

        Ok(Self {
            chunk_count,
            sectors_per_chunk,
            bytes_per_sector,
            total_sector_count,
        })
    }
}

/// Either volume payload variant, with uniform geometry accessors
#[derive(Debug, Clone)]
pub enum Volume {
    Data(VolumeData),
    Spec(VolumeSpec),
}

impl Volume {
    pub fn chunk_count(&self) -> u32 {
        match self {
            Volume::Data(v) => v.chunk_count,
            Volume::Spec(v) => v.chunk_count,
        }
    }

    pub fn sectors_per_chunk(&self) -> u32 {
        match self {
            Volume::Data(v) => v.sectors_per_chunk,
            Volume::Spec(v) => v.sectors_per_chunk,
        }
    }

    pub fn bytes_per_sector(&self) -> u32 {
        match self {
            Volume::Data(v) => v.bytes_per_sector,
            Volume::Spec(v) => v.bytes_per_sector,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.sectors_per_chunk() * self.bytes_per_sector()
    }

    pub fn decode<R: Read + Seek>(fh: &mut R, section: &SectionDescriptor) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;

        if section.payload_size() == VOLUME_DATA_SIZE {
            let raw = read_bytes(fh, VOLUME_DATA_SIZE as usize)?;
            Ok(Volume::Data(VolumeData::parse(&raw)?))
        } else {
            // Early spec variant; historical payloads vary in length but
            // the geometry fields sit at the front either way.
            let len = section.payload_size().min(VOLUME_SPEC_SIZE).max(24);
            let raw = read_bytes(fh, len as usize)?;
            Ok(Volume::Spec(VolumeSpec::parse(&raw)?))
        }
    }
}

/// Writer-side `volume` section with placeholder-then-patch encoding
#[derive(Debug)]
pub struct VolumeSection {
    pub data: VolumeData,
    data_position: u64,
}

impl VolumeSection {
    pub fn new(data: VolumeData) -> Self {
        Self {
            data,
            data_position: 0,
        }
    }

    /// First call writes descriptor and payload at the current position and
    /// remembers the payload offset; later calls rewrite the payload in
    /// place and restore the stream position.
    pub fn encode<W: Write + Seek>(&mut self, w: &mut W) -> Result<()> {
        let current = w.stream_position()?;

        if self.data_position == 0 {
            let size = VOLUME_DATA_SIZE + DESCRIPTOR_SIZE;
            let (desc, _) = SectionDescriptor::encode(SECTION_VOLUME, current + size, size);
            w.write_all(&desc)?;
            self.data_position = current + DESCRIPTOR_SIZE;
            self.data.write_to(w)?;
            return Ok(());
        }

        w.seek(SeekFrom::Start(self.data_position))?;
        self.data.write_to(w)?;
        w.seek(SeekFrom::Start(current))?;
        Ok(())
    }
}

/// Terminal `data` section: the same 1052-byte geometry record
#[derive(Debug)]
pub struct DataSection {
    pub data: VolumeData,
}

impl DataSection {
    pub fn decode<R: Read + Seek>(fh: &mut R, section: &SectionDescriptor) -> Result<Self> {
        fh.seek(SeekFrom::Start(section.data_offset))?;
        let raw = read_bytes(fh, VOLUME_DATA_SIZE as usize)?;
        Ok(Self {
            data: VolumeData::parse(&raw)?,
        })
    }

    pub fn encode<W: Write + Seek>(&mut self, w: &mut W) -> Result<()> {
        let current = w.stream_position()?;
        let size = VOLUME_DATA_SIZE + DESCRIPTOR_SIZE;
        let (desc, _) = SectionDescriptor::encode(SECTION_DATA, current + size, size);
        w.write_all(&desc)?;
        self.data.write_to(w)
    }
}
