// Shared primitives for both EWF dialects

pub mod binary;
pub mod codec;
pub mod segments;
pub mod text;

pub use binary::{read_u16_le, read_u32_le, read_u64_le, read_u8, write_with_sum};
pub use codec::{decompress_bzip2, decompress_zlib, skip_decompress, Decompressor, ZlibCompressor};
pub use segments::discover_segments;
pub use text::MetadataTable;

/// Unit of compression: 64 sectors of 512 bytes
pub const DEFAULT_CHUNK_SIZE: usize = 32_768;
/// Smallest addressable unit exposed through the reader
pub const DEFAULT_SECTOR_SIZE: u32 = 512;
/// Chunk geometry implied by the defaults above
pub const DEFAULT_SECTORS_PER_CHUNK: u32 = 64;
/// Chunk entries per table section before the writer splits
pub const DEFAULT_MAX_TABLE_ENTRIES: u32 = 16_375;
