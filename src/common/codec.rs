// Compression backends and alignment helpers
//
// EVF1 chunks and all metadata sections are zlib; EVF2 additionally allows
// "none" and bzip2, selected by the segment header's compression method.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{EwfError, Result};

/// Decompressor selected from the EVF2 compression method field
pub type Decompressor = fn(&[u8]) -> Result<Vec<u8>>;

/// Pass-through for compression method "none"
pub fn skip_decompress(val: &[u8]) -> Result<Vec<u8>> {
    Ok(val.to_vec())
}

pub fn decompress_zlib(val: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(val);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::Compression(e.to_string()))?;
    Ok(out)
}

pub fn decompress_bzip2(val: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = bzip2::read::BzDecoder::new(val);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::Compression(e.to_string()))?;
    Ok(out)
}

/// One-shot best-compression zlib, for metadata sections
pub fn compress_zlib(val: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(val)
        .and_then(|_| encoder.finish())
        .map_err(|e| EwfError::Compression(e.to_string()))
}

/// Reusable best-compression zlib encoder
///
/// One instance per writer, reset between chunks; must not be shared
/// between writers.
pub struct ZlibCompressor {
    encoder: ZlibEncoder<Vec<u8>>,
}

impl ZlibCompressor {
    pub fn new() -> Self {
        Self {
            encoder: ZlibEncoder::new(Vec::new(), Compression::best()),
        }
    }

    /// Compress one buffer into a fresh zlib stream
    pub fn compress(&mut self, val: &[u8]) -> Result<Vec<u8>> {
        self.encoder
            .write_all(val)
            .map_err(|e| EwfError::Compression(e.to_string()))?;
        // reset() finishes the current stream into the old buffer and swaps it out
        self.encoder
            .reset(Vec::new())
            .map_err(|e| EwfError::Compression(e.to_string()))
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// 16-byte Alignment (EVF2)
// =============================================================================

/// Number of zero bytes needed to round `len` up to a 16-byte boundary
pub fn padding_for(len: usize) -> usize {
    (16 - (len % 16)) % 16
}

/// Append zero padding to a 16-byte boundary, returning the pad length
pub fn align_to_16(buf: &mut Vec<u8>) -> usize {
    let pad = padding_for(buf.len());
    buf.resize(buf.len() + pad, 0);
    pad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_round_trip() {
        let data = b"The quick brown fox jumps over the lazy dog".repeat(100);
        let mut compressor = ZlibCompressor::new();

        let packed = compressor.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress_zlib(&packed).unwrap(), data);

        // The encoder is reusable across independent streams
        let packed2 = compressor.compress(b"second stream").unwrap();
        assert_eq!(decompress_zlib(&packed2).unwrap(), b"second stream");
    }

    #[test]
    fn test_zlib_ignores_trailing_alignment_zeros() {
        let mut packed = compress_zlib(b"aligned payload").unwrap();
        align_to_16(&mut packed);
        assert_eq!(decompress_zlib(&packed).unwrap(), b"aligned payload");
    }

    #[test]
    fn test_bzip2_decode() {
        let data = b"bzip2 is only ever decoded, never produced, by this crate".repeat(20);
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
        encoder.write_all(&data).unwrap();
        let packed = encoder.finish().unwrap();

        assert_eq!(decompress_bzip2(&packed).unwrap(), data);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(matches!(
            decompress_zlib(&[0xde, 0xad, 0xbe, 0xef]),
            Err(EwfError::Compression(_))
        ));
    }

    #[test]
    fn test_padding_for() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(16), 0);
        assert_eq!(padding_for(20), 12);
        assert_eq!(padding_for(31), 1);
    }
}
