// Shared binary primitives for the EWF container codec
//
// Provides consistent little-endian reading/writing and the checksummed
// record convention: every self-describing record ends with an Adler-32 of
// its preceding bytes.

use std::io::{Read, Write};

use adler32::RollingAdler32;

use crate::error::{EwfError, Result};

/// Size of the trailing Adler-32 field on checksummed records
pub const CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Stream Read Functions (from current position)
// =============================================================================

/// Read a single byte at the current position
pub fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Read u16 little-endian at the current position
pub fn read_u16_le<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Read u32 little-endian at the current position
pub fn read_u32_le<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read u64 little-endian at the current position
pub fn read_u64_le<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read exactly `length` bytes at the current position
pub fn read_bytes<R: Read>(r: &mut R, length: usize) -> Result<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; length];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

// =============================================================================
// Checksummed Records
// =============================================================================

/// Compute the Adler-32 checksum of a byte slice
pub fn adler32_of(data: &[u8]) -> u32 {
    RollingAdler32::from_buffer(data).hash()
}

/// Write `body` followed by its little-endian Adler-32
///
/// Returns (bytes written, checksum) so callers can record the sum for
/// back-patching or descriptor bookkeeping.
pub fn write_with_sum<W: Write>(w: &mut W, body: &[u8]) -> Result<(usize, u32)> {
    let sum = adler32_of(body);
    w.write_all(body)?;
    w.write_all(&sum.to_le_bytes())?;
    Ok((body.len() + CHECKSUM_SIZE, sum))
}

/// Validate that a record's trailing 4 bytes are the Adler-32 of the rest
///
/// Returns the body without the checksum.
pub fn validated_body<'a>(record: &'a [u8], what: &'static str) -> Result<&'a [u8]> {
    if record.len() < CHECKSUM_SIZE {
        return Err(EwfError::CorruptChecksum(what));
    }
    let (body, sum_bytes) = record.split_at(record.len() - CHECKSUM_SIZE);
    let stored = u32::from_le_bytes([sum_bytes[0], sum_bytes[1], sum_bytes[2], sum_bytes[3]]);
    if adler32_of(body) != stored {
        return Err(EwfError::CorruptChecksum(what));
    }
    Ok(body)
}

// =============================================================================
// Fixed-Record Cursors
// =============================================================================

/// Sequential little-endian reader over an in-memory record
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(EwfError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "record too short",
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let b = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }
}

/// Sequential little-endian builder for an in-memory record
#[derive(Default)]
pub struct ByteBuf(Vec<u8>);

impl ByteBuf {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self(Vec::with_capacity(cap))
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.0.extend_from_slice(v);
        self
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.0.resize(self.0.len() + n, 0);
        self
    }

    /// Append the Adler-32 of everything buffered so far, returning the sum
    pub fn finish_with_sum(mut self) -> (Vec<u8>, u32) {
        let sum = adler32_of(&self.0);
        self.0.extend_from_slice(&sum.to_le_bytes());
        (self.0, sum)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Convert null-terminated bytes to a string
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

/// Copy string bytes into a fixed-size, zero-padded array
pub fn string_to_array<const N: usize>(value: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = value.as_bytes();
    let len = bytes.len().min(N);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// Zero-pad a buffer up to `target_len` (no-op if already long enough)
pub fn pad_to(buf: &mut Vec<u8>, target_len: usize) {
    if buf.len() < target_len {
        buf.resize(target_len, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_integers() {
        let data = [
            0x42, // u8
            0x34, 0x12, // u16
            0x78, 0x56, 0x34, 0x12, // u32
            0xEF, 0xCD, 0xAB, 0x90, 0x78, 0x56, 0x34, 0x12, // u64
        ];
        let mut cur = Cursor::new(&data[..]);

        assert_eq!(read_u8(&mut cur).unwrap(), 0x42);
        assert_eq!(read_u16_le(&mut cur).unwrap(), 0x1234);
        assert_eq!(read_u32_le(&mut cur).unwrap(), 0x12345678);
        assert_eq!(read_u64_le(&mut cur).unwrap(), 0x123456789ABCDEF);
    }

    #[test]
    fn test_write_with_sum_round_trip() {
        let body = b"EWF record body";
        let mut out = Vec::new();
        let (n, sum) = write_with_sum(&mut out, body).unwrap();

        assert_eq!(n, body.len() + CHECKSUM_SIZE);
        assert_eq!(sum, adler32_of(body));
        assert_eq!(validated_body(&out, "test").unwrap(), body);
    }

    #[test]
    fn test_validated_body_rejects_corruption() {
        let mut out = Vec::new();
        write_with_sum(&mut out, b"intact").unwrap();
        out[0] ^= 0xFF;

        match validated_body(&out, "test record") {
            Err(EwfError::CorruptChecksum("test record")) => {}
            other => panic!("expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn test_byte_buf_reader_symmetry() {
        let mut buf = ByteBuf::new();
        buf.u8(7).u16(0x0102).u32(0xAABBCCDD).u64(42).bytes(b"xyz");
        let bytes = buf.into_inner();

        let mut rd = ByteReader::new(&bytes);
        assert_eq!(rd.u8().unwrap(), 7);
        assert_eq!(rd.u16().unwrap(), 0x0102);
        assert_eq!(rd.u32().unwrap(), 0xAABBCCDD);
        assert_eq!(rd.u64().unwrap(), 42);
        assert_eq!(&rd.array::<3>().unwrap(), b"xyz");
        assert!(rd.u8().is_err());
    }

    #[test]
    fn test_bytes_to_string() {
        assert_eq!(bytes_to_string(b"table\x00\x00\x00"), "table");
        assert_eq!(bytes_to_string(b"no null"), "no null");
    }
}
