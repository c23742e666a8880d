//! Error types for EWF container operations

use std::fmt;
use std::io;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, EwfError>;

/// Errors that can occur while reading or writing EWF images
#[derive(Debug)]
pub enum EwfError {
    /// Segment header does not match any known EVF1/EVF2 signature
    InvalidSignature,
    /// Section descriptor carries a type outside the recognized set
    UnknownSection(String),
    /// Adler-32 mismatch in a descriptor, header block, or table
    CorruptChecksum(&'static str),
    /// Metadata section contains a key that is not in the fixed catalog
    UnknownMediaKey(String),
    /// EVF1 last-chunk size cannot be resolved against table bounds
    UnknownChunkSize,
    /// zlib/bzip2 encode or decode failure
    Compression(String),
    /// Seek below zero, or a chunk/table index past the addressable range
    OutOfRange(String),
    /// Cross-field mismatch, e.g. declared chunk count vs. table contents
    InvariantViolation(String),
    /// Underlying source/sink error
    Io(io::Error),
}

impl fmt::Display for EwfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EwfError::InvalidSignature => write!(f, "not a valid EWF segment signature"),
            EwfError::UnknownSection(t) => write!(f, "unknown section type: {}", t),
            EwfError::CorruptChecksum(what) => write!(f, "checksum mismatch in {}", what),
            EwfError::UnknownMediaKey(k) => write!(f, "media identifier is unknown: {}", k),
            EwfError::UnknownChunkSize => write!(f, "unknown size of last chunk"),
            EwfError::Compression(e) => write!(f, "compression error: {}", e),
            EwfError::OutOfRange(e) => write!(f, "out of range: {}", e),
            EwfError::InvariantViolation(e) => write!(f, "invariant violation: {}", e),
            EwfError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for EwfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EwfError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EwfError {
    fn from(err: io::Error) -> Self {
        EwfError::Io(err)
    }
}

impl From<EwfError> for io::Error {
    fn from(err: EwfError) -> Self {
        match err {
            EwfError::Io(e) => e,
            EwfError::OutOfRange(e) => io::Error::new(io::ErrorKind::InvalidInput, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
