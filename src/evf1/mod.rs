//! Legacy EVF1 dialect (`.E01`)
//!
//! Forward-linked sections typed by ASCII name; chunk data is always
//! zlib-compressed and indexed by 31-bit relative offsets.

pub mod hash;
pub mod header;
pub mod reader;
pub mod segment;
pub mod table;
pub mod types;
pub mod volume;
pub mod writer;

pub use header::MediaInfoKey;
pub use reader::EwfReader;
pub use types::{CompressionLevel, MediaType};
pub use writer::{create, EwfCreator, EwfWriter};
