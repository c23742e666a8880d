//! EVF2 dialect (`.Ex01`)
//!
//! Reverse-linked sections typed by numeric tag, 16-byte aligned, with a
//! per-chunk compression decision and selectable compression method.

pub mod hash;
pub mod metadata;
pub mod reader;
pub mod segment;
pub mod table;
pub mod types;
pub mod writer;

pub use metadata::{CaseDataKey, DeviceInfoKey};
pub use reader::EwfReader;
pub use writer::{create, EwfCreator, EwfWriter};
