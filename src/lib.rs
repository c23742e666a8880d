//! ewfio - read/write library for the Expert Witness Compression Format
//!
//! EWF is a forensic disk-image container storing bit-identical copies of
//! storage media together with acquisition metadata, integrity hashes, and
//! a random-access chunk index. Two on-disk dialects are supported:
//!
//! - **EVF1** (legacy, `.E01`): forward-linked sections typed by ASCII
//!   name; chunk data always zlib-compressed.
//! - **EVF2** (`.Ex01`): reverse-linked sections typed by numeric tag,
//!   16-byte aligned, per-chunk compression decision, selectable
//!   compression method (none / zlib / bzip2).
//!
//! ## Reading
//!
//! ```rust,ignore
//! let mut image = ewfio::open_path(Path::new("evidence.E01"))?;
//! println!("{} bytes, chunk size {}", image.size(), image.chunk_size());
//! let mut buf = vec![0u8; 4096];
//! image.read_at(&mut buf, 0)?;
//! ```
//!
//! ## Writing
//!
//! ```rust,ignore
//! let mut creator = ewfio::evf2::create(File::create("out.Ex01")?)?;
//! creator.add_case_data(CaseDataKey::CaseNumber, "CASE-1");
//! let mut writer = creator.start(input_len)?;
//! io::copy(&mut input, &mut writer)?;
//! writer.close()?;
//! ```

pub mod common;
pub mod error;
pub mod evf1;
pub mod evf2;
pub mod logging;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;

pub use error::{EwfError, Result};

/// The two on-disk dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dialect {
    Evf1,
    Evf2,
}

/// Sniff the dialect from the 8-byte segment signature
///
/// The stream position is restored to the start afterwards.
pub fn detect<R: Read + Seek>(source: &mut R) -> Result<Dialect> {
    source.seek(SeekFrom::Start(0))?;
    let mut sig = [0u8; 8];
    source.read_exact(&mut sig)?;
    source.seek(SeekFrom::Start(0))?;

    if &sig == evf1::types::EVF_SIGNATURE || &sig == evf1::types::LVF_SIGNATURE {
        Ok(Dialect::Evf1)
    } else if &sig == evf2::types::EVF2_SIGNATURE || &sig == evf2::types::LVF2_SIGNATURE {
        Ok(Dialect::Evf2)
    } else {
        Err(EwfError::InvalidSignature)
    }
}

/// Acquisition metadata of an opened image
///
/// EVF1 images carry one flat table; EVF2 splits it into `case_data` and
/// `device_information`.
#[derive(Debug, Clone, Serialize)]
pub enum Metadata {
    Flat(HashMap<String, String>),
    Split {
        case_data: HashMap<String, String>,
        device_information: HashMap<String, String>,
    },
}

/// Dialect-independent image reader
pub enum EwfImage<R> {
    Evf1(evf1::EwfReader<R>),
    Evf2(evf2::EwfReader<R>),
}

impl<R: Read + Seek> EwfImage<R> {
    /// Open an image from one source per segment file, auto-detecting the
    /// dialect from the first signature
    pub fn open(mut sources: Vec<R>) -> Result<Self> {
        let first = sources.first_mut().ok_or_else(|| {
            EwfError::InvariantViolation("no segment sources given".to_string())
        })?;

        match detect(first)? {
            Dialect::Evf1 => Ok(EwfImage::Evf1(evf1::EwfReader::open(sources)?)),
            Dialect::Evf2 => Ok(EwfImage::Evf2(evf2::EwfReader::open(sources)?)),
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            EwfImage::Evf1(_) => Dialect::Evf1,
            EwfImage::Evf2(_) => Dialect::Evf2,
        }
    }

    /// Logical image size: always a multiple of the chunk size
    pub fn size(&self) -> u64 {
        match self {
            EwfImage::Evf1(r) => r.size(),
            EwfImage::Evf2(r) => r.size(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        match self {
            EwfImage::Evf1(r) => r.chunk_size(),
            EwfImage::Evf2(r) => r.chunk_size(),
        }
    }

    pub fn segment_count(&self) -> usize {
        match self {
            EwfImage::Evf1(r) => r.segment_count(),
            EwfImage::Evf2(r) => r.segment_count(),
        }
    }

    /// Read into `buf` at absolute offset `off`; returns bytes read
    pub fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize> {
        match self {
            EwfImage::Evf1(r) => r.read_at(buf, off),
            EwfImage::Evf2(r) => r.read_at(buf, off),
        }
    }

    pub fn metadata(&self) -> Metadata {
        match self {
            EwfImage::Evf1(r) => Metadata::Flat(r.metadata()),
            EwfImage::Evf2(r) => Metadata::Split {
                case_data: r.case_data(),
                device_information: r.device_information(),
            },
        }
    }
}

impl<R: Read + Seek> Read for EwfImage<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            EwfImage::Evf1(r) => r.read(buf),
            EwfImage::Evf2(r) => r.read(buf),
        }
    }
}

impl<R: Read + Seek> Seek for EwfImage<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            EwfImage::Evf1(r) => r.seek(pos),
            EwfImage::Evf2(r) => r.seek(pos),
        }
    }
}

/// Open an image by path, discovering sibling segment files
/// (`.E02`, `.E03`, ... / `.Ex02`, ...) automatically
pub fn open_path(path: &Path) -> Result<EwfImage<File>> {
    let paths = common::segments::discover_segments(path)?;
    let sources = paths
        .iter()
        .map(File::open)
        .collect::<std::io::Result<Vec<_>>>()?;
    EwfImage::open(sources)
}
