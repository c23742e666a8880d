// Segment file discovery for multi-segment EWF images
//
// Handles both naming series:
// - EVF1: image.E01, image.E02, ..., image.E99, then image.EAA...
// - EVF2: image.Ex01, image.Ex02, ...

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{EwfError, Result};

/// Discover all segment files of an EWF set, starting from the first segment
///
/// The given path is always the first element of the result. Sibling
/// segments are probed by direct path construction with a lowercase
/// fallback; the series stops at the first gap.
pub fn discover_segments(first: &Path) -> Result<Vec<PathBuf>> {
    debug!(path = %first.display(), "Discovering EWF segments");

    let parent = first.parent().unwrap_or(Path::new("."));
    let stem = first
        .file_stem()
        .ok_or_else(|| EwfError::OutOfRange("path has no file name".to_string()))?
        .to_string_lossy()
        .to_string();
    let ext = first
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let v2_series = ext.to_lowercase().starts_with("ex");

    let mut paths = vec![first.to_path_buf()];

    for i in 2..=999u32 {
        let name = segment_name(&stem, i, v2_series);
        let candidate = parent.join(&name);
        if candidate.exists() {
            trace!(segment = i, path = %candidate.display(), "Found segment");
            paths.push(candidate);
            continue;
        }

        let lower = parent.join(name.to_lowercase());
        if lower.exists() {
            trace!(segment = i, path = %lower.display(), "Found segment (lowercase)");
            paths.push(lower);
            continue;
        }

        break;
    }

    debug!(segment_count = paths.len(), "EWF segments discovered");
    Ok(paths)
}

/// Build the conventional file name of segment `number` (1-based)
fn segment_name(stem: &str, number: u32, v2_series: bool) -> String {
    if v2_series {
        return format!("{}.Ex{:02}", stem, number);
    }
    if number <= 99 {
        format!("{}.E{:02}", stem, number)
    } else {
        // After E99 the extension continues alphabetically: EAA, EAB, ...
        let n = number - 100;
        let first = b'A' + (n / 26) as u8;
        let second = b'A' + (n % 26) as u8;
        format!("{}.E{}{}", stem, first as char, second as char)
    }
}

/// Total on-disk size of a discovered segment set
pub fn total_segment_size(paths: &[PathBuf]) -> Result<u64> {
    let mut total = 0u64;
    for p in paths {
        total += fs::metadata(p)?.len();
    }
    Ok(total)
}
