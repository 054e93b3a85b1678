//! Free-space guard run before any byte is written.
//!
//! Detection failures never block a run: if no method can read the free
//! space, the check reports an unlimited amount and logs the anomaly.

use std::path::Path;
use tracing::{debug, warn};

/// Reported when free space cannot be determined.
pub const UNKNOWN_AVAILABLE: u64 = u64::MAX;

/// Outcome of a space check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceCheck {
    pub sufficient: bool,
    pub available_bytes: u64,
    pub required_bytes: u64,
}

/// Source of free-space figures for a destination.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to the current user at `path`, or `None` if unknown.
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Probe backed by the filesystem statistics of the volume holding the path.
///
/// Tries the user-available figure at the path, then at the nearest existing
/// ancestor (the destination often does not exist yet), then the raw free
/// figure of that ancestor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|candidate| candidate.exists())
}

impl SpaceProbe for FsSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        match fs2::available_space(path) {
            Ok(bytes) => return Some(bytes),
            Err(err) => debug!("available_space({}) failed: {}", path.display(), err),
        }

        let existing = nearest_existing(path)?;
        match fs2::available_space(existing) {
            Ok(bytes) => return Some(bytes),
            Err(err) => debug!("available_space({}) failed: {}", existing.display(), err),
        }

        match fs2::free_space(existing) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                debug!("free_space({}) failed: {}", existing.display(), err);
                None
            }
        }
    }
}

/// Compare `required_bytes` against the space available at `destination`.
pub fn check_space(probe: &dyn SpaceProbe, destination: &Path, required_bytes: u64) -> SpaceCheck {
    let available_bytes = probe.available_bytes(destination).unwrap_or_else(|| {
        warn!(
            "Could not determine free space at {}; continuing without a space check",
            destination.display()
        );
        UNKNOWN_AVAILABLE
    });
    SpaceCheck {
        sufficient: required_bytes <= available_bytes,
        available_bytes,
        required_bytes,
    }
}

/// Human readable byte count, e.g. `1.50 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
