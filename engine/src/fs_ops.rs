//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Copying a single file in chunks with progress, timeout and cancellation
//! - Preserving timestamps and permissions best-effort
//! - Creating parent directories
//! - Removing directory trees, clearing read-only flags when needed

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::{CopyError, PruneFailure};

/// Reference transfer chunk size.
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Per-file transfer limits.
#[derive(Debug, Clone, Copy)]
pub struct CopyLimits {
    pub chunk_size: usize,
    /// `Duration::ZERO` disables the timeout
    pub timeout: Duration,
}

impl Default for CopyLimits {
    fn default() -> Self {
        CopyLimits {
            chunk_size: COPY_CHUNK_SIZE,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Copy a file from source to destination with metadata preservation.
///
/// Data moves in `limits.chunk_size` chunks; `on_bytes` receives each chunk's
/// length as soon as it is written. Between chunks the cancel token and the
/// elapsed time are checked. Parent directories of `dst` are created first.
///
/// On any failure the partially written destination is removed.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// `CopyError::Timeout` when the transfer exceeds `limits.timeout`,
/// `CopyError::Cancelled` when the token fires, `CopyError::Failed` for I/O errors.
pub fn copy_file(
    src: &Path,
    dst: &Path,
    limits: &CopyLimits,
    cancel: &CancelToken,
    on_bytes: &mut dyn FnMut(u64),
) -> Result<u64, CopyError> {
    let failed = |source: io::Error| CopyError::Failed {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source,
    };

    ensure_parent_dir_exists(dst).map_err(failed)?;

    let mut src_file = fs::File::open(src).map_err(failed)?;
    let src_metadata = src_file.metadata().map_err(failed)?;
    let mut dst_file = fs::File::create(dst).map_err(failed)?;

    let result = transfer(&mut src_file, &mut dst_file, src, limits, cancel, on_bytes)
        .and_then(|copied| dst_file.flush().map(|_| copied).map_err(TransferError::Io));
    drop(dst_file);

    match result {
        Ok(copied) => {
            copy_metadata(&src_metadata, dst);
            Ok(copied)
        }
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(dst) {
                debug!("Could not remove partial file {}: {}", dst.display(), remove_err);
            }
            Err(match err {
                TransferError::Io(source) => failed(source),
                TransferError::Timeout => CopyError::Timeout {
                    path: src.to_path_buf(),
                    limit: limits.timeout,
                },
                TransferError::Cancelled => CopyError::Cancelled,
            })
        }
    }
}

enum TransferError {
    Io(io::Error),
    Timeout,
    Cancelled,
}

fn transfer(
    reader: &mut impl Read,
    writer: &mut impl Write,
    src: &Path,
    limits: &CopyLimits,
    cancel: &CancelToken,
    on_bytes: &mut dyn FnMut(u64),
) -> Result<u64, TransferError> {
    let started = Instant::now();
    let mut buffer = vec![0u8; limits.chunk_size.max(1)];
    let mut copied = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if !limits.timeout.is_zero() && started.elapsed() > limits.timeout {
            warn!("Copy of {} timed out after {:?}", src.display(), limits.timeout);
            return Err(TransferError::Timeout);
        }

        let read = match reader.read(&mut buffer) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::Io(e)),
        };
        writer.write_all(&buffer[..read]).map_err(TransferError::Io)?;
        copied += read as u64;
        on_bytes(read as u64);
    }
}

/// Best-effort copy of access/modification times and permission bits.
///
/// Failures are logged; returns whether everything was preserved.
fn copy_metadata(src_metadata: &fs::Metadata, dst: &Path) -> bool {
    let mut preserved = true;
    let mtime = filetime::FileTime::from_last_modification_time(src_metadata);
    let atime = filetime::FileTime::from_last_access_time(src_metadata);
    if let Err(err) = filetime::set_file_times(dst, atime, mtime) {
        warn!("Could not preserve timestamps on {}: {}", dst.display(), err);
        preserved = false;
    }
    if let Err(err) = fs::set_permissions(dst, src_metadata.permissions()) {
        warn!("Could not preserve permissions on {}: {}", dst.display(), err);
        preserved = false;
    }
    preserved
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Fails if the parent exists but is not a directory, or cannot be created.
pub fn ensure_parent_dir_exists(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    // Skip if parent is empty path (relative root)
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Parent path exists but is not a directory",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(parent),
        Err(e) => Err(e),
    }
}

/// Clear the read-only flag of `path`, leaving other permission bits alone.
fn make_writable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::symlink_metadata(path)?.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Remove one entry; on a permission error clear read-only flags and retry once.
fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    let remove = || {
        if is_dir {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
    };

    match remove() {
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            debug!("Clearing read-only flag on {}", path.display());
            if !is_dir || cfg!(windows) {
                make_writable(path)?;
            }
            if let Some(parent) = path.parent() {
                // Unix needs a writable parent to unlink
                let _ = make_writable(parent);
            }
            remove()
        }
        other => other,
    }
}

/// Delete a directory tree, children first.
///
/// Every entry is attempted; entries that still cannot be removed are
/// returned and left in place, along with any ancestor that stays non-empty.
/// Links are removed, never followed.
pub fn remove_tree_forcing(root: &Path) -> Vec<PruneFailure> {
    let mut failures = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk error"));
                failures.push(PruneFailure { path, source });
                continue;
            }
        };

        let path: PathBuf = entry.path().to_path_buf();
        let is_dir = entry.file_type().is_dir();
        if let Err(source) = remove_entry(&path, is_dir) {
            // Parents of a failed child fail with "not empty"; report the child only
            if !(is_dir && failures.iter().any(|f: &PruneFailure| f.path.starts_with(&path))) {
                failures.push(PruneFailure { path, source });
            }
        }
    }

    failures
}
