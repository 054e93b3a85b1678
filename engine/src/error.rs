//! Error types for the backup engine.
//!
//! The primary error type is `EngineError`, which represents run-level errors
//! that abort a backup, restore or copy. File-level errors are `CopyError`
//! values returned per file; the orchestrator counts and logs them instead of
//! propagating them.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a run.
///
/// Every abort still goes through the run's cleanup path (log closed, final
/// progress flushed, completion signalled) before the error reaches the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A source root of a backup or copy does not exist
    #[error("Source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Restore found no complete backup folder for the owner
    #[error("No backup for '{owner}' found in {}", parent.display())]
    NoMatchingBackup { owner: String, parent: PathBuf },

    /// Pre-flight space check failed; nothing was written
    #[error(
        "Not enough free space on {}: {required} bytes required, {available} bytes available",
        destination.display()
    )]
    InsufficientSpace {
        destination: PathBuf,
        required: u64,
        available: u64,
    },

    /// A directory the run depends on could not be listed
    #[error("Failed to enumerate directory: {}", path.display())]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output directory could not be created or cleared
    #[error("Destination not writable: {}", path.display())]
    DestinationAccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A filter rule carries a wildcard pattern that does not compile
    #[error("Invalid filter pattern '{pattern}': {reason}")]
    InvalidRule { pattern: String, reason: String },

    /// The owner name cannot be used as a backup name prefix
    #[error("Invalid owner name '{owner}'")]
    InvalidOwner { owner: String },

    /// The run was started without any source paths
    #[error("No source paths given")]
    NoSources,

    /// The run was cancelled through its `CancelToken`
    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::EnumerationFailed { source, .. } | Self::DestinationAccessDenied { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

/// Per-file copy failure. Never aborts a run except for `Cancelled`.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The transfer ran longer than the per-file budget
    #[error("Copy of {} exceeded {}s", path.display(), limit.as_secs())]
    Timeout { path: PathBuf, limit: Duration },

    /// Any I/O failure while creating, reading or writing
    #[error("Failed to copy {} to {}: {source}", src.display(), dst.display())]
    Failed {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run's cancel token fired between chunks
    #[error("Copy cancelled")]
    Cancelled,
}

impl CopyError {
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Failed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Attribute query failure for a single entry.
#[derive(Debug, Error)]
#[error("Attributes unavailable for {}: {source}", path.display())]
pub struct AttributeUnavailable {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl AttributeUnavailable {
    /// True when the entry no longer exists (vanished mid-walk or never did).
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

/// A path that retention could not delete.
#[derive(Debug, Error)]
#[error("Failed to delete {}: {source}", path.display())]
pub struct PruneFailure {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}
