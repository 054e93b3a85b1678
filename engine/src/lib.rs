//! # BackUP Engine - Profile Backup Library
//!
//! A headless engine that backs up, restores and copies file trees as
//! point-in-time snapshots. Designed as the foundation for multiple UIs
//! (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine provides:
//! - Attribute and rule based filtering (hidden/system files, reparse points,
//!   extension, name and path globs)
//! - Lazy directory walking with whole-subtree pruning
//! - A size estimate that the copy pass reuses as its plan
//! - A free-space guard that refuses runs which would not fit
//! - Chunked copies with per-file timeout, cancellation and optional
//!   checksum verification
//! - Timestamped backup folders with count based retention and age based
//!   log pruning
//! - Progress, status and log events through an observer (decoupled from UI
//!   technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use backup_engine::{NoopObserver, Orchestrator, PolicyConfig, RunOptions};
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Orchestrator::new(PolicyConfig::default(), RunOptions::default());
//!
//! // Back up two profile folders
//! let report = engine.run_backup(
//!     &[PathBuf::from("C:\\Users\\alice\\Documents"), PathBuf::from("C:\\Users\\alice\\Desktop")],
//!     "alice",
//!     Path::new("D:\\Backups"),
//!     &NoopObserver,
//! )?;
//! println!("{} files in {}", report.files_copied, report.output_path.display());
//!
//! // Restore the newest backup of the same owner
//! engine.run_restore(Path::new("D:\\Backups"), "alice", Path::new("C:\\Restored"), &NoopObserver)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (policy, task, options, reports)
//! - **error**: Error types and handling
//! - **attributes**: Platform file attribute queries
//! - **filter**: Skip decisions for files and folders
//! - **walker**: Filtered directory enumeration
//! - **estimate**: Size estimation and copy planning
//! - **space**: Free-space checks
//! - **fs_ops**: Low-level filesystem operations
//! - **naming**: Backup, copy and log file names
//! - **runlog**: Per-run log files
//! - **retention**: Backup and log pruning
//! - **job**: Run orchestration (backup, restore, copy)
//! - **progress**: Observer trait and channel bridge
//! - **cancel**: Cooperative cancellation
//! - **checksums**: Checksum computation and verification

pub mod attributes;
pub mod cancel;
pub mod checksums;
pub mod error;
pub mod estimate;
pub mod filter;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod naming;
pub mod progress;
pub mod retention;
pub mod runlog;
pub mod space;
pub mod walker;

// Re-export main types and functions
pub use cancel::CancelToken;
pub use checksums::{compute_file_checksum, verify_copy, ChecksumAlgorithm, ChecksumValue};
pub use error::{CopyError, EngineError};
pub use filter::FilterEngine;
pub use job::Orchestrator;
pub use model::{
    AttributeMode, BackupReport, CopyReport, FilterRule, Operation, PolicyConfig, RestoreReport,
    RuleKind, RunOptions, RunPhase, SpaceReport,
};
pub use progress::{ChannelObserver, NoopObserver, RunEvent, RunObserver};
pub use space::format_bytes;
