//! Core data model for backup runs.
//!
//! This module defines the main data structures shared by every run:
//! - PolicyConfig / FilterRule: what gets skipped
//! - CopyTask: one logical backup, restore or copy run
//! - ProgressState: byte and item counters for one run
//! - RunOptions: the resolved parameters of the caller's settings
//! - Reports returned by the orchestrator

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::checksums::ChecksumAlgorithm;

/// What a filter rule is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// File extension, without the leading dot
    Extension,
    /// Entry name (exact or wildcard)
    Name,
    /// Full path (substring or wildcard)
    Path,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Extension => write!(f, "ext"),
            RuleKind::Name => write!(f, "name"),
            RuleKind::Path => write!(f, "path"),
        }
    }
}

/// A single user-defined include or exclude rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub kind: RuleKind,
    pub pattern: String,
}

impl FilterRule {
    pub fn new(kind: RuleKind, pattern: impl Into<String>) -> Self {
        FilterRule {
            kind,
            pattern: pattern.into(),
        }
    }

    pub fn extension(pattern: impl Into<String>) -> Self {
        Self::new(RuleKind::Extension, pattern)
    }

    pub fn name(pattern: impl Into<String>) -> Self {
        Self::new(RuleKind::Name, pattern)
    }

    pub fn path(pattern: impl Into<String>) -> Self {
        Self::new(RuleKind::Path, pattern)
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.pattern)
    }
}

/// Parses `kind:pattern`, where kind is `ext`/`extension`, `name` or `path`.
impl FromStr for FilterRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, pattern) = s
            .split_once(':')
            .ok_or_else(|| format!("Rule '{}' must look like kind:pattern", s))?;
        let kind = match kind.trim().to_lowercase().as_str() {
            "ext" | "extension" => RuleKind::Extension,
            "name" => RuleKind::Name,
            "path" => RuleKind::Path,
            other => return Err(format!("Unknown rule kind '{}'", other)),
        };
        if pattern.is_empty() {
            return Err(format!("Rule '{}' has an empty pattern", s));
        }
        Ok(FilterRule::new(kind, pattern))
    }
}

/// Whether entries carrying an attribute are copied or skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeMode {
    Include,
    #[default]
    Exclude,
}

impl fmt::Display for AttributeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeMode::Include => write!(f, "include"),
            AttributeMode::Exclude => write!(f, "exclude"),
        }
    }
}

/// Hidden/system handling plus include and exclude rules.
///
/// Immutable for the duration of a run. Exclude rules always win over
/// include rules and over attribute-based inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub hidden_mode: AttributeMode,
    pub system_mode: AttributeMode,
    pub include_rules: Vec<FilterRule>,
    pub exclude_rules: Vec<FilterRule>,
}

impl PolicyConfig {
    /// One-line summary written as the first line of every run log.
    pub fn describe(&self) -> String {
        format!(
            "Policy: hidden files {}, system files {}, {} include rule(s), {} exclude rule(s)",
            self.hidden_mode,
            self.system_mode,
            self.include_rules.len(),
            self.exclude_rules.len()
        )
    }
}

/// The kind of run a task performs. Its display form is used in log file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Restore,
    Copy,
    /// Estimate and space check only
    SpaceCheck,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Backup => write!(f, "backup"),
            Operation::Restore => write!(f, "restore"),
            Operation::Copy => write!(f, "copy"),
            Operation::SpaceCheck => write!(f, "space check"),
        }
    }
}

/// States of the per-run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    /// Restore only: selecting the newest backup of the owner
    Locating,
    Estimating,
    SpaceChecking,
    Copying,
    /// Optional single files copied after the tree
    ExtraFiles,
    Pruning,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Idle => "Idle",
            RunPhase::Locating => "Locating backup",
            RunPhase::Estimating => "Estimating size",
            RunPhase::SpaceChecking => "Checking free space",
            RunPhase::Copying => "Copying",
            RunPhase::ExtraFiles => "Copying extra files",
            RunPhase::Pruning => "Pruning old output",
            RunPhase::Done => "Done",
            RunPhase::Failed => "Failed",
        };
        write!(f, "{}", label)
    }
}

/// One logical run. Created when a run starts, discarded when it ends.
#[derive(Debug, Clone)]
pub struct CopyTask {
    /// Unique identifier for this run
    pub id: Uuid,

    pub operation: Operation,

    /// Roots walked by the estimate and copy passes
    pub source_roots: Vec<PathBuf>,

    /// Folder the run writes its output under
    pub destination_root: PathBuf,

    pub policy: PolicyConfig,

    /// Timestamp embedded in every generated name of this run
    pub created_at: DateTime<Local>,
}

impl CopyTask {
    pub fn new(
        operation: Operation,
        source_roots: Vec<PathBuf>,
        destination_root: PathBuf,
        policy: PolicyConfig,
    ) -> Self {
        CopyTask {
            id: Uuid::new_v4(),
            operation,
            source_roots,
            destination_root,
            policy,
            created_at: Local::now(),
        }
    }
}

/// Byte and item counters of one run.
///
/// Reset at the start of every task; every counter only grows within a task.
/// `bytes_copied` is clamped to `bytes_total` once a total is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub bytes_copied: u64,
    pub bytes_total: u64,
    pub files_processed: u64,
    pub folders_processed: u64,
}

impl ProgressState {
    pub fn reset(&mut self) {
        *self = ProgressState::default();
    }

    pub fn set_total(&mut self, bytes_total: u64) {
        self.bytes_total = self.bytes_total.max(bytes_total);
    }

    pub fn add_bytes(&mut self, delta: u64) {
        self.bytes_copied = self.bytes_copied.saturating_add(delta).min(self.bytes_total);
    }

    /// Marks the run as fully progressed, used by cleanup.
    pub fn complete(&mut self) {
        self.bytes_copied = self.bytes_total;
    }

    pub fn percent(&self) -> u32 {
        if self.bytes_total == 0 {
            return 100;
        }
        (self.bytes_copied as f64 / self.bytes_total as f64 * 100.0) as u32
    }
}

/// Run parameters resolved by the caller from its settings or arguments.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Backups kept per owner after a successful backup; 0 disables pruning
    pub keep_backups: usize,

    /// Age in days after which run logs are deleted; 0 disables pruning
    pub log_retention_days: u32,

    /// Budget for a single file transfer; zero disables the limit
    pub copy_timeout: Duration,

    /// Transfer chunk size in bytes
    pub chunk_size: usize,

    /// Minimum delay between two progress or status events
    pub progress_interval: Duration,

    /// Re-hash source and destination after each copy
    pub verify: Option<ChecksumAlgorithm>,

    /// Single files copied into `extra_files/` of a backup after the tree
    pub extra_files: Vec<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            keep_backups: 3,
            log_retention_days: 30,
            copy_timeout: Duration::from_secs(600),
            chunk_size: crate::fs_ops::COPY_CHUNK_SIZE,
            progress_interval: Duration::from_millis(200),
            verify: None,
            extra_files: Vec::new(),
        }
    }
}

/// A file whose copy failed, with the reason shown to the user.
#[derive(Debug, Clone)]
pub struct FailedFile {
    pub path: PathBuf,
    pub message: String,
}

/// Result of a successful backup run.
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    pub output_path: PathBuf,
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub files_failed: u64,
    pub folders_created: u64,
    pub failed_files: Vec<FailedFile>,
    pub pruned_backups: Vec<PathBuf>,
    pub pruned_logs: Vec<PathBuf>,
}

/// Result of a successful restore run.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// Backup directory the files were restored from
    pub backup_path: PathBuf,
    pub files_restored: u64,
    pub files_failed: u64,
    pub bytes_copied: u64,
    pub failed_files: Vec<FailedFile>,
}

/// Result of a successful copy run.
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub output_folder: PathBuf,
    pub files_copied: u64,
    pub files_failed: u64,
    pub bytes_copied: u64,
    pub failed_files: Vec<FailedFile>,
}

/// Result of a standalone space check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceReport {
    pub required_bytes: u64,
    pub available_bytes: u64,
    pub file_count: u64,
}

impl SpaceReport {
    pub fn sufficient(&self) -> bool {
        self.required_bytes <= self.available_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_rule_parses_kinds() {
        assert_eq!("ext:tmp".parse::<FilterRule>(), Ok(FilterRule::extension("tmp")));
        assert_eq!("Name:*.bak".parse::<FilterRule>(), Ok(FilterRule::name("*.bak")));
        assert_eq!(
            "path:C:\\Users\\x:y".parse::<FilterRule>(),
            Ok(FilterRule::path("C:\\Users\\x:y"))
        );
        assert!("size:10".parse::<FilterRule>().is_err());
        assert!("name:".parse::<FilterRule>().is_err());
        assert!("cache".parse::<FilterRule>().is_err());
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let mut progress = ProgressState::default();
        progress.set_total(100);
        progress.add_bytes(60);
        progress.add_bytes(60);
        assert_eq!(progress.bytes_copied, 100);

        // A smaller total never shrinks the maximum
        progress.set_total(10);
        assert_eq!(progress.bytes_total, 100);
        assert_eq!(progress.percent(), 100);

        progress.reset();
        assert_eq!(progress, ProgressState::default());
    }

    #[test]
    fn test_policy_describe_mentions_modes() {
        let policy = PolicyConfig {
            hidden_mode: AttributeMode::Include,
            ..PolicyConfig::default()
        };
        let line = policy.describe();
        assert!(line.contains("hidden files include"));
        assert!(line.contains("system files exclude"));
    }

    #[test]
    fn test_space_report_sufficient() {
        let report = SpaceReport {
            required_bytes: 10,
            available_bytes: 10,
            file_count: 1,
        };
        assert!(report.sufficient());
        let short = SpaceReport {
            available_bytes: 9,
            ..report
        };
        assert!(!short.sufficient());
    }
}
