//! Retention of old backups and run logs.
//!
//! Backups of an owner are the immediate subfolders of a destination whose
//! name starts with `{owner}_backup_` (case-insensitive). The embedded
//! `YYYY-MM-DD_HHMMSS` stamp makes name order chronological. Pruning is
//! best-effort: failures are logged and returned, never raised.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::error::PruneFailure;
use crate::fs_ops::remove_tree_forcing;
use crate::naming::{is_backup_of, INCOMPLETE_MARKER};

/// What a prune pass deleted and what it had to leave behind.
#[derive(Debug, Default)]
pub struct PruneSummary {
    pub deleted: Vec<PathBuf>,
    pub failures: Vec<PruneFailure>,
}

/// Backup folders of `owner` under `parent`, oldest first.
///
/// A missing or unreadable parent yields an empty list.
pub fn list_backups(parent: &Path, owner: &str) -> Vec<PathBuf> {
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Cannot list backups in {}: {}", parent.display(), err);
            return Vec::new();
        }
    };

    let mut backups: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            is_backup_of(&name, owner).then(|| (name.to_lowercase(), entry.path()))
        })
        .collect();
    backups.sort_by(|a, b| a.0.cmp(&b.0));
    backups.into_iter().map(|(_, path)| path).collect()
}

/// True while a backup is still being written (or was interrupted).
pub fn is_incomplete(backup: &Path) -> bool {
    backup.join(INCOMPLETE_MARKER).exists()
}

/// Newest complete backup of `owner` under `parent`.
pub fn latest_backup(parent: &Path, owner: &str) -> Option<PathBuf> {
    list_backups(parent, owner)
        .into_iter()
        .rev()
        .find(|backup| {
            let incomplete = is_incomplete(backup);
            if incomplete {
                warn!("Ignoring incomplete backup {}", backup.display());
            }
            !incomplete
        })
}

/// Keep the newest `keep_count` backups of `owner` and delete the rest.
///
/// `keep_count == 0` disables pruning. `current`, the backup being written,
/// is never deleted even if it would otherwise fall outside the kept set.
pub fn prune_backups(
    parent: &Path,
    owner: &str,
    keep_count: usize,
    current: Option<&Path>,
) -> PruneSummary {
    let mut summary = PruneSummary::default();
    if keep_count == 0 {
        return summary;
    }

    let backups = list_backups(parent, owner);
    if backups.len() <= keep_count {
        return summary;
    }

    let excess = backups.len() - keep_count;
    for backup in backups.into_iter().take(excess) {
        if current.map(|c| c == backup).unwrap_or(false) {
            continue;
        }
        info!("Deleting old backup {}", backup.display());
        let failures = remove_tree_forcing(&backup);
        if failures.is_empty() {
            summary.deleted.push(backup);
        } else {
            for failure in &failures {
                warn!("{}", failure);
            }
            summary.failures.extend(failures);
        }
    }
    summary
}

/// Delete `*.log` files directly in `folder` older than `retention_days`.
///
/// `retention_days == 0` disables pruning.
pub fn prune_logs(folder: &Path, retention_days: u32) -> PruneSummary {
    prune_logs_at(folder, retention_days, SystemTime::now())
}

fn prune_logs_at(folder: &Path, retention_days: u32, now: SystemTime) -> PruneSummary {
    let mut summary = PruneSummary::default();
    if retention_days == 0 {
        return summary;
    }
    let Some(cutoff) = now.checked_sub(Duration::from_secs(u64::from(retention_days) * 86_400)) else {
        return summary;
    };

    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Cannot list logs in {}: {}", folder.display(), err);
            return summary;
        }
    };

    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let is_log = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("log"))
            .unwrap_or(false);
        if !is_log {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                warn!("Cannot read age of {}: {}", path.display(), err);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted old log {}", path.display());
                summary.deleted.push(path);
            }
            Err(source) => {
                let failure = PruneFailure { path, source };
                warn!("{}", failure);
                summary.failures.push(failure);
            }
        }
    }
    summary
}
