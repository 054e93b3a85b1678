//! Names of everything a run writes.
//!
//! These formats are read back by restore and retention, and by existing
//! backups on disk, so they must not change.

use chrono::{DateTime, Local};

use crate::error::EngineError;
use crate::model::Operation;

/// Marker file present in a backup folder while it is being written.
pub const INCOMPLETE_MARKER: &str = ".backup_incomplete";

/// Folder inside a backup that receives the extra single files.
pub const EXTRA_FILES_DIR: &str = "extra_files";

const STAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";
const COPY_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `{owner}_backup_`, the prefix shared by all backups of an owner.
pub fn backup_prefix(owner: &str) -> String {
    format!("{}_backup_", owner)
}

/// `{owner}_backup_{YYYY-MM-DD_HHMMSS}`
pub fn backup_dir_name(owner: &str, at: &DateTime<Local>) -> String {
    format!("{}{}", backup_prefix(owner), at.format(STAMP_FORMAT))
}

/// `{owner}_{operation}_{YYYY-MM-DD_HHMMSS}.log`
pub fn log_file_name(owner: &str, operation: Operation, at: &DateTime<Local>) -> String {
    format!("{}_{}_{}.log", owner, operation, at.format(STAMP_FORMAT))
}

/// `copy_{YYYY-MM-DD_HHMMSS}.log`, the log of a copy run (no owner).
pub fn copy_log_file_name(at: &DateTime<Local>) -> String {
    format!("copy_{}.log", at.format(STAMP_FORMAT))
}

/// `copy_data_{YYYYMMDD_HHMMSS}`
pub fn copy_folder_name(at: &DateTime<Local>) -> String {
    format!("copy_data_{}", at.format(COPY_STAMP_FORMAT))
}

/// Case-insensitive check that `name` is a backup folder name of `owner`.
pub fn is_backup_of(name: &str, owner: &str) -> bool {
    name.to_lowercase()
        .starts_with(&backup_prefix(owner).to_lowercase())
}

/// Reject owner names that cannot form a single path component.
pub fn validate_owner(owner: &str) -> Result<(), EngineError> {
    let invalid = owner.trim().is_empty()
        || owner == "."
        || owner == ".."
        || owner.chars().any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'));
    if invalid {
        return Err(EngineError::InvalidOwner {
            owner: owner.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap()
    }

    #[test]
    fn test_backup_dir_name_format() {
        assert_eq!(backup_dir_name("alice", &stamp()), "alice_backup_2024-03-09_070502");
    }

    #[test]
    fn test_log_file_name_format() {
        assert_eq!(
            log_file_name("alice", Operation::Restore, &stamp()),
            "alice_restore_2024-03-09_070502.log"
        );
        assert_eq!(copy_log_file_name(&stamp()), "copy_2024-03-09_070502.log");
    }

    #[test]
    fn test_copy_folder_name_format() {
        assert_eq!(copy_folder_name(&stamp()), "copy_data_20240309_070502");
    }

    #[test]
    fn test_backup_prefix_is_case_insensitive() {
        assert!(is_backup_of("ALICE_Backup_2024-03-09_070502", "alice"));
        assert!(!is_backup_of("alicex_backup_2024-03-09_070502", "alice"));
        assert!(!is_backup_of("bob_backup_2024-03-09_070502", "alice"));
    }

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner("alice").is_ok());
        assert!(validate_owner("Jane Doe").is_ok());
        assert!(validate_owner("").is_err());
        assert!(validate_owner("a/b").is_err());
        assert!(validate_owner("..").is_err());
    }
}
