//! Hidden/system/reparse attribute resolution.
//!
//! `AttributeSource` is the seam between the filter and the operating system.
//! One implementation is picked when the filter is built; `PlatformAttributes`
//! reads Windows file attributes on Windows and falls back to dot-file and
//! symlink conventions elsewhere.

use std::fs;
use std::path::Path;

use crate::error::AttributeUnavailable;

/// Attribute view of a single filesystem entry.
///
/// Computed on demand for one predicate evaluation, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeFlags {
    pub hidden: bool,
    pub system: bool,
    /// Symbolic link, junction or any other redirecting entry
    pub reparse_point: bool,
    pub is_directory: bool,
}

/// Resolves attributes for a path without following links.
pub trait AttributeSource: Send + Sync {
    fn attributes(&self, path: &Path) -> Result<AttributeFlags, AttributeUnavailable>;
}

/// Attribute source backed by the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformAttributes;

#[cfg(windows)]
const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
#[cfg(windows)]
const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
#[cfg(windows)]
const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;

impl AttributeSource for PlatformAttributes {
    #[cfg(windows)]
    fn attributes(&self, path: &Path) -> Result<AttributeFlags, AttributeUnavailable> {
        use std::os::windows::fs::MetadataExt;

        let metadata = fs::symlink_metadata(path).map_err(|source| AttributeUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let attrs = metadata.file_attributes();
        Ok(AttributeFlags {
            hidden: attrs & FILE_ATTRIBUTE_HIDDEN != 0,
            system: attrs & FILE_ATTRIBUTE_SYSTEM != 0,
            reparse_point: attrs & FILE_ATTRIBUTE_REPARSE_POINT != 0 || metadata.file_type().is_symlink(),
            is_directory: metadata.is_dir(),
        })
    }

    #[cfg(not(windows))]
    fn attributes(&self, path: &Path) -> Result<AttributeFlags, AttributeUnavailable> {
        let metadata = fs::symlink_metadata(path).map_err(|source| AttributeUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let hidden = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        Ok(AttributeFlags {
            hidden,
            // No system attribute outside Windows
            system: false,
            reparse_point: metadata.file_type().is_symlink(),
            is_directory: metadata.is_dir(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_file_has_no_flags() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, b"data").expect("Failed to write file");

        let flags = PlatformAttributes.attributes(&file).expect("Failed to read attributes");
        assert!(!flags.hidden);
        assert!(!flags.system);
        assert!(!flags.reparse_point);
        assert!(!flags.is_directory);
    }

    #[test]
    fn test_directory_is_reported() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let flags = PlatformAttributes
            .attributes(temp_dir.path())
            .expect("Failed to read attributes");
        assert!(flags.is_directory);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = PlatformAttributes
            .attributes(&temp_dir.path().join("gone"))
            .expect_err("Missing path must fail");
        assert!(err.is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn test_dot_file_is_hidden_and_symlink_is_reparse() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let hidden = temp_dir.path().join(".profile");
        fs::write(&hidden, b"x").expect("Failed to write file");
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&hidden, &link).expect("Failed to create symlink");

        assert!(PlatformAttributes.attributes(&hidden).unwrap().hidden);
        let link_flags = PlatformAttributes.attributes(&link).unwrap();
        assert!(link_flags.reparse_point);
        assert!(!link_flags.hidden);
    }
}
