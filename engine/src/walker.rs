//! Lazy directory walk with subtree pruning.
//!
//! `walk` yields one `DirListing` per visited directory: the directory path
//! and the names of the non-directory entries directly inside it. Excluded
//! subdirectories are pruned before they are entered, so nothing below them is
//! ever listed. Unreadable directories are logged and left out; the walk
//! itself never fails.

use std::ffi::OsString;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::filter::FilterEngine;

/// One directory and the file names directly inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub dir: PathBuf,
    /// Path of `dir` relative to the walk root (empty for the root itself)
    pub relative: PathBuf,
    pub files: Vec<OsString>,
}

type Entries<'a> = Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + 'a>;

/// Iterator returned by [`walk`].
pub struct Walk<'a> {
    root: PathBuf,
    entries: Peekable<Entries<'a>>,
}

/// Walk `root`, pruning every subdirectory the filter skips.
///
/// Links are never followed. Within a directory, files are listed before any
/// subdirectory is entered, so a listing is always complete when yielded.
/// Calling `walk` again restarts from scratch.
pub fn walk<'a>(root: &Path, filter: &'a FilterEngine) -> Walk<'a> {
    let entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| {
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
        .filter_entry(move |entry| {
            entry.depth() == 0 || !entry.file_type().is_dir() || !filter.should_skip(entry.path(), true)
        });

    Walk {
        root: root.to_path_buf(),
        entries: (Box::new(entries) as Entries<'a>).peekable(),
    }
}

impl Walk<'_> {
    /// Collect the files listed directly under a directory at `depth`.
    fn take_files(&mut self, depth: usize) -> Vec<OsString> {
        let mut files = Vec::new();
        loop {
            let is_child_file = match self.entries.peek() {
                Some(Ok(next)) => next.depth() == depth + 1 && !next.file_type().is_dir(),
                _ => false,
            };
            if !is_child_file {
                return files;
            }
            if let Some(Ok(entry)) = self.entries.next() {
                files.push(entry.file_name().to_os_string());
            }
        }
    }

    /// True if the next item is the read error for `dir` itself.
    fn next_is_error_for(&mut self, dir: &Path) -> bool {
        matches!(self.entries.peek(), Some(Err(err)) if err.path() == Some(dir))
    }
}

impl Iterator for Walk<'_> {
    type Item = DirListing;

    fn next(&mut self) -> Option<DirListing> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                // Only reachable for a root that is not a directory
                continue;
            }

            let files = self.take_files(entry.depth());
            if files.is_empty() && self.next_is_error_for(entry.path()) {
                if let Some(Err(err)) = self.entries.next() {
                    warn!("Skipping unreadable directory {}: {}", entry.path().display(), err);
                }
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return Some(DirListing {
                dir: entry.into_path(),
                relative,
                files,
            });
        }
    }
}
