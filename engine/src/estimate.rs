//! Size estimation and run planning.
//!
//! The estimate pass walks every root once, applies the filter to each file
//! and records the result as a `Plan`. The copy pass consumes the same plan,
//! so both passes share one set of filter decisions; the tree may still change
//! underneath, which is why sizes are only an estimate.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::filter::FilterEngine;
use crate::progress::Throttle;
use crate::walker::walk;

/// Progress rate of `estimate_total`.
pub const ESTIMATE_PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// A file selected for copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub name: OsString,
    /// Size at estimation time; 0 if it could not be read
    pub size: u64,
}

/// A directory to mirror, with the files to copy into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDir {
    pub source_path: PathBuf,
    /// Path relative to the tree's destination
    pub relative_path: PathBuf,
    pub files: Vec<PlannedFile>,
}

/// Everything planned for one source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTree {
    pub root: PathBuf,
    /// Where the tree lands, relative to the run's output folder
    pub target: PathBuf,
    pub dirs: Vec<PlannedDir>,
}

/// Snapshot of the filter decisions of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub trees: Vec<PlannedTree>,
    pub total_bytes: u64,
    pub file_count: u64,
}

impl Plan {
    pub fn folder_count(&self) -> u64 {
        self.trees.iter().map(|t| t.dirs.len() as u64).sum()
    }
}

fn file_size(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            warn!("Cannot read size of {}: {}", path.display(), err);
            0
        }
    }
}

/// Rate-limited progress sink of one planning pass.
struct ScanProgress<'a> {
    throttle: Throttle,
    callback: &'a mut dyn FnMut(u64, u64),
}

impl ScanProgress<'_> {
    fn counted(&mut self, plan: &Plan) {
        if self.throttle.ready() {
            (self.callback)(plan.total_bytes, plan.file_count);
        }
    }

    fn finished(&mut self, plan: &Plan) {
        (self.callback)(plan.total_bytes, plan.file_count);
    }
}

/// Plan one root.
///
/// A directory root lands under its own name; a file root lands directly in
/// the output folder. A root the filter skips yields an empty tree.
fn plan_root(
    root: &Path,
    filter: &FilterEngine,
    cancel: &CancelToken,
    plan: &mut Plan,
    progress: &mut ScanProgress,
) -> Result<(), EngineError> {
    let name = root.file_name().map(PathBuf::from).unwrap_or_default();
    let is_dir = root.is_dir();
    let mut tree = PlannedTree {
        root: root.to_path_buf(),
        target: if is_dir { name.clone() } else { PathBuf::new() },
        dirs: Vec::new(),
    };

    if filter.should_skip(root, is_dir) {
        debug!("Root {} is excluded by policy", root.display());
        plan.trees.push(tree);
        return Ok(());
    }

    if !is_dir {
        let size = file_size(root);
        plan.total_bytes += size;
        plan.file_count += 1;
        tree.dirs.push(PlannedDir {
            source_path: root.parent().map(Path::to_path_buf).unwrap_or_default(),
            relative_path: PathBuf::new(),
            files: vec![PlannedFile {
                name: name.into_os_string(),
                size,
            }],
        });
        progress.counted(plan);
        plan.trees.push(tree);
        return Ok(());
    }

    for listing in walk(root, filter) {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut dir = PlannedDir {
            source_path: listing.dir,
            relative_path: listing.relative,
            files: Vec::with_capacity(listing.files.len()),
        };
        for name in listing.files {
            let path = dir.source_path.join(&name);
            if filter.should_skip(&path, false) {
                continue;
            }
            let size = file_size(&path);
            plan.total_bytes += size;
            plan.file_count += 1;
            dir.files.push(PlannedFile { name, size });
            progress.counted(plan);
        }
        tree.dirs.push(dir);
    }

    plan.trees.push(tree);
    Ok(())
}

/// Walk every root and build the plan used by the space check and copy pass.
///
/// `on_progress(bytes_so_far, file_count)` is called at most once per
/// `interval` while files are counted, plus once with the final totals.
/// Cancellation is checked at every directory.
pub fn plan_roots(
    roots: &[PathBuf],
    filter: &FilterEngine,
    cancel: &CancelToken,
    interval: Duration,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Result<Plan, EngineError> {
    let mut progress = ScanProgress {
        throttle: Throttle::new(interval),
        callback: on_progress,
    };
    let mut plan = Plan::default();
    for root in roots {
        plan_root(root, filter, cancel, &mut plan, &mut progress)?;
    }
    progress.finished(&plan);
    Ok(plan)
}

/// Total size of the files under `roots` that the filter keeps.
///
/// Progress is reported every `ESTIMATE_PROGRESS_INTERVAL` at most.
pub fn estimate_total(
    roots: &[PathBuf],
    filter: &FilterEngine,
    on_progress: Option<&mut dyn FnMut(u64, u64)>,
) -> u64 {
    let mut ignore = |_: u64, _: u64| {};
    let on_progress: &mut dyn FnMut(u64, u64) = match on_progress {
        Some(callback) => callback,
        None => &mut ignore,
    };
    // A fresh token never fires, so planning cannot fail here
    plan_roots(roots, filter, &CancelToken::new(), ESTIMATE_PROGRESS_INTERVAL, on_progress)
        .map(|plan| plan.total_bytes)
        .unwrap_or(0)
}
