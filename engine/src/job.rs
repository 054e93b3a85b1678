//! Run orchestration module.
//!
//! `Orchestrator` composes the filter, walker, estimator, space guard, copy
//! engine and retention pruner into the backup, restore and copy workflows.
//! Each run follows one state machine:
//!
//! `Idle → [Locating] → Estimating → SpaceChecking → Copying → [ExtraFiles] → Pruning → Done`
//!
//! with `Failed` reachable from any step. Per-file errors are counted and
//! logged, never propagated; only precondition failures, enumeration failures
//! of the run's own folders and cancellation abort a run. Success or failure,
//! every run ends in the same cleanup: final progress, log closed, completion
//! signalled.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

use crate::attributes::{AttributeSource, PlatformAttributes};
use crate::cancel::CancelToken;
use crate::checksums;
use crate::error::{CopyError, EngineError};
use crate::estimate::{plan_roots, Plan};
use crate::filter::FilterEngine;
use crate::fs_ops::{self, CopyLimits};
use crate::model::{
    BackupReport, CopyReport, CopyTask, FailedFile, Operation, PolicyConfig, ProgressState,
    RestoreReport, RunOptions, RunPhase, SpaceReport,
};
use crate::naming::{self, EXTRA_FILES_DIR, INCOMPLETE_MARKER};
use crate::progress::{RunObserver, Throttle};
use crate::retention;
use crate::runlog::RunLog;
use crate::space::{self, format_bytes, FsSpaceProbe, SpaceProbe, UNKNOWN_AVAILABLE};

/// `base` joined with `relative`, without a trailing separator for empty parts.
fn nest(base: &Path, relative: &Path) -> PathBuf {
    if relative.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// Validate that every source root exists.
fn check_roots(roots: &[PathBuf]) -> Result<(), EngineError> {
    if roots.is_empty() {
        return Err(EngineError::NoSources);
    }
    for root in roots {
        if fs::symlink_metadata(root).is_err() {
            return Err(EngineError::SourceNotFound { path: root.clone() });
        }
    }
    Ok(())
}

/// Counters of a copy pass.
#[derive(Debug, Default)]
struct CopyStats {
    files_copied: u64,
    files_failed: u64,
    bytes_copied: u64,
    folders_created: u64,
    failed_files: Vec<FailedFile>,
}

impl CopyStats {
    fn fail(&mut self, path: PathBuf, message: String) {
        self.files_failed += 1;
        self.failed_files.push(FailedFile { path, message });
    }
}

/// State of one executing run: phase, progress, log and observer.
struct Run<'a> {
    task: CopyTask,
    observer: &'a dyn RunObserver,
    log: Option<RunLog>,
    phase: RunPhase,
    progress: ProgressState,
    throttle: Throttle,
    output: Option<PathBuf>,
}

impl<'a> Run<'a> {
    fn start(
        task: CopyTask,
        observer: &'a dyn RunObserver,
        log_path: Option<PathBuf>,
        options: &RunOptions,
    ) -> Self {
        let log = log_path.map(|path| RunLog::new(path, &task.policy.describe()));
        Run {
            task,
            observer,
            log,
            phase: RunPhase::Idle,
            progress: ProgressState::default(),
            throttle: Throttle::new(options.progress_interval),
            output: None,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.observer.on_phase(phase);
        self.observer.on_status(&phase.to_string());
        if let Some(log) = self.log.as_mut() {
            log.info(&format!("== {}", phase));
        }
    }

    /// Summary line: tracing, interactive log and run log.
    fn log(&mut self, message: &str) {
        info!("{}", message);
        self.observer.on_log(message);
        if let Some(log) = self.log.as_mut() {
            log.info(message);
        }
    }

    /// Summary warning, shown to the user as well.
    fn warn(&mut self, message: &str) {
        warn!("{}", message);
        self.observer.on_log(message);
        if let Some(log) = self.log.as_mut() {
            log.warn(message);
        }
    }

    /// Per-file detail: run log and tracing only.
    fn detail(&mut self, message: &str) {
        debug!("{}", message);
        if let Some(log) = self.log.as_mut() {
            log.info(message);
        }
    }

    /// Per-file failure: run log and tracing only.
    fn detail_error(&mut self, message: &str) {
        warn!("{}", message);
        if let Some(log) = self.log.as_mut() {
            log.error(message);
        }
    }

    fn attach_log(&mut self) {
        if let Some(log) = self.log.as_mut() {
            log.attach();
        }
    }

    fn set_total(&mut self, bytes_total: u64) {
        self.progress.set_total(bytes_total);
        self.observer.on_progress_max(self.progress.bytes_total);
    }

    fn add_bytes(&mut self, delta: u64) {
        self.progress.add_bytes(delta);
        if self.throttle.ready() {
            self.observer.on_progress(self.progress.bytes_copied);
        }
    }

    fn scan_progress(&mut self, bytes: u64, files: u64) {
        self.observer
            .on_status(&format!("Scanning: {} files, {}", files, format_bytes(bytes)));
    }

    /// Unconditional cleanup shared by success and failure.
    fn finish<T>(mut self, result: &Result<T, EngineError>) {
        match result {
            Ok(_) => {
                self.enter(RunPhase::Done);
                self.log(&format!("{} finished", self.task.operation));
            }
            Err(err) => {
                self.enter(RunPhase::Failed);
                let message = format!("{} failed: {}", self.task.operation, err);
                warn!("{}", message);
                if let Some(log) = self.log.as_mut() {
                    log.error(&message);
                }
                self.observer.on_error(&message);
            }
        }

        self.progress.complete();
        self.observer.on_progress(self.progress.bytes_copied);
        if let Some(log) = self.log.as_mut() {
            log.close();
        }
        self.observer.on_completed(result.is_ok(), self.output.as_deref());
    }
}

/// Runs backups, restores and copies with one policy and one set of options.
///
/// The orchestrator holds no per-run state; each run gets its own task,
/// progress and log. Runs are meant to execute on a worker thread while the
/// caller drains the observer's events elsewhere.
#[derive(Clone)]
pub struct Orchestrator {
    policy: PolicyConfig,
    options: RunOptions,
    attributes: Arc<dyn AttributeSource>,
    space: Arc<dyn SpaceProbe>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(policy: PolicyConfig, options: RunOptions) -> Self {
        Orchestrator {
            policy,
            options,
            attributes: Arc::new(PlatformAttributes),
            space: Arc::new(FsSpaceProbe),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_attribute_source(mut self, attributes: Arc<dyn AttributeSource>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_space_probe(mut self, space: Arc<dyn SpaceProbe>) -> Self {
        self.space = space;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels the run in progress, or the next one to start.
    ///
    /// The request is cleared when that run ends, so later runs of this
    /// orchestrator and its clones start uncancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn end_run<T>(&self, run: Run, result: &Result<T, EngineError>) {
        run.finish(result);
        self.cancel.reset();
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn filter(&self) -> Result<FilterEngine, EngineError> {
        FilterEngine::with_attributes(self.policy.clone(), Arc::clone(&self.attributes))
    }

    fn limits(&self) -> CopyLimits {
        CopyLimits {
            chunk_size: self.options.chunk_size,
            timeout: self.options.copy_timeout,
        }
    }

    /// Back up `source_roots` into `{destination}/{owner}_backup_{stamp}`.
    ///
    /// # Errors
    /// `InvalidOwner`, `NoSources`, `SourceNotFound`, `InsufficientSpace`,
    /// `DestinationAccessDenied`, `InvalidRule` or `Cancelled`. Per-file
    /// failures are reported in the `BackupReport` instead.
    pub fn run_backup(
        &self,
        source_roots: &[PathBuf],
        owner: &str,
        destination: &Path,
        observer: &dyn RunObserver,
    ) -> Result<BackupReport, EngineError> {
        let task = CopyTask::new(
            Operation::Backup,
            source_roots.to_vec(),
            destination.to_path_buf(),
            self.policy.clone(),
        );
        let span = info_span!("backup", owner = %owner, id = %task.id);
        let _enter = span.enter();

        let log_path = naming::validate_owner(owner).ok().map(|_| {
            destination.join(naming::log_file_name(owner, Operation::Backup, &task.created_at))
        });
        let mut run = Run::start(task, observer, log_path, &self.options);
        let result = self.backup_phases(&mut run, owner);
        self.end_run(run, &result);
        result
    }

    fn backup_phases(&self, run: &mut Run, owner: &str) -> Result<BackupReport, EngineError> {
        naming::validate_owner(owner)?;
        let roots = run.task.source_roots.clone();
        let destination = run.task.destination_root.clone();
        check_roots(&roots)?;
        let filter = self.filter()?;
        run.log(&format!(
            "Backing up {} folder(s) for '{}' to {}",
            roots.len(),
            owner,
            destination.display()
        ));

        run.enter(RunPhase::Estimating);
        let plan = self.estimate(&roots, &filter, run)?;

        run.enter(RunPhase::SpaceChecking);
        self.guard_space(&destination, plan.total_bytes, run)?;

        run.enter(RunPhase::Copying);
        let output = destination.join(naming::backup_dir_name(owner, &run.task.created_at));
        self.prepare_output(&output, run)?;
        run.output = Some(output.clone());
        run.attach_log();
        let marker = output.join(INCOMPLETE_MARKER);
        if let Err(err) = fs::write(&marker, b"") {
            run.warn(&format!("Cannot write {}: {}", marker.display(), err));
        }

        let mut stats = self.copy_plan(&plan, &output, run)?;

        if !self.options.extra_files.is_empty() {
            run.enter(RunPhase::ExtraFiles);
            self.copy_extra_files(&output, &mut stats, run)?;
        }

        if let Err(err) = fs::remove_file(&marker) {
            if marker.exists() {
                run.warn(&format!("Cannot remove {}: {}", marker.display(), err));
            }
        }
        self.log_copy_summary(&stats, run);

        run.enter(RunPhase::Pruning);
        let backups = retention::prune_backups(
            &destination,
            owner,
            self.options.keep_backups,
            Some(output.as_path()),
        );
        let logs = retention::prune_logs(&destination, self.options.log_retention_days);
        if !backups.deleted.is_empty() || !logs.deleted.is_empty() {
            run.log(&format!(
                "Removed {} old backup(s) and {} old log(s)",
                backups.deleted.len(),
                logs.deleted.len()
            ));
        }
        for failure in backups.failures.iter().chain(logs.failures.iter()) {
            run.detail_error(&failure.to_string());
        }
        if !backups.failures.is_empty() || !logs.failures.is_empty() {
            run.warn("Some old backups or logs could not be removed; see the run log");
        }

        Ok(BackupReport {
            output_path: output,
            bytes_copied: stats.bytes_copied,
            files_copied: stats.files_copied,
            files_failed: stats.files_failed,
            folders_created: stats.folders_created,
            failed_files: stats.failed_files,
            pruned_backups: backups.deleted,
            pruned_logs: logs.deleted,
        })
    }

    /// Restore the newest complete backup of `owner` from `backup_parent`
    /// into `destination_root`.
    ///
    /// # Errors
    /// `SourceNotFound` if `backup_parent` is missing, `NoMatchingBackup` if it
    /// holds no complete backup of the owner, plus the backup run's errors.
    pub fn run_restore(
        &self,
        backup_parent: &Path,
        owner: &str,
        destination_root: &Path,
        observer: &dyn RunObserver,
    ) -> Result<RestoreReport, EngineError> {
        let task = CopyTask::new(
            Operation::Restore,
            Vec::new(),
            destination_root.to_path_buf(),
            self.policy.clone(),
        );
        let span = info_span!("restore", owner = %owner, id = %task.id);
        let _enter = span.enter();

        let log_path = naming::validate_owner(owner).ok().map(|_| {
            backup_parent.join(naming::log_file_name(owner, Operation::Restore, &task.created_at))
        });
        let mut run = Run::start(task, observer, log_path, &self.options);
        let result = self.restore_phases(&mut run, backup_parent, owner);
        self.end_run(run, &result);
        result
    }

    fn restore_phases(
        &self,
        run: &mut Run,
        backup_parent: &Path,
        owner: &str,
    ) -> Result<RestoreReport, EngineError> {
        naming::validate_owner(owner)?;
        if !backup_parent.is_dir() {
            return Err(EngineError::SourceNotFound {
                path: backup_parent.to_path_buf(),
            });
        }
        let filter = self.filter()?;
        let destination = run.task.destination_root.clone();

        run.enter(RunPhase::Locating);
        let backup = retention::latest_backup(backup_parent, owner).ok_or_else(|| {
            EngineError::NoMatchingBackup {
                owner: owner.to_string(),
                parent: backup_parent.to_path_buf(),
            }
        })?;
        run.log(&format!(
            "Restoring {} to {}",
            backup.display(),
            destination.display()
        ));
        let roots = self.backup_contents(&backup, run)?;
        run.task.source_roots = roots.clone();

        run.enter(RunPhase::Estimating);
        let plan = self.estimate(&roots, &filter, run)?;

        run.enter(RunPhase::SpaceChecking);
        self.guard_space(&destination, plan.total_bytes, run)?;

        run.enter(RunPhase::Copying);
        fs::create_dir_all(&destination).map_err(|source| EngineError::DestinationAccessDenied {
            path: destination.clone(),
            source,
        })?;
        run.output = Some(destination.clone());
        let stats = self.copy_plan(&plan, &destination, run)?;
        self.log_copy_summary(&stats, run);

        run.enter(RunPhase::Pruning);
        let logs = retention::prune_logs(backup_parent, self.options.log_retention_days);
        for failure in &logs.failures {
            run.detail_error(&failure.to_string());
        }

        Ok(RestoreReport {
            backup_path: backup,
            files_restored: stats.files_copied,
            files_failed: stats.files_failed,
            bytes_copied: stats.bytes_copied,
            failed_files: stats.failed_files,
        })
    }

    /// Top-level entries of a backup to restore, in name order.
    fn backup_contents(&self, backup: &Path, run: &mut Run) -> Result<Vec<PathBuf>, EngineError> {
        let entries = fs::read_dir(backup).map_err(|source| EngineError::EnumerationFailed {
            path: backup.to_path_buf(),
            source,
        })?;
        let mut roots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EngineError::EnumerationFailed {
                path: backup.to_path_buf(),
                source,
            })?;
            let name = entry.file_name();
            if name == INCOMPLETE_MARKER {
                continue;
            }
            if name == EXTRA_FILES_DIR {
                run.detail(&format!("Not restoring {}", entry.path().display()));
                continue;
            }
            roots.push(entry.path());
        }
        roots.sort();
        Ok(roots)
    }

    /// Copy `sources` into `{destination}/copy_data_{stamp}`.
    pub fn run_copy(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        observer: &dyn RunObserver,
    ) -> Result<CopyReport, EngineError> {
        let task = CopyTask::new(
            Operation::Copy,
            sources.to_vec(),
            destination.to_path_buf(),
            self.policy.clone(),
        );
        let span = info_span!("copy", id = %task.id);
        let _enter = span.enter();

        let output = destination.join(naming::copy_folder_name(&task.created_at));
        let log_path = output.join(naming::copy_log_file_name(&task.created_at));
        let mut run = Run::start(task, observer, Some(log_path), &self.options);
        let result = self.copy_phases(&mut run, output);
        self.end_run(run, &result);
        result
    }

    fn copy_phases(&self, run: &mut Run, output: PathBuf) -> Result<CopyReport, EngineError> {
        let sources = run.task.source_roots.clone();
        let destination = run.task.destination_root.clone();
        check_roots(&sources)?;
        let filter = self.filter()?;
        run.log(&format!(
            "Copying {} item(s) to {}",
            sources.len(),
            output.display()
        ));

        run.enter(RunPhase::Estimating);
        let plan = self.estimate(&sources, &filter, run)?;

        run.enter(RunPhase::SpaceChecking);
        self.guard_space(&destination, plan.total_bytes, run)?;

        run.enter(RunPhase::Copying);
        self.prepare_output(&output, run)?;
        run.output = Some(output.clone());
        run.attach_log();
        let stats = self.copy_plan(&plan, &output, run)?;
        self.log_copy_summary(&stats, run);

        Ok(CopyReport {
            output_folder: output,
            files_copied: stats.files_copied,
            files_failed: stats.files_failed,
            bytes_copied: stats.bytes_copied,
            failed_files: stats.failed_files,
        })
    }

    /// Estimate what copying `sources` would need and what `destination` offers.
    ///
    /// Never writes anything; an insufficient result is a report, not an error.
    pub fn check_space(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        observer: &dyn RunObserver,
    ) -> Result<SpaceReport, EngineError> {
        let task = CopyTask::new(
            Operation::SpaceCheck,
            sources.to_vec(),
            destination.to_path_buf(),
            self.policy.clone(),
        );
        let mut run = Run::start(task, observer, None, &self.options);
        let result = self.space_phases(&mut run);
        self.end_run(run, &result);
        result
    }

    fn space_phases(&self, run: &mut Run) -> Result<SpaceReport, EngineError> {
        let sources = run.task.source_roots.clone();
        check_roots(&sources)?;
        let filter = self.filter()?;

        run.enter(RunPhase::Estimating);
        let plan = self.estimate(&sources, &filter, run)?;

        run.enter(RunPhase::SpaceChecking);
        let check = space::check_space(self.space.as_ref(), &run.task.destination_root, plan.total_bytes);
        let report = SpaceReport {
            required_bytes: check.required_bytes,
            available_bytes: check.available_bytes,
            file_count: plan.file_count,
        };
        run.log(&format!(
            "{} file(s), {} required, {} available",
            report.file_count,
            format_bytes(report.required_bytes),
            describe_available(report.available_bytes)
        ));
        Ok(report)
    }

    fn estimate(&self, roots: &[PathBuf], filter: &FilterEngine, run: &mut Run) -> Result<Plan, EngineError> {
        let interval = self.options.progress_interval;
        let plan = plan_roots(roots, filter, &self.cancel, interval, &mut |bytes, files| {
            run.scan_progress(bytes, files)
        })?;
        run.set_total(plan.total_bytes);
        run.log(&format!(
            "Found {} file(s) in {} folder(s), {}",
            plan.file_count,
            plan.folder_count(),
            format_bytes(plan.total_bytes)
        ));
        Ok(plan)
    }

    fn guard_space(&self, destination: &Path, required: u64, run: &mut Run) -> Result<(), EngineError> {
        let check = space::check_space(self.space.as_ref(), destination, required);
        run.log(&format!(
            "Space required: {}, available: {}",
            format_bytes(check.required_bytes),
            describe_available(check.available_bytes)
        ));
        if !check.sufficient {
            return Err(EngineError::InsufficientSpace {
                destination: destination.to_path_buf(),
                required: check.required_bytes,
                available: check.available_bytes,
            });
        }
        Ok(())
    }

    /// Create the run's output folder, replacing a leftover with the same name.
    fn prepare_output(&self, output: &Path, run: &mut Run) -> Result<(), EngineError> {
        if output.exists() {
            run.warn(&format!("Replacing existing folder {}", output.display()));
            let mut failures = fs_ops::remove_tree_forcing(output);
            if !failures.is_empty() {
                for failure in &failures {
                    run.detail_error(&failure.to_string());
                }
                let first = failures.swap_remove(0);
                return Err(EngineError::DestinationAccessDenied {
                    path: first.path,
                    source: first.source,
                });
            }
        }
        fs::create_dir_all(output).map_err(|source| EngineError::DestinationAccessDenied {
            path: output.to_path_buf(),
            source,
        })
    }

    /// Mirror the planned directories under `output` and copy their files.
    ///
    /// Directories are created before any file is copied into them. A folder
    /// that cannot be created fails its files and the run goes on.
    fn copy_plan(&self, plan: &Plan, output: &Path, run: &mut Run) -> Result<CopyStats, EngineError> {
        let limits = self.limits();
        let mut stats = CopyStats::default();

        for tree in &plan.trees {
            let tree_output = nest(output, &tree.target);
            for dir in &tree.dirs {
                if self.cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }

                let dest_dir = nest(&tree_output, &dir.relative_path);
                let existed = dest_dir.is_dir();
                if let Err(err) = fs::create_dir_all(&dest_dir) {
                    run.detail_error(&format!("Cannot create folder {}: {}", dest_dir.display(), err));
                    for file in &dir.files {
                        stats.fail(
                            dir.source_path.join(&file.name),
                            format!("Folder {} could not be created: {}", dest_dir.display(), err),
                        );
                    }
                    continue;
                }
                if !existed {
                    stats.folders_created += 1;
                }
                run.progress.folders_processed += 1;

                for file in &dir.files {
                    if self.cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    let src = dir.source_path.join(&file.name);
                    let dst = dest_dir.join(&file.name);
                    let result = fs_ops::copy_file(&src, &dst, &limits, &self.cancel, &mut |delta| {
                        run.add_bytes(delta)
                    });
                    run.progress.files_processed += 1;

                    match result {
                        Ok(bytes) => match self.verify(&src, &dst) {
                            Ok(()) => {
                                run.detail(&format!("Copied {}", src.display()));
                                stats.files_copied += 1;
                                stats.bytes_copied += bytes;
                            }
                            Err(message) => {
                                run.detail_error(&message);
                                stats.fail(src, message);
                            }
                        },
                        Err(CopyError::Cancelled) => return Err(EngineError::Cancelled),
                        Err(err) => {
                            run.detail_error(&err.to_string());
                            stats.fail(src, err.to_string());
                        }
                    }
                }
            }
        }

        Ok(stats)
    }

    fn verify(&self, src: &Path, dst: &Path) -> Result<(), String> {
        let Some(algorithm) = self.options.verify else {
            return Ok(());
        };
        match checksums::verify_copy(src, dst, algorithm) {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!(
                "Verification failed for {}: {} differs from source",
                src.display(),
                algorithm
            )),
            Err(err) => Err(format!("Verification error for {}: {}", src.display(), err)),
        }
    }

    fn copy_extra_files(&self, output: &Path, stats: &mut CopyStats, run: &mut Run) -> Result<(), EngineError> {
        let limits = self.limits();
        let extras_dir = output.join(EXTRA_FILES_DIR);

        for extra in &self.options.extra_files {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let Some(name) = extra.file_name() else {
                continue;
            };
            if !extra.is_file() {
                run.warn(&format!("Extra file {} not found, skipped", extra.display()));
                continue;
            }
            let dst = extras_dir.join(name);
            match fs_ops::copy_file(extra, &dst, &limits, &self.cancel, &mut |_| {}) {
                Ok(bytes) => {
                    run.detail(&format!("Copied {}", extra.display()));
                    stats.files_copied += 1;
                    stats.bytes_copied += bytes;
                }
                Err(CopyError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    run.detail_error(&err.to_string());
                    stats.fail(extra.clone(), err.to_string());
                }
            }
        }
        Ok(())
    }

    fn log_copy_summary(&self, stats: &CopyStats, run: &mut Run) {
        run.log(&format!(
            "Copied {} file(s), {}, {} folder(s) created",
            stats.files_copied,
            format_bytes(stats.bytes_copied),
            stats.folders_created
        ));
        if stats.files_failed > 0 {
            run.warn(&format!(
                "{} file(s) could not be copied; see the run log for details",
                stats.files_failed
            ));
        }
    }
}

fn describe_available(available: u64) -> String {
    if available == UNKNOWN_AVAILABLE {
        "unknown".to_string()
    } else {
        format_bytes(available)
    }
}
