//! BackUP - Command-line interface for the profile backup engine.
//!
//! A headless driver for testing and manual use of the engine. It resolves
//! arguments into a policy and run options, executes the run on a worker
//! thread and reports progress to stderr.

use backup_engine::{
    format_bytes, AttributeMode, ChannelObserver, ChecksumAlgorithm, EngineError, FilterRule,
    Orchestrator, PolicyConfig, RunEvent, RunOptions,
};
use backup_engine::model::FailedFile;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// BackUP - Point-in-time backups of profile folders
#[derive(Parser, Debug)]
#[command(name = "profile-backup")]
#[command(version = "0.1.0")]
#[command(about = "Back up, restore and copy folders with filtering and retention")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up source folders into {dest}/{owner}_backup_{timestamp}
    Backup {
        /// Owner name used in backup and log names
        #[arg(long)]
        owner: String,

        /// Folder that receives the backups
        #[arg(long, value_name = "PATH")]
        dest: PathBuf,

        /// Backups of the owner to keep (0 keeps all)
        #[arg(long, value_name = "COUNT", default_value_t = 3)]
        keep: usize,

        /// Single file copied into the backup's extra_files folder
        #[arg(long = "extra-file", value_name = "PATH")]
        extra_files: Vec<PathBuf>,

        /// Folders or files to back up
        #[arg(required = true, value_name = "SOURCE")]
        sources: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Restore the newest backup of an owner
    Restore {
        /// Folder holding the backups
        #[arg(long, value_name = "PATH")]
        from: PathBuf,

        /// Owner whose newest backup is restored
        #[arg(long)]
        owner: String,

        /// Folder that receives the restored tree
        #[arg(long, value_name = "PATH")]
        dest: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Copy folders or files into {dest}/copy_data_{timestamp}
    Copy {
        /// Folder that receives the copy
        #[arg(long, value_name = "PATH")]
        dest: PathBuf,

        /// Folders or files to copy
        #[arg(required = true, value_name = "SOURCE")]
        sources: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Report the size of a run and the free space at its destination
    CheckSpace {
        /// Destination to check
        #[arg(long, value_name = "PATH")]
        dest: PathBuf,

        /// Folders or files that would be copied
        #[arg(required = true, value_name = "SOURCE")]
        sources: Vec<PathBuf>,

        #[command(flatten)]
        policy: PolicyArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct PolicyArgs {
    /// JSON policy file; flags below are applied on top of it
    #[arg(long, value_name = "FILE")]
    policy_file: Option<PathBuf>,

    /// Copy hidden files and folders
    #[arg(long)]
    include_hidden: bool,

    /// Copy system files and folders
    #[arg(long)]
    include_system: bool,

    /// Copy only entries matching a rule: ext:<.ext>, name:<glob> or path:<glob>
    #[arg(long = "include", value_name = "KIND:PATTERN")]
    include: Vec<FilterRule>,

    /// Skip entries matching a rule: ext:<.ext>, name:<glob> or path:<glob>
    #[arg(long = "exclude", value_name = "KIND:PATTERN")]
    exclude: Vec<FilterRule>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    policy: PolicyArgs,

    /// Delete run logs older than this many days (0 keeps all)
    #[arg(long, value_name = "DAYS", default_value_t = 30)]
    log_days: u32,

    /// Per-file copy timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 600)]
    timeout: u64,

    /// Verify every copied file with sha256 or blake3
    #[arg(long, value_name = "ALGORITHM")]
    verify: Option<ChecksumAlgorithm>,
}

/// Console sink for run events, drained on the main thread.
struct CliProgress {
    quiet: bool,
    start_time: Instant,
    total_bytes: u64,
    on_progress_line: bool,
}

impl CliProgress {
    fn new(quiet: bool) -> Self {
        CliProgress {
            quiet,
            start_time: Instant::now(),
            total_bytes: 0,
            on_progress_line: false,
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    fn end_progress_line(&mut self) {
        if self.on_progress_line {
            eprintln!();
            self.on_progress_line = false;
        }
    }

    fn handle(&mut self, event: RunEvent) {
        match event {
            RunEvent::Error(message) => {
                self.end_progress_line();
                eprintln!("Error: {}", message);
            }
            RunEvent::Completed { success, output } => {
                self.end_progress_line();
                if self.quiet {
                    return;
                }
                let status = if success { "Finished" } else { "Failed" };
                eprintln!("{} in {}", status, Self::format_duration(self.start_time.elapsed()));
                if let Some(output) = output {
                    eprintln!("Output: {}", output.display());
                }
            }
            _ if self.quiet => {}
            RunEvent::Log(message) => {
                self.end_progress_line();
                eprintln!("{}", message);
            }
            RunEvent::Phase(phase) => {
                self.end_progress_line();
                eprintln!("> {}", phase);
            }
            RunEvent::Status(status) => {
                eprint!("\r{:<60}", status);
                self.on_progress_line = true;
                let _ = std::io::Write::flush(&mut std::io::stderr());
            }
            RunEvent::ProgressMax(total) => self.total_bytes = total,
            RunEvent::ProgressByte(copied) => {
                let total = self.total_bytes.max(1);
                let percent = (copied as f64 / total as f64 * 100.0) as u32;
                eprint!(
                    "\rProgress: {} | {}/{}",
                    Self::print_progress_bar(percent),
                    format_bytes(copied),
                    format_bytes(self.total_bytes)
                );
                self.on_progress_line = true;
                let _ = std::io::Write::flush(&mut std::io::stderr());
            }
        }
    }
}

/// Parse and validate command-line arguments, then run the command
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let exit_code = match run_cli(&cli) {
        Ok(0) => 0,
        Ok(failed) => {
            eprintln!("Error: {} file(s) could not be copied", failed);
            1
        }
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            // Run summaries already reach the console as events
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Build the effective policy: policy file first, then flags.
fn resolve_policy(args: &PolicyArgs) -> Result<PolicyConfig, String> {
    let mut policy = match &args.policy_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("Cannot read policy file {}: {}", path.display(), e))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("Invalid policy file {}: {}", path.display(), e))?
        }
        None => PolicyConfig::default(),
    };

    if args.include_hidden {
        policy.hidden_mode = AttributeMode::Include;
    }
    if args.include_system {
        policy.system_mode = AttributeMode::Include;
    }
    policy.include_rules.extend(args.include.iter().cloned());
    policy.exclude_rules.extend(args.exclude.iter().cloned());
    Ok(policy)
}

fn resolve_options(args: &RunArgs) -> RunOptions {
    RunOptions {
        log_retention_days: args.log_days,
        copy_timeout: Duration::from_secs(args.timeout),
        verify: args.verify,
        ..RunOptions::default()
    }
}

/// Run `job` on a worker thread and print its events until it finishes.
fn execute<T, F>(engine: Orchestrator, quiet: bool, job: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&Orchestrator, &ChannelObserver) -> Result<T, EngineError> + Send + 'static,
{
    let (observer, events) = ChannelObserver::unbounded();
    let worker = thread::spawn(move || job(&engine, &observer));

    let mut console = CliProgress::new(quiet);
    for event in events.iter() {
        console.handle(event);
    }

    let result = worker
        .join()
        .map_err(|_| "Worker thread panicked".to_string())?;
    result.map_err(|e| e.to_string())
}

fn print_failures(failed_files: &[FailedFile]) {
    if failed_files.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("Failed files:");
    for file in failed_files {
        eprintln!("  {}: {}", file.path.display(), file.message);
    }
}

/// Main CLI logic - separated for testability.
///
/// Returns the number of files that failed in a run that otherwise
/// completed.
fn run_cli(cli: &Cli) -> Result<u64, String> {
    match &cli.command {
        Command::Backup {
            owner,
            dest,
            keep,
            extra_files,
            sources,
            run,
        } => {
            let policy = resolve_policy(&run.policy)?;
            let options = RunOptions {
                keep_backups: *keep,
                extra_files: extra_files.clone(),
                ..resolve_options(run)
            };
            debug!("{}", policy.describe());

            let (sources, owner, dest) = (sources.clone(), owner.clone(), dest.clone());
            let report = execute(Orchestrator::new(policy, options), cli.quiet, move |engine, observer| {
                engine.run_backup(&sources, &owner, &dest, observer)
            })?;

            if !cli.quiet {
                eprintln!(
                    "Summary: {} copied, {} failed, {} folders",
                    report.files_copied, report.files_failed, report.folders_created
                );
                eprintln!("Bytes copied: {}", format_bytes(report.bytes_copied));
                if !report.pruned_backups.is_empty() {
                    eprintln!("Removed {} old backup(s)", report.pruned_backups.len());
                }
            }
            print_failures(&report.failed_files);
            Ok(report.files_failed)
        }

        Command::Restore {
            from,
            owner,
            dest,
            run,
        } => {
            let policy = resolve_policy(&run.policy)?;
            let options = resolve_options(run);

            let (from, owner, dest) = (from.clone(), owner.clone(), dest.clone());
            let report = execute(Orchestrator::new(policy, options), cli.quiet, move |engine, observer| {
                engine.run_restore(&from, &owner, &dest, observer)
            })?;

            if !cli.quiet {
                eprintln!("Restored from: {}", report.backup_path.display());
                eprintln!(
                    "Summary: {} restored, {} failed",
                    report.files_restored, report.files_failed
                );
                eprintln!("Bytes copied: {}", format_bytes(report.bytes_copied));
            }
            print_failures(&report.failed_files);
            Ok(report.files_failed)
        }

        Command::Copy { dest, sources, run } => {
            let policy = resolve_policy(&run.policy)?;
            let options = resolve_options(run);

            let (sources, dest) = (sources.clone(), dest.clone());
            let report = execute(Orchestrator::new(policy, options), cli.quiet, move |engine, observer| {
                engine.run_copy(&sources, &dest, observer)
            })?;

            if !cli.quiet {
                eprintln!(
                    "Summary: {} copied, {} failed",
                    report.files_copied, report.files_failed
                );
                eprintln!("Bytes copied: {}", format_bytes(report.bytes_copied));
            }
            print_failures(&report.failed_files);
            Ok(report.files_failed)
        }

        Command::CheckSpace {
            dest,
            sources,
            policy,
        } => {
            let policy = resolve_policy(policy)?;

            let (sources, dest) = (sources.clone(), dest.clone());
            let report = execute(
                Orchestrator::new(policy, RunOptions::default()),
                cli.quiet,
                move |engine, observer| engine.check_space(&sources, &dest, observer),
            )?;

            println!("Files:     {}", report.file_count);
            println!("Required:  {}", format_bytes(report.required_bytes));
            println!("Available: {}", format_bytes(report.available_bytes));
            if report.sufficient() {
                Ok(0)
            } else {
                Err("Not enough free space at destination".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_engine::RuleKind;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["profile-backup", "--quiet"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("Failed to parse arguments")
    }

    fn source_tree(base: &TempDir) -> PathBuf {
        let src = base.path().join("Documents");
        fs::create_dir_all(src.join("sub")).expect("Failed to create dir");
        fs::write(src.join("report.txt"), "quarterly").expect("Failed to write file");
        fs::write(src.join("sub").join("data.tmp"), "scratch").expect("Failed to write file");
        src
    }

    #[test]
    fn test_backup_then_restore() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = source_tree(&temp_dir);
        let backups = temp_dir.path().join("backups");
        let restored = temp_dir.path().join("restored");

        let cli = parse(&[
            "backup",
            "--owner",
            "alice",
            "--dest",
            backups.to_str().unwrap(),
            "--exclude",
            "ext:.tmp",
            "--verify",
            "blake3",
            src.to_str().unwrap(),
        ]);
        assert_eq!(run_cli(&cli), Ok(0));

        let cli = parse(&[
            "restore",
            "--from",
            backups.to_str().unwrap(),
            "--owner",
            "alice",
            "--dest",
            restored.to_str().unwrap(),
        ]);
        assert_eq!(run_cli(&cli), Ok(0));

        assert_eq!(
            fs::read_to_string(restored.join("Documents").join("report.txt")).unwrap(),
            "quarterly"
        );
        assert!(!restored.join("Documents").join("sub").join("data.tmp").exists());
    }

    #[test]
    fn test_copy_command() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = source_tree(&temp_dir);
        let dest = temp_dir.path().join("stick");

        let cli = parse(&["copy", "--dest", dest.to_str().unwrap(), src.to_str().unwrap()]);
        assert_eq!(run_cli(&cli), Ok(0));

        let folders: Vec<_> = fs::read_dir(&dest).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].join("Documents").join("sub").join("data.tmp").exists());
    }

    #[test]
    fn test_zero_timeout_copies_everything() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = source_tree(&temp_dir);
        fs::write(src.join("empty.txt"), "").expect("Failed to write file");
        let dest = temp_dir.path().join("stick");

        let cli = parse(&[
            "copy",
            "--dest",
            dest.to_str().unwrap(),
            "--timeout",
            "0",
            src.to_str().unwrap(),
        ]);
        assert_eq!(run_cli(&cli), Ok(0));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cli = parse(&[
            "backup",
            "--owner",
            "alice",
            "--dest",
            temp_dir.path().to_str().unwrap(),
            "/nonexistent/path",
        ]);
        let result = run_cli(&cli);
        assert!(result.is_err(), "Backup should reject missing source");
    }

    #[test]
    fn test_restore_without_backups_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cli = parse(&[
            "restore",
            "--from",
            temp_dir.path().to_str().unwrap(),
            "--owner",
            "alice",
            "--dest",
            temp_dir.path().join("out").to_str().unwrap(),
        ]);
        let result = run_cli(&cli);
        assert!(result.unwrap_err().contains("No backup for 'alice'"));
    }

    #[test]
    fn test_rules_and_flags_are_parsed() {
        let cli = parse(&[
            "check-space",
            "--dest",
            "/tmp",
            "--include-hidden",
            "--include",
            "name:*.docx",
            "--exclude",
            "path:*\\Cache\\*",
            "/tmp",
        ]);
        let Command::CheckSpace { policy, .. } = &cli.command else {
            panic!("Expected check-space");
        };
        let resolved = resolve_policy(policy).expect("Failed to resolve policy");
        assert_eq!(resolved.hidden_mode, AttributeMode::Include);
        assert_eq!(resolved.system_mode, AttributeMode::Exclude);
        assert_eq!(resolved.include_rules, vec![FilterRule::new(RuleKind::Name, "*.docx")]);
        assert_eq!(resolved.exclude_rules[0].kind, RuleKind::Path);
    }

    #[test]
    fn test_invalid_rule_is_rejected() {
        let result = Cli::try_parse_from([
            "profile-backup",
            "copy",
            "--dest",
            "/tmp",
            "--exclude",
            "color:blue",
            "/tmp",
        ]);
        assert!(result.is_err(), "Unknown rule kind should be rejected");
    }

    #[test]
    fn test_invalid_verify_algorithm_is_rejected() {
        let result = Cli::try_parse_from([
            "profile-backup",
            "copy",
            "--dest",
            "/tmp",
            "--verify",
            "md5",
            "/tmp",
        ]);
        assert!(result.is_err(), "md5 is not a verification algorithm");
    }

    #[test]
    fn test_policy_file_with_flag_overrides() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let policy_file = temp_dir.path().join("policy.json");
        fs::write(
            &policy_file,
            r#"{"system_mode":"include","exclude_rules":[{"kind":"name","pattern":"node_modules"}]}"#,
        )
        .expect("Failed to write file");

        let args = PolicyArgs {
            policy_file: Some(policy_file),
            exclude: vec!["ext:.log".parse().unwrap()],
            ..PolicyArgs::default()
        };
        let policy = resolve_policy(&args).expect("Failed to resolve policy");
        assert_eq!(policy.hidden_mode, AttributeMode::Exclude);
        assert_eq!(policy.system_mode, AttributeMode::Include);
        assert_eq!(
            policy.exclude_rules,
            vec![FilterRule::name("node_modules"), FilterRule::extension(".log")]
        );
    }

    #[test]
    fn test_bad_policy_file_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let policy_file = temp_dir.path().join("policy.json");
        fs::write(&policy_file, "{not json").expect("Failed to write file");

        let args = PolicyArgs {
            policy_file: Some(policy_file),
            ..PolicyArgs::default()
        };
        assert!(resolve_policy(&args).is_err());
    }

    #[test]
    fn test_progress_bar_formatting() {
        assert_eq!(CliProgress::print_progress_bar(0), "[                    ] 0%");
        assert_eq!(CliProgress::print_progress_bar(50), "[==========          ] 50%");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
