//! Per-run log file.
//!
//! One UTF-8 text file per run, one timestamped line per event. Lines written
//! before the log's folder exists are held in memory and flushed once the
//! folder appears, so opening the log never creates a destination folder.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    pending: Vec<String>,
    /// Set after a failed open so the error is reported once
    broken: bool,
}

impl RunLog {
    /// Prepare a log at `path`; the first line records the effective policy.
    pub fn new(path: PathBuf, policy_line: &str) -> Self {
        let mut log = RunLog {
            path,
            file: None,
            pending: Vec::new(),
            broken: false,
        };
        log.write(LogLevel::Info, policy_line);
        log.attach();
        log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the file exists on disk.
    pub fn is_attached(&self) -> bool {
        self.file.is_some()
    }

    /// Open the file if its folder exists and flush any held lines.
    pub fn attach(&mut self) {
        if self.file.is_some() || self.broken {
            return;
        }
        let Some(folder) = self.path.parent() else {
            return;
        };
        if !folder.is_dir() {
            return;
        }

        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                for line in self.pending.drain(..) {
                    if let Err(err) = writeln!(writer, "{}", line) {
                        warn!("Failed to write run log {}: {}", self.path.display(), err);
                        break;
                    }
                }
                self.file = Some(writer);
            }
            Err(err) => {
                warn!("Cannot create run log {}: {}", self.path.display(), err);
                self.broken = true;
            }
        }
    }

    pub fn write(&mut self, level: LogLevel, message: &str) {
        let line = format!(
            "[{}] {:<5} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level.label(),
            message
        );
        match self.file.as_mut() {
            Some(writer) => {
                if let Err(err) = writeln!(writer, "{}", line) {
                    warn!("Failed to write run log {}: {}", self.path.display(), err);
                }
            }
            None if !self.broken => self.pending.push(line),
            None => {}
        }
    }

    pub fn info(&mut self, message: &str) {
        self.write(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.write(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: &str) {
        self.write(LogLevel::Error, message);
    }

    /// Flush and close the file. Lines still held because the folder never
    /// appeared are dropped.
    pub fn close(&mut self) {
        self.attach();
        if let Some(mut writer) = self.file.take() {
            if let Err(err) = writer.flush() {
                warn!("Failed to flush run log {}: {}", self.path.display(), err);
            }
        }
        self.pending.clear();
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Some(writer) = self.file.as_mut() {
            let _ = writer.flush();
        }
    }
}
