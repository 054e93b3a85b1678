//! Run observer trait and event stream.
//!
//! This module defines the RunObserver trait, which decouples the engine from
//! any specific UI technology. The engine calls the observer synchronously
//! from the run's worker thread; `ChannelObserver` turns those calls into a
//! stream of `RunEvent` values that another thread can drain.

use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::model::RunPhase;

/// Receives progress, log and status updates from a run.
///
/// All methods have empty defaults so observers implement only what they show.
pub trait RunObserver: Send + Sync {
    /// A summary log line for an interactive log view.
    fn on_log(&self, _message: &str) {}

    /// Bytes copied so far in the current run.
    fn on_progress(&self, _bytes_copied: u64) {}

    /// Progress maximum, sent once the estimate is known.
    fn on_progress_max(&self, _bytes_total: u64) {}

    /// Short status line, e.g. the scan counter or the current phase.
    fn on_status(&self, _status: &str) {}

    /// The single summary error of a failed run.
    fn on_error(&self, _message: &str) {}

    /// A state-machine transition.
    fn on_phase(&self, _phase: RunPhase) {}

    /// The run has finished, successfully or not. Always the last call.
    fn on_completed(&self, _success: bool, _output: Option<&Path>) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// One observer call, as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Log(String),
    ProgressByte(u64),
    ProgressMax(u64),
    Status(String),
    Error(String),
    Phase(RunPhase),
    Completed {
        success: bool,
        output: Option<PathBuf>,
    },
}

/// A RunObserver implementation that forwards every call over a channel.
pub struct ChannelObserver {
    sender: Sender<RunEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<RunEvent>) -> Self {
        ChannelObserver { sender }
    }

    /// Create an observer with an unbounded channel and return its receiving end.
    pub fn unbounded() -> (Self, Receiver<RunEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (ChannelObserver::new(tx), rx)
    }

    fn send(&self, event: RunEvent) {
        // A consumer that hung up must not fail the run
        let _ = self.sender.send(event);
    }
}

impl RunObserver for ChannelObserver {
    fn on_log(&self, message: &str) {
        self.send(RunEvent::Log(message.to_string()));
    }

    fn on_progress(&self, bytes_copied: u64) {
        self.send(RunEvent::ProgressByte(bytes_copied));
    }

    fn on_progress_max(&self, bytes_total: u64) {
        self.send(RunEvent::ProgressMax(bytes_total));
    }

    fn on_status(&self, status: &str) {
        self.send(RunEvent::Status(status.to_string()));
    }

    fn on_error(&self, message: &str) {
        self.send(RunEvent::Error(message.to_string()));
    }

    fn on_phase(&self, phase: RunPhase) {
        self.send(RunEvent::Phase(phase));
    }

    fn on_completed(&self, success: bool, output: Option<&Path>) {
        self.send(RunEvent::Completed {
            success,
            output: output.map(Path::to_path_buf),
        });
    }
}

/// Time-based rate limiter for progress and status events.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle { interval, last: None }
    }

    /// Returns true at most once per interval; the first call always passes.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_events_in_order() {
        let (observer, rx) = ChannelObserver::unbounded();
        observer.on_phase(RunPhase::Copying);
        observer.on_progress_max(10);
        observer.on_progress(4);
        observer.on_completed(true, Some(Path::new("out")));
        drop(observer);

        let events: Vec<RunEvent> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                RunEvent::Phase(RunPhase::Copying),
                RunEvent::ProgressMax(10),
                RunEvent::ProgressByte(4),
                RunEvent::Completed {
                    success: true,
                    output: Some(PathBuf::from("out")),
                },
            ]
        );
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (observer, rx) = ChannelObserver::unbounded();
        drop(rx);
        observer.on_log("nobody listens");
    }

    #[test]
    fn test_throttle_limits_rate() {
        let mut throttle = Throttle::new(Duration::from_secs(3600));
        assert!(throttle.ready());
        assert!(!throttle.ready());

        let mut open = Throttle::new(Duration::ZERO);
        assert!(open.ready());
        assert!(open.ready());
    }
}
