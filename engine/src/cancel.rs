//! Cooperative cancellation for long runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between subtrees, files and copy chunks.
///
/// Clones share the same flag, so a UI thread can keep one and cancel the
/// run executing on the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a cancellation once the run it targeted has ended.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
