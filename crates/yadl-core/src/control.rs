//! Cooperative batch cancellation.
//!
//! The flag is shared between the controller (stops dispatching new items),
//! the worker pool (marks never-started work as still pending), and the
//! fetch collaborator (which may abort an in-flight transfer if configured
//! to). Nothing is ever force-killed by the core; the gateway decides what
//! "abort" means for its child process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation token for one batch run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}
