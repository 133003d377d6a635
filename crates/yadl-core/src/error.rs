//! Run-fatal error taxonomy.
//!
//! Item-level failures (`fetch::FetchError`) are contained by the retry
//! policy and never abort a batch. The errors here are infrastructure
//! failures: they end the run immediately, leaving the ledger at its last
//! durably-persisted state so a resume is always safe.

use crate::ledger::{DriftError, LedgerError};

/// A configuration value that makes a run impossible. Detected before any
/// work starts.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Fatal error for a whole batch run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The ledger store failed (not found, already exists, corrupt,
    /// unwritable). The previously persisted state is intact.
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// The input list changed since the ledger was created; resuming would
    /// duplicate or lose items. Nothing was mutated.
    #[error("{0}")]
    Drift(#[from] DriftError),

    /// Configuration rejected before the run started.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl RunError {
    /// True when the persisted ledger is intact and `run --resume` will
    /// pick up where this run stopped.
    pub fn resume_is_safe(&self) -> bool {
        match self {
            RunError::Ledger(e) => !matches!(e, LedgerError::Corrupt { .. }),
            RunError::Drift(_) | RunError::Config(_) => true,
        }
    }
}
