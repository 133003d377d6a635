//! Map fetch errors onto retry classes.

use serde::{Deserialize, Serialize};

use crate::fetch::FetchError;

/// Retry-relevant classification of an item failure. Persisted on the item
/// so a resumed run and the end-of-run report see the same story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Worth retrying soon: timeouts, flaky network, interrupted transfers.
    Transient,
    /// The platform is throttling us; back off longer and don't burn the
    /// normal attempt budget.
    RateLimited,
    /// Retrying cannot help: bad reference, removed content, unsupported
    /// source, broken collaborator.
    Permanent,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::RateLimited => "rate-limited",
            FailureClass::Permanent => "permanent",
        }
    }
}

/// Classify a fetch error.
pub fn classify(e: &FetchError) -> FailureClass {
    match e {
        FetchError::Network(_) | FetchError::Timeout => FailureClass::Transient,
        FetchError::RateLimited { .. } => FailureClass::RateLimited,
        FetchError::NotFound(_) | FetchError::Unsupported(_) | FetchError::Collaborator(_) => {
            FailureClass::Permanent
        }
        // The worker pool converts cancelled attempts before they reach the
        // retry policy; the attempt stays resumable either way.
        FetchError::Cancelled => FailureClass::Transient,
    }
}
