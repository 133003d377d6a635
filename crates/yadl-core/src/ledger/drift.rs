//! Drift detection: refuses to resume against a changed input list.
//!
//! Silently merging a changed list into an existing ledger could duplicate
//! work or drop items, so any count or order mismatch between the stored
//! top-level items and the current input is surfaced as an error and the
//! stored ledger is left untouched.

use std::fmt;

use super::types::BatchJob;
use crate::source_list::SourceLine;

/// The input list no longer matches the ledger it would resume.
#[derive(Debug)]
pub enum DriftError {
    /// Different number of top-level entries.
    CountChanged { stored: usize, current: usize },
    /// Same count, but an entry differs (first mismatch reported).
    EntryChanged {
        index: usize,
        stored: String,
        current: String,
    },
}

impl fmt::Display for DriftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftError::CountChanged { stored, current } => write!(
                f,
                "input list changed since this batch was created: \
                 ledger has {} top-level entries, input now has {}; \
                 clear the ledger to start fresh",
                stored, current
            ),
            DriftError::EntryChanged {
                index,
                stored,
                current,
            } => write!(
                f,
                "input list changed since this batch was created: \
                 entry {} was '{}', is now '{}'; \
                 clear the ledger to start fresh",
                index + 1,
                stored,
                current
            ),
        }
    }
}

impl std::error::Error for DriftError {}

/// Compare the ledger's stored top-level sources against the current input
/// list. Returns Ok(()) only when they match in count and order. Never
/// mutates the job.
pub fn check_drift(job: &BatchJob, current: &[SourceLine]) -> Result<(), DriftError> {
    let stored = job.top_level_sources();
    if stored.len() != current.len() {
        return Err(DriftError::CountChanged {
            stored: stored.len(),
            current: current.len(),
        });
    }
    for (index, (stored_url, line)) in stored.iter().zip(current).enumerate() {
        if *stored_url != line.url {
            return Err(DriftError::EntryChanged {
                index,
                stored: (*stored_url).to_string(),
                current: line.url.clone(),
            });
        }
    }
    Ok(())
}
