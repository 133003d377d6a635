//! Failure classification and retry/backoff policy.
//!
//! Item failures come back from the fetch collaborator as plain data
//! (`FetchError`), get classified into `Transient`, `RateLimited`, or
//! `Permanent`, and the policy turns classification plus the item's attempt
//! history into a decision. Collapsing these into one retry curve either
//! wastes time retrying unrecoverable errors or gives up too early on
//! throttling, so the three classes are kept apart.

mod classify;
mod policy;

pub use classify::{classify, FailureClass};
pub use policy::{RetryDecision, RetryPolicy};
