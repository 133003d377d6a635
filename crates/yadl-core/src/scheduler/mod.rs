//! Bounded-concurrency execution of pending items.
//!
//! The worker pool runs at most N fetches at once and hands results back
//! one at a time, so the controller's ledger writes never race. The
//! dispatch queue keeps input order for ready items and a deadline heap
//! for items waiting out a backoff delay.

mod pool;
mod queue;

pub use pool::{ItemOutcome, ItemResult, WorkerPool};
pub use queue::DispatchQueue;
