//! Persistent batch ledger.
//!
//! Records every item of a batch and its state so an interrupted run can
//! resume without repeating finished work. One JSON document per batch,
//! written atomically after every state transition.

mod drift;
mod store;
mod types;

pub use drift::{check_drift, DriftError};
pub use store::{LedgerError, LedgerStore};
pub use types::{
    BatchJob, ConfigSnapshot, ItemFailure, ItemId, ItemKind, ItemState, JobItem, StateCounts,
};
