pub mod config;
pub mod logging;

pub mod control;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod source_list;

#[cfg(test)]
pub(crate) mod test_support;
