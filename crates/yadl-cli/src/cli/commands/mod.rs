//! CLI command handlers. Each command is in its own file.

mod clear;
mod completions;
mod config;
mod run;
mod status;

pub use clear::run_clear;
pub use completions::run_completions;
pub use config::run_config;
pub use run::run_batch;
pub use status::run_status;
