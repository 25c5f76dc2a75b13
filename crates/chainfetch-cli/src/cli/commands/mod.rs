//! CLI command handlers, one file per command.

mod completions;
mod history;
mod partitions;
mod run;
mod upstream;

pub use completions::run_completions;
pub use history::run_history;
pub use partitions::run_partitions;
pub use run::run_pipeline;
