pub mod config;
pub mod error;
pub mod logging;

pub mod fetch;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod storage;

pub use error::{FetchError, InvalidWindowError, PipelineError};
pub use pipeline::Pipeline;
