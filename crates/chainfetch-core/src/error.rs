//! Error taxonomy for the pipeline.
//!
//! Only [`InvalidWindowError`] and [`PipelineError`] ever escape `Pipeline::run`.
//! Fetch and write errors are captured per partition and end up as strings in
//! the run report; persistence errors are logged and dropped.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::partition::PartitionKey;

/// Reference date (or window) could not be interpreted. Fatal, raised before scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidWindowError {
    #[error("invalid reference date {0:?}: expected YYYY-MM-DD or YYYYMMDD")]
    ReferenceDate(String),
}

/// Classified failure returned by a [`crate::fetch::FetchAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network-level failure (connect, DNS, reset, timeout).
    #[error("connection error: {0}")]
    Connection(String),
    /// Upstream answered with a non-success status.
    #[error("API error: HTTP {status_code}: {message}")]
    Api { status_code: u16, message: String },
    /// Upstream asked us to slow down.
    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimit { retry_after: Option<Duration> },
    /// Response arrived but could not be turned into records.
    #[error("malformed response: {0}")]
    Decode(String),
    /// The fetch task itself died (panic inside the adapter).
    #[error("fetch task failed: {0}")]
    Task(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {}s)", d.as_secs()))
        .unwrap_or_default()
}

/// A chunk could not be staged or committed. Drops that partition's artifact only.
#[derive(Debug, Error)]
#[error("write failed for partition {partition}: {source}")]
pub struct WriteError {
    pub partition: PartitionKey,
    #[source]
    pub source: WriteErrorKind,
}

#[derive(Debug, Error)]
pub enum WriteErrorKind {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Csv(#[from] csv::Error),
    /// A non-first chunk arrived for a partition that has no open staging file.
    #[error("chunk {chunk_index} arrived without an open staging file")]
    NoOpenStaging { chunk_index: usize },
    /// Another partition of this run already claimed the output file name.
    #[error("output file {} is already used by partition {owner}", .path.display())]
    NameTaken { path: PathBuf, owner: PartitionKey },
    /// Records carry fields missing from the header inferred from the first record.
    #[error("fields not in header: {}", .columns.join(", "))]
    UnknownColumns { columns: Vec<String> },
}

/// The run summary could not be stored. Logged, never propagated.
#[derive(Debug, Error)]
pub enum MetricsPersistError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialize run metrics: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("run store directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindowError),
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
    #[error("could not list partitions: {0}")]
    Listing(#[source] FetchError),
    #[error("cannot create output root {}: {source}", .path.display())]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The writer task exited before the run finished (it panicked or was dropped).
    #[error("writer task stopped unexpectedly")]
    WriterGone,
}
