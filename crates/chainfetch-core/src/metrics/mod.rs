//! Run summary: per-partition outcomes, aggregate counters, and where it is persisted.

mod store;

pub use store::SqliteRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::MetricsPersistError;
use crate::partition::{PartitionKey, PartitionWindow};
use crate::scheduler::FetchResult;
use crate::storage::WriteSummary;

/// Reason recorded for partitions that never finished because the run was cancelled.
pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Succeeded,
    Failed,
}

/// How one partition ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub partition_key: PartitionKey,
    pub status: PartitionStatus,
    /// Records returned by the upstream.
    pub record_count: u64,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Committed output file, if any (zero-record partitions produce none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Sealed summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reference_date: String,
    pub max_offset: Option<u32>,
    pub concurrency: usize,
    pub chunk_size: usize,
    pub total_partitions: usize,
    pub successful_partitions: usize,
    pub failed_partitions: usize,
    /// Sum of fetched record counts over successful fetches.
    pub total_records: u64,
    /// Rows that reached committed files.
    pub records_written: u64,
    pub total_bytes: u64,
    pub duration_ms: u64,
    pub peak_memory_mb: f64,
    pub interrupted: bool,
    pub outcomes: Vec<PartitionOutcome>,
}

impl RunMetrics {
    pub fn failures(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == PartitionStatus::Failed)
    }

    pub fn outcome(&self, key: &PartitionKey) -> Option<&PartitionOutcome> {
        self.outcomes.iter().find(|o| &o.partition_key == key)
    }
}

/// Filter for [`RunSink::list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    /// Only runs for this reference date (as stored, e.g. `2024-01-15`).
    pub reference_date: Option<String>,
    /// Newest first; None = all.
    pub limit: Option<u32>,
}

/// Durable destination for sealed run summaries.
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn persist_run(&self, metrics: &RunMetrics) -> Result<(), MetricsPersistError>;

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunMetrics>, MetricsPersistError>;
}

/// Accumulates outcomes while a run is in progress; sealed once the stream is exhausted.
pub struct MetricsRecorder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    window: PartitionWindow,
    concurrency: usize,
    chunk_size: usize,
    total_partitions: usize,
    outcomes: Vec<PartitionOutcome>,
    total_records: u64,
    peak_memory_mb: f64,
}

impl MetricsRecorder {
    pub fn begin(window: &PartitionWindow, concurrency: usize, chunk_size: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            window: window.clone(),
            concurrency,
            chunk_size,
            total_partitions: 0,
            outcomes: Vec::new(),
            total_records: 0,
            peak_memory_mb: 0.0,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn set_total(&mut self, total_partitions: usize) {
        self.total_partitions = total_partitions;
    }

    pub fn observe_memory(&mut self, mb: f64) {
        if mb > self.peak_memory_mb {
            self.peak_memory_mb = mb;
        }
    }

    pub fn record_fetch(&mut self, result: &FetchResult) {
        let outcome = match result {
            FetchResult::Success {
                partition_key,
                record_count,
                elapsed_ms,
                ..
            } => {
                self.total_records += *record_count as u64;
                PartitionOutcome {
                    partition_key: partition_key.clone(),
                    status: PartitionStatus::Succeeded,
                    record_count: *record_count as u64,
                    elapsed_ms: *elapsed_ms,
                    error: None,
                    artifact: None,
                    sha256: None,
                }
            }
            FetchResult::Failure {
                partition_key,
                error,
                elapsed_ms,
            } => PartitionOutcome {
                partition_key: partition_key.clone(),
                status: PartitionStatus::Failed,
                record_count: 0,
                elapsed_ms: *elapsed_ms,
                error: Some(error.to_string()),
                artifact: None,
                sha256: None,
            },
        };
        self.outcomes.push(outcome);
    }

    /// Marks a partition as failed because the run stopped before it finished.
    /// A partition whose fetch already completed is downgraded to failed.
    pub fn record_interrupted(&mut self, key: &PartitionKey) {
        if let Some(o) = self.outcomes.iter_mut().find(|o| &o.partition_key == key) {
            o.status = PartitionStatus::Failed;
            o.error = Some(INTERRUPTED.to_string());
            return;
        }
        self.outcomes.push(PartitionOutcome {
            partition_key: key.clone(),
            status: PartitionStatus::Failed,
            record_count: 0,
            elapsed_ms: 0,
            error: Some(INTERRUPTED.to_string()),
            artifact: None,
            sha256: None,
        });
    }

    /// Folds the writer's results in and produces the final summary.
    ///
    /// Write failures move their partition to failed; committed artifacts are
    /// attached to their outcomes.
    pub fn seal(mut self, writes: &WriteSummary, interrupted: bool) -> RunMetrics {
        let finished_at = Utc::now();
        let by_key: HashMap<&PartitionKey, usize> = self
            .outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| (&o.partition_key, i))
            .collect();
        let mut write_failed = Vec::new();
        let mut committed = Vec::new();
        for f in &writes.failures {
            if let Some(&i) = by_key.get(&f.partition_key) {
                write_failed.push((i, f.error.clone()));
            }
        }
        for a in &writes.artifacts {
            if let Some(&i) = by_key.get(&a.partition_key) {
                committed.push((i, a.final_path.clone(), a.sha256.clone()));
            }
        }
        for (i, path, sha) in committed {
            self.outcomes[i].artifact = Some(path);
            self.outcomes[i].sha256 = sha;
        }
        for (i, error) in write_failed {
            let o = &mut self.outcomes[i];
            o.status = PartitionStatus::Failed;
            o.error = Some(error);
        }

        let successful = self
            .outcomes
            .iter()
            .filter(|o| o.status == PartitionStatus::Succeeded)
            .count();
        let failed = self.outcomes.len() - successful;
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;

        RunMetrics {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            reference_date: self.window.reference_date,
            max_offset: self.window.max_offset,
            concurrency: self.concurrency,
            chunk_size: self.chunk_size,
            total_partitions: self.total_partitions.max(self.outcomes.len()),
            successful_partitions: successful,
            failed_partitions: failed,
            total_records: self.total_records,
            records_written: writes.total_records,
            total_bytes: writes.total_bytes,
            duration_ms,
            peak_memory_mb: self.peak_memory_mb,
            interrupted,
            outcomes: self.outcomes,
        }
    }
}
