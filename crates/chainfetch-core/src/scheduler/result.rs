//! Per-partition outcomes and the events the scheduler emits.

use crate::error::FetchError;
use crate::fetch::Record;
use crate::partition::PartitionKey;

/// Outcome of one partition fetch. Exactly one per submitted key.
#[derive(Debug)]
pub enum FetchResult {
    Success {
        partition_key: PartitionKey,
        records: Vec<Record>,
        record_count: usize,
        elapsed_ms: u64,
    },
    Failure {
        partition_key: PartitionKey,
        error: FetchError,
        elapsed_ms: u64,
    },
}

impl FetchResult {
    pub fn success(partition_key: PartitionKey, records: Vec<Record>, elapsed_ms: u64) -> Self {
        let record_count = records.len();
        FetchResult::Success {
            partition_key,
            records,
            record_count,
            elapsed_ms,
        }
    }

    pub fn partition_key(&self) -> &PartitionKey {
        match self {
            FetchResult::Success { partition_key, .. } | FetchResult::Failure { partition_key, .. } => {
                partition_key
            }
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            FetchResult::Success { elapsed_ms, .. } | FetchResult::Failure { elapsed_ms, .. } => {
                *elapsed_ms
            }
        }
    }

    /// Records fetched (0 for failures).
    pub fn record_count(&self) -> usize {
        match self {
            FetchResult::Success { record_count, .. } => *record_count,
            FetchResult::Failure { .. } => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// What the scheduler reports on its output stream.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// A worker is about to call the adapter for this partition.
    Dispatched { partition_key: PartitionKey },
    /// The partition's fetch finished.
    Completed(FetchResult),
}
