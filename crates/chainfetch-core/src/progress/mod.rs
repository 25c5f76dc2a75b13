//! Live run progress (partitions done, throughput, memory, ETA).
//!
//! The pipeline driver owns the only [`ProgressTracker`]; everyone else reads
//! the latest [`ProgressSnapshot`] through a shared [`ProgressCell`] or
//! receives copies on an optional channel.

mod memory;

pub use memory::resident_mb;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::partition::PartitionKey;
use crate::scheduler::{FetchResult, SchedulerEvent};

/// Point-in-time view of a running pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_partitions: usize,
    pub completed_partitions: usize,
    /// Most recently dispatched partition.
    pub current_partition: Option<PartitionKey>,
    pub total_records: u64,
    /// Records between the last two completions over the time between them.
    pub records_per_second: f64,
    pub memory_usage_mb: f64,
    pub start_time: DateTime<Utc>,
    /// None until the first partition completes.
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    fn new(total_partitions: usize, start_time: DateTime<Utc>) -> Self {
        Self {
            total_partitions,
            completed_partitions: 0,
            current_partition: None,
            total_records: 0,
            records_per_second: 0.0,
            memory_usage_mb: 0.0,
            start_time,
            estimated_completion: None,
        }
    }

    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_partitions == 0 {
            return 1.0;
        }
        (self.completed_partitions as f64 / self.total_partitions as f64).min(1.0)
    }

    pub fn remaining_partitions(&self) -> usize {
        self.total_partitions.saturating_sub(self.completed_partitions)
    }
}

/// Shared slot holding the current snapshot; `None` when no run is active.
#[derive(Debug, Clone, Default)]
pub struct ProgressCell(Arc<RwLock<Option<ProgressSnapshot>>>);

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ProgressSnapshot> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Marks the cell as idle (no run active).
    pub fn clear(&self) {
        self.set(None);
    }

    fn set(&self, value: Option<ProgressSnapshot>) {
        match self.0.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

/// Folds scheduler events into the snapshot and publishes it.
pub struct ProgressTracker {
    cell: ProgressCell,
    notify: Option<mpsc::Sender<ProgressSnapshot>>,
    started: Instant,
    last_completion: Instant,
    records_at_last_completion: u64,
    snapshot: ProgressSnapshot,
}

impl ProgressTracker {
    /// Initialises the cell for a run over `total_partitions`.
    pub fn start(
        cell: ProgressCell,
        notify: Option<mpsc::Sender<ProgressSnapshot>>,
        total_partitions: usize,
    ) -> Self {
        let now = Instant::now();
        let mut tracker = Self {
            cell,
            notify,
            started: now,
            last_completion: now,
            records_at_last_completion: 0,
            snapshot: ProgressSnapshot::new(total_partitions, Utc::now()),
        };
        tracker.snapshot.memory_usage_mb = resident_mb();
        tracker.publish();
        tracker
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn observe(&mut self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::Dispatched { partition_key } => self.on_dispatch(partition_key),
            SchedulerEvent::Completed(result) => self.on_result(result),
        }
    }

    pub fn on_dispatch(&mut self, key: &PartitionKey) {
        self.snapshot.current_partition = Some(key.clone());
        self.publish();
    }

    pub fn on_result(&mut self, result: &FetchResult) {
        self.complete_at(result.record_count() as u64, Instant::now(), Utc::now());
        self.snapshot.memory_usage_mb = resident_mb();
        self.publish();
    }

    /// Clears the shared cell. The tracker is consumed.
    pub fn finish(self) -> ProgressSnapshot {
        self.cell.clear();
        self.snapshot
    }

    fn complete_at(&mut self, records: u64, now: Instant, wall_now: DateTime<Utc>) {
        let s = &mut self.snapshot;
        s.completed_partitions += 1;
        s.total_records += records;

        let dt = now.saturating_duration_since(self.last_completion).as_secs_f64();
        if dt > 0.0 {
            let delta = s.total_records - self.records_at_last_completion;
            s.records_per_second = delta as f64 / dt;
        }
        self.last_completion = now;
        self.records_at_last_completion = s.total_records;

        // Wall-clock average per completed partition, so concurrency is already factored in.
        let elapsed = now.saturating_duration_since(self.started);
        let average = elapsed / s.completed_partitions as u32;
        let remaining = s.remaining_partitions() as u32;
        s.estimated_completion = average
            .checked_mul(remaining)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| wall_now + d);
    }

    fn publish(&self) {
        self.cell.set(Some(self.snapshot.clone()));
        if let Some(tx) = &self.notify {
            // Slow consumers just miss intermediate snapshots.
            let _ = tx.try_send(self.snapshot.clone());
        }
    }
}

/// Human-friendly duration for progress lines, e.g. `1h02m`, `3m05s`, `12s`.
pub fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
