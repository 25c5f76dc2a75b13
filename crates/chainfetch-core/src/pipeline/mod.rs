//! Orchestration: filter → bounded fetch → chunked write, observed by progress and metrics.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::fetch::{FetchAdapter, FetchSettings, Record};
use crate::metrics::{MetricsRecorder, RunMetrics, RunSink};
use crate::partition::{self, PartitionKey, PartitionWindow};
use crate::progress::{ProgressCell, ProgressSnapshot, ProgressTracker};
use crate::scheduler::{FetchResult, ParallelFetchScheduler, SchedulerEvent};
use crate::storage::{ChunkMeta, ChunkedWriter, WriteSummary, WriterHandle};

/// Chunks queued ahead of the writer before the driver waits.
const WRITE_QUEUE_CHUNKS: usize = 4;

/// Splits a partition's records into consecutive owned chunks of at most
/// `chunk_size` (0 is treated as 1). Yields `ceil(len / chunk_size)` chunks.
pub fn chunks(records: Vec<Record>, chunk_size: usize) -> impl Iterator<Item = Vec<Record>> {
    let size = chunk_size.max(1);
    let mut rest = records.into_iter();
    std::iter::from_fn(move || {
        let chunk: Vec<Record> = rest.by_ref().take(size).collect();
        (!chunk.is_empty()).then_some(chunk)
    })
}

/// Drops repeated keys, keeping the first occurrence. Returns how many were dropped.
fn dedup_keys(keys: &mut Vec<PartitionKey>) -> usize {
    let before = keys.len();
    let mut seen = HashSet::with_capacity(before);
    keys.retain(|k| seen.insert(k.clone()));
    before - keys.len()
}

/// Entry point for a data-acquisition run.
///
/// ```ignore
/// let pipeline = Pipeline::new(adapter, FetchSettings::default()).with_sink(store);
/// let metrics = pipeline.run(&PartitionWindow::new("2024-01-15", Some(30)), 2, 1000, out).await?;
/// ```
pub struct Pipeline {
    adapter: Arc<dyn FetchAdapter>,
    settings: FetchSettings,
    columns: Option<Vec<String>>,
    sink: Option<Arc<dyn RunSink>>,
    progress_tx: Option<mpsc::Sender<ProgressSnapshot>>,
    cancel: CancellationToken,
    progress: ProgressCell,
}

impl Pipeline {
    pub fn new(adapter: Arc<dyn FetchAdapter>, settings: FetchSettings) -> Self {
        Self {
            adapter,
            settings,
            columns: None,
            sink: None,
            progress_tx: None,
            cancel: CancellationToken::new(),
            progress: ProgressCell::new(),
        }
    }

    /// Fixed CSV column order for every partition.
    pub fn with_columns(mut self, columns: Option<Vec<String>>) -> Self {
        self.columns = columns;
        self
    }

    /// Where sealed run metrics go. Without a sink they are only returned.
    pub fn with_sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Also push each progress snapshot to `tx` (dropped when the channel is full).
    pub fn with_progress_channel(mut self, tx: mpsc::Sender<ProgressSnapshot>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancelling this token interrupts a running [`Pipeline::run`] gracefully.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live snapshot of the active run, if any.
    pub fn current_progress(&self) -> Option<ProgressSnapshot> {
        self.progress.get()
    }

    /// Downloads every eligible partition of `window` into `output_dir`.
    ///
    /// Fails only on bad input, an unreachable partition listing, an unusable
    /// output root, or a dead writer task. Per-partition failures and
    /// interruption are reported in the returned [`RunMetrics`].
    pub async fn run(
        &self,
        window: &PartitionWindow,
        concurrency: usize,
        chunk_size: usize,
        output_dir: &Path,
    ) -> Result<RunMetrics, PipelineError> {
        let result = self.run_inner(window, concurrency, chunk_size, output_dir).await;
        self.progress.clear();
        result
    }

    async fn run_inner(
        &self,
        window: &PartitionWindow,
        concurrency: usize,
        chunk_size: usize,
        output_dir: &Path,
    ) -> Result<RunMetrics, PipelineError> {
        let reference = window.reference()?;
        if chunk_size == 0 {
            return Err(PipelineError::InvalidChunkSize);
        }
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| PipelineError::OutputRoot {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let concurrency = concurrency.max(1);
        let reference_date = reference.format("%Y-%m-%d").to_string();
        // Run history is keyed on the normalized date.
        let normalized = PartitionWindow::new(reference_date.clone(), window.max_offset);
        let mut recorder = MetricsRecorder::begin(&normalized, concurrency, chunk_size);
        let run_id = recorder.run_id();
        tracing::info!(
            %run_id,
            reference_date = %reference,
            max_offset = ?window.max_offset,
            concurrency,
            chunk_size,
            "run started"
        );

        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            listed = self.adapter.list_partitions() => Some(listed),
        };
        let Some(listed) = listed else {
            tracing::info!(%run_id, "run interrupted before partitions were listed");
            return Ok(self
                .seal(recorder, &WriteSummary::default(), true)
                .await);
        };
        let all_keys = listed.map_err(PipelineError::Listing)?;
        let mut keys = partition::filter(&all_keys, window)?;
        let duplicates = dedup_keys(&mut keys);
        if duplicates > 0 {
            tracing::warn!(%run_id, duplicates, "listing repeated partition keys; fetching each once");
        }
        tracing::info!(
            %run_id,
            listed = all_keys.len(),
            eligible = keys.len(),
            "partitions selected"
        );
        recorder.set_total(keys.len());

        let requests = keys
            .iter()
            .map(|k| self.settings.request_for(k, &reference_date))
            .collect();

        let mut tracker =
            ProgressTracker::start(self.progress.clone(), self.progress_tx.clone(), keys.len());
        let mut pending: HashSet<PartitionKey> = keys.into_iter().collect();

        let scheduler = ParallelFetchScheduler::new(Arc::clone(&self.adapter), concurrency);
        let mut stream = scheduler.spawn(requests);
        let writer = WriterHandle::spawn(
            ChunkedWriter::new(output_dir, reference, self.columns.clone()),
            WRITE_QUEUE_CHUNKS,
        );

        let mut interrupted = false;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            tracker.observe(&event);

            let SchedulerEvent::Completed(result) = event else {
                continue;
            };
            recorder.record_fetch(&result);
            recorder.observe_memory(tracker.snapshot().memory_usage_mb);

            match result {
                FetchResult::Success {
                    partition_key,
                    records,
                    ..
                } => {
                    if !self
                        .write_partition(&writer, &partition_key, records, chunk_size)
                        .await?
                    {
                        interrupted = true;
                        break;
                    }
                    pending.remove(&partition_key);
                }
                FetchResult::Failure { partition_key, .. } => {
                    pending.remove(&partition_key);
                }
            }
        }

        stream.shutdown().await;
        let writes = if interrupted {
            let summary = writer.abort().await?;
            let mut unfinished: Vec<&PartitionKey> = pending.iter().collect();
            unfinished.sort();
            tracing::warn!(%run_id, unfinished = unfinished.len(), "run interrupted");
            for key in unfinished {
                recorder.record_interrupted(key);
            }
            summary
        } else {
            writer.finalize().await?
        };
        tracker.finish();

        Ok(self.seal(recorder, &writes, interrupted).await)
    }

    /// Sends one partition's chunks to the writer in order. Returns false if
    /// the run was cancelled before the last chunk was queued.
    async fn write_partition(
        &self,
        writer: &WriterHandle,
        key: &PartitionKey,
        records: Vec<Record>,
        chunk_size: usize,
    ) -> Result<bool, PipelineError> {
        let total = records.len().div_ceil(chunk_size);
        if total == 0 {
            tracing::debug!(partition = %key, "no records; nothing to write");
            return Ok(true);
        }
        for (chunk_index, chunk) in chunks(records, chunk_size).enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            let meta = ChunkMeta {
                partition_key: key.clone(),
                is_first: chunk_index == 0,
                is_last: chunk_index + 1 == total,
                chunk_index,
            };
            writer.write_chunk(chunk, meta).await?;
        }
        Ok(true)
    }

    /// Seals the metrics and hands them to the sink. Persistence errors are only logged.
    async fn seal(&self, recorder: MetricsRecorder, writes: &WriteSummary, interrupted: bool) -> RunMetrics {
        let metrics = recorder.seal(writes, interrupted);
        tracing::info!(
            run_id = %metrics.run_id,
            total = metrics.total_partitions,
            successful = metrics.successful_partitions,
            failed = metrics.failed_partitions,
            records = metrics.total_records,
            bytes = metrics.total_bytes,
            duration_ms = metrics.duration_ms,
            interrupted,
            "run finished"
        );
        for o in metrics.failures() {
            tracing::debug!(
                partition = %o.partition_key,
                error = o.error.as_deref().unwrap_or(""),
                "partition failed"
            );
        }
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.persist_run(&metrics).await {
                tracing::warn!(run_id = %metrics.run_id, "could not persist run metrics: {}", e);
            }
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FieldValue;

    fn numbered(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new().with("i", FieldValue::Int(i as i64)))
            .collect()
    }

    #[test]
    fn repeated_keys_keep_first_occurrence() {
        let mut keys: Vec<PartitionKey> = ["20240126", "20240119", "20240126", "20240202", "20240119"]
            .into_iter()
            .map(PartitionKey::new)
            .collect();
        assert_eq!(dedup_keys(&mut keys), 2);
        let order: Vec<&str> = keys.iter().map(PartitionKey::as_str).collect();
        assert_eq!(order, ["20240126", "20240119", "20240202"]);
    }

    #[test]
    fn chunk_sizes_cover_all_records_in_order() {
        let sizes: Vec<usize> = chunks(numbered(250), 100).map(|c| c.len()).collect();
        assert_eq!(sizes, [100, 100, 50]);

        let sizes: Vec<usize> = chunks(numbered(250), 250).map(|c| c.len()).collect();
        assert_eq!(sizes, [250]);

        assert_eq!(chunks(numbered(250), 7).count(), 250usize.div_ceil(7));
        assert_eq!(chunks(Vec::new(), 100).count(), 0);

        let flat: Vec<Record> = chunks(numbered(25), 10).flatten().collect();
        assert_eq!(flat, numbered(25));
    }
}
