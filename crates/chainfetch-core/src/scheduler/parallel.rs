//! Worker pool and the completion-ordered result stream.
//!
//! Keeps up to `concurrency` fetches running at once; when one finishes, that
//! worker immediately takes the next queued request until the queue is empty.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::FetchError;
use crate::fetch::{FetchAdapter, FetchRequest};

use super::result::{FetchResult, SchedulerEvent};

/// Spawns bounded fan-out over a [`FetchAdapter`]. Never retries; adapter errors
/// become [`FetchResult::Failure`].
#[derive(Clone)]
pub struct ParallelFetchScheduler {
    adapter: Arc<dyn FetchAdapter>,
    concurrency: usize,
}

impl ParallelFetchScheduler {
    /// `concurrency` is clamped to at least 1.
    pub fn new(adapter: Arc<dyn FetchAdapter>, concurrency: usize) -> Self {
        Self {
            adapter,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Starts fetching `requests` and returns the stream of events. Must be
    /// called inside a tokio runtime. Nothing is dispatched beyond the pool size
    /// until the consumer drains results (bounded channel).
    pub fn spawn(&self, requests: Vec<FetchRequest>) -> FetchStream {
        let total = requests.len();
        let num_workers = self.concurrency.min(total);
        let queue: Arc<Mutex<VecDeque<FetchRequest>>> =
            Arc::new(Mutex::new(requests.into_iter().collect()));
        // Room for one Dispatched + one Completed per worker.
        let (tx, rx) = mpsc::channel(num_workers.max(1) * 2);

        let mut workers = JoinSet::new();
        for worker_id in 0..num_workers {
            let queue = Arc::clone(&queue);
            let adapter = Arc::clone(&self.adapter);
            let tx = tx.clone();
            workers.spawn(worker_loop(worker_id, queue, adapter, tx));
        }
        drop(tx);

        tracing::debug!(total, workers = num_workers, "fetch scheduler started");
        FetchStream {
            rx,
            workers,
            total,
            completed: 0,
        }
    }
}

/// Aborts the wrapped task when dropped so cancelled workers leave no fetch behind.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn next_request(queue: &Mutex<VecDeque<FetchRequest>>) -> Option<FetchRequest> {
    match queue.lock() {
        Ok(mut q) => q.pop_front(),
        // A worker can only poison the lock by panicking while popping; the queue itself is intact.
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<FetchRequest>>>,
    adapter: Arc<dyn FetchAdapter>,
    tx: mpsc::Sender<SchedulerEvent>,
) {
    while let Some(request) = next_request(&queue) {
        let key = request.partition_key.clone();
        if tx
            .send(SchedulerEvent::Dispatched {
                partition_key: key.clone(),
            })
            .await
            .is_err()
        {
            // Consumer is gone.
            return;
        }
        tracing::debug!(worker_id, partition = %key, "dispatching fetch");

        let started = Instant::now();
        let adapter = Arc::clone(&adapter);
        let mut fetch = AbortOnDrop(tokio::spawn(async move { adapter.fetch(&request).await }));
        let outcome = (&mut fetch.0).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(records)) => {
                tracing::info!(partition = %key, records = records.len(), elapsed_ms, "partition fetched");
                FetchResult::success(key, records, elapsed_ms)
            }
            Ok(Err(error)) => {
                tracing::warn!(partition = %key, elapsed_ms, "partition fetch failed: {}", error);
                FetchResult::Failure {
                    partition_key: key,
                    error,
                    elapsed_ms,
                }
            }
            Err(join_err) => {
                tracing::error!(partition = %key, "fetch task died: {}", join_err);
                FetchResult::Failure {
                    partition_key: key,
                    error: FetchError::Task(join_err.to_string()),
                    elapsed_ms,
                }
            }
        };

        if tx.send(SchedulerEvent::Completed(result)).await.is_err() {
            return;
        }
    }
}

/// Lazy, single-pass, completion-ordered sequence of scheduler events.
///
/// Yields exactly one [`SchedulerEvent::Completed`] per submitted request, each
/// preceded by its `Dispatched` event. Dropping the stream aborts every worker
/// and any fetch still in flight.
pub struct FetchStream {
    rx: mpsc::Receiver<SchedulerEvent>,
    workers: JoinSet<()>,
    total: usize,
    completed: usize,
}

impl FetchStream {
    /// Next event, or `None` once every request has completed.
    pub async fn next(&mut self) -> Option<SchedulerEvent> {
        if self.completed >= self.total {
            return None;
        }
        let event = self.rx.recv().await?;
        if matches!(event, SchedulerEvent::Completed(_)) {
            self.completed += 1;
        }
        Some(event)
    }

    /// Next completed result, skipping dispatch notifications.
    pub async fn next_result(&mut self) -> Option<FetchResult> {
        loop {
            match self.next().await? {
                SchedulerEvent::Completed(result) => return Some(result),
                SchedulerEvent::Dispatched { .. } => continue,
            }
        }
    }

    /// Number of requests submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of results yielded so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Stops all workers and waits for them to exit. In-flight fetches are aborted.
    pub async fn shutdown(mut self) {
        self.rx.close();
        self.workers.shutdown().await;
        tracing::debug!(
            completed = self.completed,
            total = self.total,
            "fetch scheduler shut down"
        );
    }
}
