//! Single-writer hand-off: all writer calls run on one blocking task, fed in FIFO order.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::fetch::Record;

use super::writer::{ChunkMeta, ChunkedWriter, WriteSummary};

enum WriteCommand {
    Chunk {
        records: Vec<Record>,
        meta: ChunkMeta,
    },
    Finish {
        abort: bool,
        reply: oneshot::Sender<WriteSummary>,
    },
}

/// Async front for a [`ChunkedWriter`] living on a blocking thread.
///
/// `write_chunk` only waits for channel capacity, so the driver can keep
/// draining fetch results while the disk catches up. Dropping the handle
/// without `finalize` aborts the writer (staging files are discarded).
pub struct WriterHandle {
    tx: mpsc::Sender<WriteCommand>,
    task: JoinHandle<()>,
}

impl WriterHandle {
    /// Moves `writer` onto a blocking task with a command queue of `capacity` chunks.
    pub fn spawn(writer: ChunkedWriter, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteCommand>(capacity.max(1));
        let task = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    WriteCommand::Chunk { records, meta } => writer.write_chunk(&records, &meta),
                    WriteCommand::Finish { abort, reply } => {
                        let summary = if abort {
                            writer.abort()
                        } else {
                            writer.finalize()
                        };
                        let _ = reply.send(summary);
                        return;
                    }
                }
            }
            tracing::debug!("writer channel closed without finish; aborting");
            writer.abort();
        });
        Self { tx, task }
    }

    pub async fn write_chunk(&self, records: Vec<Record>, meta: ChunkMeta) -> Result<(), PipelineError> {
        self.tx
            .send(WriteCommand::Chunk { records, meta })
            .await
            .map_err(|_| PipelineError::WriterGone)
    }

    /// Commits any open staging file and waits for the writer to drain.
    pub async fn finalize(self) -> Result<WriteSummary, PipelineError> {
        self.finish(false).await
    }

    /// Discards any open staging file and waits for the writer to drain.
    pub async fn abort(self) -> Result<WriteSummary, PipelineError> {
        self.finish(true).await
    }

    async fn finish(self, abort: bool) -> Result<WriteSummary, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::Finish { abort, reply })
            .await
            .map_err(|_| PipelineError::WriterGone)?;
        let summary = rx.await.map_err(|_| PipelineError::WriterGone)?;
        let _ = self.task.await;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FieldValue;
    use crate::partition::PartitionKey;
    use chrono::NaiveDate;

    fn meta(key: &str, index: usize, first: bool, last: bool) -> ChunkMeta {
        ChunkMeta {
            partition_key: PartitionKey::new(key),
            is_first: first,
            is_last: last,
            chunk_index: index,
        }
    }

    fn rows(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new().with("seq", FieldValue::Int(i as i64)))
            .collect()
    }

    #[tokio::test]
    async fn chunks_arrive_in_order_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let handle = WriterHandle::spawn(ChunkedWriter::new(dir.path(), date, None), 1);
        let records = rows(25);
        for (i, chunk) in records.chunks(10).enumerate() {
            handle
                .write_chunk(chunk.to_vec(), meta("20240119", i, i == 0, i == 2))
                .await
                .unwrap();
        }
        let summary = handle.finalize().await.unwrap();
        assert_eq!(summary.total_records, 25);
        let body = std::fs::read_to_string(&summary.artifacts[0].final_path).unwrap();
        let seqs: Vec<&str> = body.lines().skip(1).collect();
        let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn abort_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let handle = WriterHandle::spawn(ChunkedWriter::new(dir.path(), date, None), 4);
        handle
            .write_chunk(rows(3), meta("20240119", 0, true, false))
            .await
            .unwrap();
        let summary = handle.abort().await.unwrap();
        assert!(summary.artifacts.is_empty());
        assert_eq!(summary.discarded.len(), 1);
        let left = std::fs::read_dir(dir.path().join("2024-01-15")).unwrap().count();
        assert_eq!(left, 0);
    }
}
