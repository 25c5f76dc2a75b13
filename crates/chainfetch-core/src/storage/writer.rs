//! Chunked stage-then-commit CSV writer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{WriteError, WriteErrorKind};
use crate::fetch::Record;
use crate::partition::PartitionKey;

use super::digest::DigestWriter;
use super::naming::{artifact_file_name, partition_dir, temp_path};

/// Position of a chunk within its partition's write sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub partition_key: PartitionKey,
    pub is_first: bool,
    pub is_last: bool,
    pub chunk_index: usize,
}

/// One partition's output file. Mutable only while its chunks are being written;
/// appears in [`WriteSummary::artifacts`] only after the rename to `final_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteArtifact {
    pub partition_key: PartitionKey,
    pub staging_path: PathBuf,
    pub final_path: PathBuf,
    pub header_written: bool,
    pub records_written: u64,
    pub bytes_written: u64,
    /// Hex SHA-256 of the committed file.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    pub partition_key: PartitionKey,
    pub error: String,
}

/// Result of [`ChunkedWriter::finalize`] / [`ChunkedWriter::abort`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub artifacts: Vec<WriteArtifact>,
    /// Rows in committed artifacts.
    pub total_records: u64,
    /// Bytes in committed artifacts (headers included).
    pub total_bytes: u64,
    pub failures: Vec<WriteFailure>,
    /// Partitions whose staging file was discarded by `abort`.
    pub discarded: Vec<PartitionKey>,
}

impl WriteSummary {
    pub fn failed(&self, key: &PartitionKey) -> Option<&WriteFailure> {
        self.failures.iter().find(|f| &f.partition_key == key)
    }

    pub fn artifact(&self, key: &PartitionKey) -> Option<&WriteArtifact> {
        self.artifacts.iter().find(|a| &a.partition_key == key)
    }
}

/// The one open staging file.
struct Staging {
    artifact: WriteArtifact,
    header: Vec<String>,
    /// Header came from the first record, so every field must be in it.
    inferred: bool,
    csv: csv::Writer<DigestWriter<BufWriter<File>>>,
}

/// Writes partitions chunk by chunk with at most one staging file open.
///
/// Calls must be serialized (see [`super::WriterHandle`]). Chunk failures are
/// recorded against their partition and never returned; the partition's
/// remaining chunks are then skipped.
pub struct ChunkedWriter {
    dir: PathBuf,
    columns: Option<Vec<String>>,
    open: Option<Staging>,
    /// Partition whose earlier chunk failed; its later chunks are dropped.
    poisoned: Option<PartitionKey>,
    /// Final paths opened this run, by owning partition.
    claimed: HashMap<PathBuf, PartitionKey>,
    summary: WriteSummary,
}

impl ChunkedWriter {
    /// Output goes to `<output_root>/<reference>/`. `columns` fixes the header
    /// order and other fields are left out; otherwise each partition's header is
    /// its first record's field names, and a later record with a field outside
    /// that header fails the partition.
    pub fn new(output_root: &Path, reference: NaiveDate, columns: Option<Vec<String>>) -> Self {
        Self {
            dir: partition_dir(output_root, reference),
            columns,
            open: None,
            poisoned: None,
            claimed: HashMap::new(),
            summary: WriteSummary::default(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.dir
    }

    /// Partition currently staged, if any.
    pub fn open_partition(&self) -> Option<&PartitionKey> {
        self.open.as_ref().map(|s| &s.artifact.partition_key)
    }

    /// Writes one chunk. Errors are logged and recorded, not returned.
    pub fn write_chunk(&mut self, records: &[Record], meta: &ChunkMeta) {
        if let Err(e) = self.try_write_chunk(records, meta) {
            tracing::warn!(
                partition = %meta.partition_key,
                chunk = meta.chunk_index,
                "{}",
                e
            );
            self.fail(&meta.partition_key, &e, !meta.is_last);
        }
    }

    fn try_write_chunk(&mut self, records: &[Record], meta: &ChunkMeta) -> Result<(), WriteError> {
        let key = &meta.partition_key;
        let wrap = |source: WriteErrorKind| WriteError {
            partition: key.clone(),
            source,
        };

        if meta.is_first {
            if let Some(prev) = self.open_partition().cloned() {
                tracing::warn!(
                    previous = %prev,
                    next = %key,
                    "new partition started before last chunk; committing previous"
                );
                self.commit_open();
            }
            self.poisoned = None;
            let staging = self.open_staging(key, records).map_err(wrap)?;
            self.claimed
                .insert(staging.artifact.final_path.clone(), key.clone());
            self.open = Some(staging);
        } else if self.poisoned.as_ref() == Some(key) {
            tracing::debug!(partition = %key, chunk = meta.chunk_index, "skipping chunk of failed partition");
            if meta.is_last {
                self.poisoned = None;
            }
            return Ok(());
        } else if self.open_partition() != Some(key) {
            return Err(wrap(WriteErrorKind::NoOpenStaging {
                chunk_index: meta.chunk_index,
            }));
        }

        let staging = match self.open.as_mut() {
            Some(s) => s,
            None => {
                return Err(wrap(WriteErrorKind::NoOpenStaging {
                    chunk_index: meta.chunk_index,
                }))
            }
        };
        append_rows(staging, records).map_err(wrap)?;
        tracing::trace!(
            partition = %key,
            chunk = meta.chunk_index,
            rows = records.len(),
            "chunk staged"
        );

        if meta.is_last {
            self.commit_open();
        }
        Ok(())
    }

    /// Creates the date directory and the `.part` file, and writes the header.
    fn open_staging(&self, key: &PartitionKey, first: &[Record]) -> Result<Staging, WriteErrorKind> {
        fs::create_dir_all(&self.dir)?;
        let final_path = self.dir.join(artifact_file_name(key));
        if let Some(owner) = self.claimed.get(&final_path) {
            return Err(WriteErrorKind::NameTaken {
                path: final_path,
                owner: owner.clone(),
            });
        }
        let staging_path = temp_path(&final_path);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging_path)?;

        let header: Vec<String> = match &self.columns {
            Some(cols) => cols.clone(),
            None => first
                .first()
                .map(|r| r.field_names().map(str::to_string).collect())
                .unwrap_or_default(),
        };

        let mut csv = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Necessary)
            .from_writer(DigestWriter::new(BufWriter::new(file)));
        let started = csv
            .write_record(&header)
            .and_then(|_| csv.flush().map_err(csv::Error::from));
        if let Err(e) = started {
            drop(csv);
            let _ = fs::remove_file(&staging_path);
            return Err(e.into());
        }

        Ok(Staging {
            artifact: WriteArtifact {
                partition_key: key.clone(),
                staging_path,
                final_path,
                header_written: true,
                records_written: 0,
                bytes_written: 0,
                sha256: None,
            },
            header,
            inferred: self.columns.is_none(),
            csv,
        })
    }

    /// Commits the open staging file, if any. Failure is recorded against that partition.
    fn commit_open(&mut self) {
        let Some(staging) = self.open.take() else {
            return;
        };
        let key = staging.artifact.partition_key.clone();
        match commit(staging) {
            Ok(artifact) => {
                tracing::info!(
                    partition = %key,
                    rows = artifact.records_written,
                    bytes = artifact.bytes_written,
                    path = %artifact.final_path.display(),
                    "partition committed"
                );
                self.summary.total_records += artifact.records_written;
                self.summary.total_bytes += artifact.bytes_written;
                self.summary.artifacts.push(artifact);
            }
            Err((staging_path, source)) => {
                let e = WriteError {
                    partition: key.clone(),
                    source,
                };
                tracing::warn!(partition = %key, "{}", e);
                let _ = fs::remove_file(&staging_path);
                self.summary.failures.push(WriteFailure {
                    partition_key: key,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Drops the partition's staging file (if it is the open one) and records the failure.
    fn fail(&mut self, key: &PartitionKey, e: &WriteError, more_chunks_expected: bool) {
        if self.open_partition() == Some(key) {
            if let Some(staging) = self.open.take() {
                discard(staging);
            }
        }
        if self.summary.failed(key).is_none() {
            self.summary.failures.push(WriteFailure {
                partition_key: key.clone(),
                error: e.to_string(),
            });
        }
        self.poisoned = more_chunks_expected.then(|| key.clone());
    }

    /// Commits any still-open staging file and returns the run's write summary.
    pub fn finalize(mut self) -> WriteSummary {
        if let Some(key) = self.open_partition() {
            tracing::debug!(partition = %key, "finalize: committing open staging file");
        }
        self.commit_open();
        self.summary
    }

    /// Discards any open staging file without committing it (interrupt path).
    pub fn abort(mut self) -> WriteSummary {
        if let Some(staging) = self.open.take() {
            let key = staging.artifact.partition_key.clone();
            tracing::info!(partition = %key, "discarding uncommitted staging file");
            discard(staging);
            self.summary.discarded.push(key);
        }
        self.summary
    }
}

fn append_rows(staging: &mut Staging, records: &[Record]) -> Result<(), WriteErrorKind> {
    let mut row: Vec<String> = Vec::with_capacity(staging.header.len());
    for record in records {
        if staging.inferred {
            let unknown: BTreeSet<&str> = record
                .field_names()
                .filter(|name| !staging.header.iter().any(|col| col == name))
                .collect();
            if !unknown.is_empty() {
                return Err(WriteErrorKind::UnknownColumns {
                    columns: unknown.into_iter().map(str::to_string).collect(),
                });
            }
        }
        row.clear();
        row.extend(
            staging
                .header
                .iter()
                .map(|col| record.get(col).map(|v| v.to_cell()).unwrap_or_default()),
        );
        staging.csv.write_record(&row)?;
    }
    staging.csv.flush()?;
    staging.artifact.records_written += records.len() as u64;
    staging.artifact.bytes_written = staging.csv.get_ref().bytes();
    Ok(())
}

/// Flush, fsync, rename `.part` → final.
fn commit(staging: Staging) -> Result<WriteArtifact, (PathBuf, WriteErrorKind)> {
    let Staging {
        mut artifact, csv, ..
    } = staging;
    let staging_path = artifact.staging_path.clone();
    let fail = |e: WriteErrorKind| (staging_path.clone(), e);

    let digest = csv
        .into_inner()
        .map_err(|e| fail(WriteErrorKind::Io(e.into_error())))?;
    artifact.bytes_written = digest.bytes();
    let (sha256, buffered) = digest.finish();
    let file = buffered
        .into_inner()
        .map_err(|e| fail(WriteErrorKind::Io(e.into_error())))?;
    file.sync_all().map_err(|e| fail(e.into()))?;
    drop(file);

    fs::rename(&artifact.staging_path, &artifact.final_path).map_err(|e| fail(e.into()))?;
    artifact.sha256 = Some(sha256);
    Ok(artifact)
}

fn discard(staging: Staging) {
    let path = staging.artifact.staging_path.clone();
    drop(staging);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "could not remove staging file: {}", e),
    }
}
