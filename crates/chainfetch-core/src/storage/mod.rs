//! Durable per-partition output.
//!
//! Each partition is streamed into `<root>/<YYYY-MM-DD>/<key>.csv.part`, one chunk
//! at a time, and atomically renamed to `<key>.csv` once its last chunk lands.
//! A single [`ChunkedWriter`] owns the one open staging file; [`WriterHandle`]
//! funnels every call into it from one blocking task.

mod digest;
mod handoff;
mod naming;
mod writer;

pub use handoff::WriterHandle;
pub use naming::{artifact_file_name, partition_dir, sanitize_file_name, temp_path, TEMP_SUFFIX};
pub use writer::{ChunkMeta, ChunkedWriter, WriteArtifact, WriteFailure, WriteSummary};
