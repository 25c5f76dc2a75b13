//! Bounded parallel fetch scheduler.
//!
//! Fans out one fetch per partition over a fixed pool of workers pulling from a
//! shared queue, and merges dispatch/completion events into one channel:
//! request queue → workers (≤ concurrency) → `FetchStream` (completion order).

mod parallel;
mod result;

pub use parallel::{FetchStream, ParallelFetchScheduler};
pub use result::{FetchResult, SchedulerEvent};

/// Default number of in-flight fetches. The upstream is slow and rate limited.
pub const DEFAULT_CONCURRENCY: usize = 2;
