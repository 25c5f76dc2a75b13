//! Retry and backoff policy for upstream fetches.
//!
//! Classifies [`FetchError`](crate::error::FetchError)s (connection failures,
//! throttling, 5xx) and computes capped exponential backoff. Used by
//! [`RetryingAdapter`](crate::fetch::RetryingAdapter); the scheduler itself never retries.

mod classify;
mod policy;

pub use classify::{classify, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
