//! Adapter decorator that retries classified failures with backoff.

use async_trait::async_trait;
use std::future::Future;

use crate::error::FetchError;
use crate::partition::PartitionKey;
use crate::retry::{classify, RetryDecision, RetryPolicy};

use super::{FetchAdapter, FetchRequest, Record};

/// Wraps another adapter and re-runs failed calls until they succeed or the
/// [`RetryPolicy`] says stop. The final error is returned unchanged.
pub struct RetryingAdapter<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: FetchAdapter> RetryingAdapter<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    async fn run_with_retry<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1u32;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let kind = classify(&e);
                    let hint = match &e {
                        FetchError::RateLimit { retry_after } => *retry_after,
                        _ => None,
                    };
                    match self.policy.decide_with_hint(attempt, kind, hint) {
                        RetryDecision::NoRetry => return Err(e),
                        RetryDecision::RetryAfter(d) => {
                            tracing::warn!(
                                op = what,
                                attempt,
                                delay_ms = d.as_millis() as u64,
                                "retrying after error: {}",
                                e
                            );
                            tokio::time::sleep(d).await;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<A: FetchAdapter> FetchAdapter for RetryingAdapter<A> {
    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, FetchError> {
        self.run_with_retry("list_partitions", || self.inner.list_partitions())
            .await
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        self.run_with_retry(request.partition_key.as_str(), || self.inner.fetch(request))
            .await
    }
}
