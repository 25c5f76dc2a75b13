//! Upstream fetch capability consumed by the pipeline.
//!
//! The core only ever talks to a [`FetchAdapter`]. Retry policy lives in
//! adapters ([`RetryingAdapter`]), never in the scheduler.

mod http;
mod record;
mod retrying;

pub use http::{HttpAdapter, HttpAdapterOptions};
pub use record::{FieldValue, Record};
pub use retrying::RetryingAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::partition::PartitionKey;

/// Everything the adapter needs to fetch one partition. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub partition_key: PartitionKey,
    pub reference_date: String,
    /// Bar interval understood by the upstream (e.g. "1m").
    pub interval: String,
    pub trading_hours_only: bool,
}

/// Request parameters shared by every partition of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub interval: String,
    pub trading_hours_only: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            interval: "1m".to_string(),
            trading_hours_only: true,
        }
    }
}

impl FetchSettings {
    pub fn request_for(&self, key: &PartitionKey, reference_date: &str) -> FetchRequest {
        FetchRequest {
            partition_key: key.clone(),
            reference_date: reference_date.to_string(),
            interval: self.interval.clone(),
            trading_hours_only: self.trading_hours_only,
        }
    }
}

/// Capability to enumerate and download partitions.
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    /// All partition keys the upstream currently offers.
    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, FetchError>;

    /// Downloads every record of one partition.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError>;
}

#[async_trait]
impl<A: FetchAdapter + ?Sized> FetchAdapter for std::sync::Arc<A> {
    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, FetchError> {
        (**self).list_partitions().await
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        (**self).fetch(request).await
    }
}
