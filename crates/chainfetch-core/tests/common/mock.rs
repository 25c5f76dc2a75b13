//! In-process adapters for pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chainfetch_core::error::FetchError;
use chainfetch_core::fetch::{FetchAdapter, FetchRequest, FieldValue, Record};
use chainfetch_core::partition::PartitionKey;

/// `n` quote-like rows for partition `key`.
pub fn quotes(key: &str, n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Record::new()
                .with("expiration", FieldValue::Text(key.to_string()))
                .with("ms_of_day", FieldValue::Int(34_200_000 + 60_000 * i as i64))
                .with("bid", FieldValue::Float(1.25))
                .with("ask", FieldValue::Float(1.3))
        })
        .collect()
}

enum Behavior {
    Records(Vec<Record>),
    Fail(FetchError),
    /// Never returns (until the fetch task is aborted).
    Hang,
}

/// Serves canned responses per partition with an optional fixed delay.
pub struct MockAdapter {
    listing: Result<Vec<PartitionKey>, FetchError>,
    behaviors: HashMap<PartitionKey, Behavior>,
    delay: Duration,
    pub fetches: AtomicUsize,
}

impl MockAdapter {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            listing: Ok(keys.iter().map(|k| PartitionKey::new(*k)).collect()),
            behaviors: HashMap::new(),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing_listing(error: FetchError) -> Self {
        Self {
            listing: Err(error),
            ..Self::new(&[])
        }
    }

    pub fn records(mut self, key: &str, records: Vec<Record>) -> Self {
        self.behaviors
            .insert(PartitionKey::new(key), Behavior::Records(records));
        self
    }

    pub fn fail(mut self, key: &str, error: FetchError) -> Self {
        self.behaviors.insert(PartitionKey::new(key), Behavior::Fail(error));
        self
    }

    pub fn hang(mut self, key: &str) -> Self {
        self.behaviors.insert(PartitionKey::new(key), Behavior::Hang);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl FetchAdapter for MockAdapter {
    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, FetchError> {
        self.listing.clone()
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behaviors.get(&request.partition_key) {
            Some(Behavior::Records(records)) => Ok(records.clone()),
            Some(Behavior::Fail(error)) => Err(error.clone()),
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}
