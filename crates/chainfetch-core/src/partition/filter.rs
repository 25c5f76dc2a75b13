//! Partition eligibility filter (days-to-expiration window).

use super::{PartitionKey, PartitionWindow};
use crate::error::InvalidWindowError;

/// Keeps the keys whose whole-day offset from the window's reference date lies
/// in `[0, max_offset]`. With no `max_offset` every key is kept.
///
/// Input order is preserved. When `max_offset` is set, keys that are not dates
/// cannot be placed in the window and are dropped.
pub fn filter(
    keys: &[PartitionKey],
    window: &PartitionWindow,
) -> Result<Vec<PartitionKey>, InvalidWindowError> {
    let reference = window.reference()?;
    let Some(max_offset) = window.max_offset else {
        return Ok(keys.to_vec());
    };
    let max_offset = i64::from(max_offset);

    let kept = keys
        .iter()
        .filter(|key| match key.expiration() {
            Some(exp) => {
                let offset = (exp - reference).num_days();
                (0..=max_offset).contains(&offset)
            }
            None => {
                tracing::debug!(partition = %key, "partition key is not a date; outside window");
                false
            }
        })
        .cloned()
        .collect();
    Ok(kept)
}
