//! Partition keys and the eligibility window.
//!
//! A partition is one independently fetchable slice of the dataset; for an
//! options chain that is one expiration date. Keys come straight from the
//! upstream listing and are kept opaque except for [`PartitionKey::expiration`].

mod filter;

pub use filter::filter;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::InvalidWindowError;

/// Identifier for one independent sub-download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interprets the key as an expiration date, if it looks like one.
    pub fn expiration(&self) -> Option<NaiveDate> {
        parse_date(&self.0)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Reference date plus optional maximum day offset (days-to-expiration).
///
/// The reference date is kept as the caller supplied it; it is validated by
/// [`filter`] and [`PartitionWindow::reference`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWindow {
    pub reference_date: String,
    pub max_offset: Option<u32>,
}

impl PartitionWindow {
    pub fn new(reference_date: impl Into<String>, max_offset: Option<u32>) -> Self {
        Self {
            reference_date: reference_date.into(),
            max_offset,
        }
    }

    /// Parsed reference date, or `InvalidWindowError` if malformed.
    pub fn reference(&self) -> Result<NaiveDate, InvalidWindowError> {
        parse_date(&self.reference_date)
            .ok_or_else(|| InvalidWindowError::ReferenceDate(self.reference_date.clone()))
    }
}

/// Accepts `YYYY-MM-DD` and `YYYYMMDD`.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_expiration_both_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();
        assert_eq!(PartitionKey::new("2024-01-19").expiration(), Some(d));
        assert_eq!(PartitionKey::new("20240119").expiration(), Some(d));
        assert_eq!(PartitionKey::new("weekly-3").expiration(), None);
    }

    #[test]
    fn window_reference_validates() {
        assert!(PartitionWindow::new("2024-01-15", None).reference().is_ok());
        assert_eq!(
            PartitionWindow::new("15/01/2024", None).reference(),
            Err(InvalidWindowError::ReferenceDate("15/01/2024".to_string()))
        );
        assert!(PartitionWindow::new("2024-02-30", Some(1)).reference().is_err());
    }
}
