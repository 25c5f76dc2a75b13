//! Classify fetch errors and HTTP status codes into retry policy error kinds.

use crate::error::FetchError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code),
        _ => ErrorKind::Other,
    }
}

/// Classify an adapter error into an ErrorKind.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Connection(_) => ErrorKind::Connection,
        FetchError::RateLimit { .. } => ErrorKind::Throttled,
        FetchError::Api { status_code, .. } => classify_http_status(*status_code),
        FetchError::Decode(_) | FetchError::Task(_) => ErrorKind::Other,
    }
}
