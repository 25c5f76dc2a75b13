//! JSON-over-HTTP upstream adapter built on libcurl.
//!
//! `GET {base}/partitions` returns a JSON array of partition keys;
//! `GET {base}/records?partition=..&reference_date=..&interval=..&trading_hours_only=..`
//! returns a JSON array of flat objects, one per record.
//! Each call runs on a blocking thread (`spawn_blocking`). Dropping the
//! calling future (e.g. an aborted worker) stops the transfer at the next
//! curl callback.

use async_trait::async_trait;
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::FetchError;
use crate::partition::PartitionKey;

use super::{FetchAdapter, FetchRequest, Record};

/// Connection settings for [`HttpAdapter`].
#[derive(Debug, Clone)]
pub struct HttpAdapterOptions {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Whole-request timeout; slow partitions are expected, so keep this generous.
    pub timeout: Duration,
}

impl Default for HttpAdapterOptions {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:25510/".to_string(),
            connect_timeout: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpAdapter {
    base: Url,
    opts: HttpAdapterOptions,
}

/// Raw response: status, header lines, body.
struct Response {
    code: u16,
    headers: Vec<String>,
    body: Vec<u8>,
}

impl HttpAdapter {
    pub fn new(opts: HttpAdapterOptions) -> Result<Self, url::ParseError> {
        let mut base = opts.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            base: Url::parse(&base)?,
            opts,
        })
    }

    fn partitions_url(&self) -> Result<Url, FetchError> {
        self.base
            .join("partitions")
            .map_err(|e| FetchError::Connection(format!("invalid URL: {e}")))
    }

    fn records_url(&self, request: &FetchRequest) -> Result<Url, FetchError> {
        let mut url = self
            .base
            .join("records")
            .map_err(|e| FetchError::Connection(format!("invalid URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("partition", request.partition_key.as_str())
            .append_pair("reference_date", &request.reference_date)
            .append_pair("interval", &request.interval)
            .append_pair(
                "trading_hours_only",
                if request.trading_hours_only { "true" } else { "false" },
            );
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let opts = self.opts.clone();
        let abort = AbortOnDrop::default();
        let flag = Arc::clone(&abort.0);
        let resp = tokio::task::spawn_blocking(move || perform_get(url.as_str(), &opts, &flag))
            .await
            .map_err(|e| FetchError::Connection(format!("request task join: {e}")))??;
        check_status(resp)
    }
}

/// Raises the abort flag when the owning future goes away.
#[derive(Default)]
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Runs a blocking GET. Curl-level failures map to `Connection`.
/// Returns early with `Connection("aborted")` once `abort` is set.
fn perform_get(
    url: &str,
    opts: &HttpAdapterOptions,
    abort: &AtomicBool,
) -> Result<Response, FetchError> {
    let conn = |e: curl::Error| FetchError::Connection(e.to_string());

    let mut headers: Vec<String> = Vec::new();
    let mut body: Vec<u8> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(conn)?;
    easy.get(true).map_err(conn)?;
    easy.follow_location(true).map_err(conn)?;
    easy.connect_timeout(opts.connect_timeout).map_err(conn)?;
    easy.timeout(opts.timeout).map_err(conn)?;
    easy.accept_encoding("").map_err(conn)?;
    // Progress callbacks fire even while the socket is idle.
    easy.progress(true).map_err(conn)?;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    headers.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(conn)?;
        transfer
            .write_function(|data| {
                if abort.load(Ordering::Relaxed) {
                    return Ok(0); // abort transfer
                }
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(conn)?;
        transfer
            .progress_function(|_, _, _, _| !abort.load(Ordering::Relaxed))
            .map_err(conn)?;
        if let Err(e) = transfer.perform() {
            if abort.load(Ordering::Relaxed) {
                return Err(FetchError::Connection("aborted".into()));
            }
            return Err(conn(e));
        }
    }

    let code = easy.response_code().map_err(conn)? as u16;
    Ok(Response {
        code,
        headers,
        body,
    })
}

/// Maps non-2xx responses onto the fetch error taxonomy.
fn check_status(resp: Response) -> Result<Vec<u8>, FetchError> {
    match resp.code {
        200..=299 => Ok(resp.body),
        429 => Err(FetchError::RateLimit {
            retry_after: parse_retry_after(&resp.headers),
        }),
        code => {
            let mut message = String::from_utf8_lossy(&resp.body).trim().to_string();
            message.truncate(200);
            Err(FetchError::Api {
                status_code: code,
                message,
            })
        }
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(lines: &[String]) -> Option<Duration> {
    lines.iter().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("retry-after") {
            return None;
        }
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    })
}

fn parse_partitions(body: &[u8]) -> Result<Vec<PartitionKey>, FetchError> {
    let keys: Vec<String> =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(keys.into_iter().map(PartitionKey::new).collect())
}

fn parse_records(body: &[u8]) -> Result<Vec<Record>, FetchError> {
    let rows: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(rows.into_iter().map(Record::from).collect())
}

#[async_trait]
impl FetchAdapter for HttpAdapter {
    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, FetchError> {
        let body = self.get(self.partitions_url()?).await?;
        parse_partitions(&body)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let url = self.records_url(request)?;
        tracing::debug!(partition = %request.partition_key, %url, "fetching partition");
        let body = self.get(url).await?;
        parse_records(&body)
    }
}
