use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::{FetchSettings, HttpAdapterOptions};

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per partition fetch (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds; also caps server `Retry-After` hints.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Where the upstream service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        let opts = HttpAdapterOptions::default();
        Self {
            base_url: opts.base_url,
            connect_timeout_secs: opts.connect_timeout.as_secs(),
            timeout_secs: opts.timeout.as_secs(),
        }
    }
}

impl UpstreamConfig {
    pub fn adapter_options(&self) -> HttpAdapterOptions {
        HttpAdapterOptions {
            base_url: self.base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Global configuration loaded from `~/.config/chainfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainfetchConfig {
    /// Maximum number of partition fetches in flight at once.
    pub concurrency: usize,
    /// Records per write chunk; bounds writer memory per partition.
    pub chunk_size: usize,
    /// Bar interval passed to the upstream.
    pub interval: String,
    /// Restrict fetched data to regular trading hours.
    pub trading_hours_only: bool,
    /// Output root; per-reference-date directories are created below it. Defaults to the cwd.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Maximum days-to-expiration; None = every listed partition.
    #[serde(default)]
    pub max_dte: Option<u32>,
    /// Fixed CSV column order. None = field names of the first record, sorted.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Run history database. None = `~/.local/state/chainfetch/runs.db`.
    #[serde(default)]
    pub metrics_db: Option<PathBuf>,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ChainfetchConfig {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        Self {
            concurrency: crate::scheduler::DEFAULT_CONCURRENCY,
            chunk_size: 1000,
            interval: fetch.interval,
            trading_hours_only: fetch.trading_hours_only,
            output_dir: None,
            max_dte: None,
            columns: None,
            metrics_db: None,
            upstream: UpstreamConfig::default(),
            retry: None,
        }
    }
}

impl ChainfetchConfig {
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            interval: self.interval.clone(),
            trading_hours_only: self.trading_hours_only,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("chainfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ChainfetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ChainfetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ChainfetchConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
