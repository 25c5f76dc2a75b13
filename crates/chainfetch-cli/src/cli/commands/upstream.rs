//! Pieces shared by the commands: upstream adapter, window, run store.

use anyhow::{Context, Result};
use chainfetch_core::config::ChainfetchConfig;
use chainfetch_core::fetch::{HttpAdapter, RetryingAdapter};
use chainfetch_core::metrics::SqliteRunStore;
use chainfetch_core::partition::PartitionWindow;
use chainfetch_core::retry::RetryPolicy;

use crate::cli::WindowArgs;

pub(super) type Upstream = RetryingAdapter<HttpAdapter>;

/// HTTP adapter for the configured upstream, wrapped in the configured retry policy.
pub(super) fn build_adapter(cfg: &ChainfetchConfig) -> Result<Upstream> {
    let http = HttpAdapter::new(cfg.upstream.adapter_options())
        .with_context(|| format!("invalid upstream base_url {:?}", cfg.upstream.base_url))?;
    let policy = cfg
        .retry
        .as_ref()
        .map(RetryPolicy::from)
        .unwrap_or_default();
    Ok(RetryingAdapter::new(http, policy))
}

/// CLI flags win over config; the reference date defaults to today (local time).
pub(super) fn window(cfg: &ChainfetchConfig, args: &WindowArgs) -> PartitionWindow {
    let reference = args
        .reference_date
        .clone()
        .unwrap_or_else(|| chrono::Local::now().date_naive().format("%Y-%m-%d").to_string());
    PartitionWindow::new(reference, args.max_dte.or(cfg.max_dte))
}

pub(super) async fn open_run_store(cfg: &ChainfetchConfig) -> Result<SqliteRunStore> {
    match &cfg.metrics_db {
        Some(path) => SqliteRunStore::open_at(path)
            .await
            .with_context(|| format!("open run history {}", path.display())),
        None => SqliteRunStore::open_default().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_window() {
        let mut cfg = ChainfetchConfig::default();
        cfg.max_dte = Some(45);
        let args = WindowArgs {
            reference_date: Some("2024-01-15".into()),
            max_dte: None,
        };
        assert_eq!(window(&cfg, &args), PartitionWindow::new("2024-01-15", Some(45)));

        let args = WindowArgs {
            reference_date: Some("20240115".into()),
            max_dte: Some(7),
        };
        assert_eq!(window(&cfg, &args).max_offset, Some(7));
    }

    #[test]
    fn reference_date_defaults_to_today() {
        let args = WindowArgs {
            reference_date: None,
            max_dte: None,
        };
        let w = window(&ChainfetchConfig::default(), &args);
        assert!(w.reference().is_ok());
        assert_eq!(w.max_offset, None);
    }
}
