//! `chainfetch partitions` – dry run: list the partitions a run would fetch.

use anyhow::{Context, Result};
use chainfetch_core::config::ChainfetchConfig;
use chainfetch_core::fetch::FetchAdapter;
use chainfetch_core::partition;

use super::upstream::{build_adapter, window};
use crate::cli::WindowArgs;

pub async fn run_partitions(cfg: &ChainfetchConfig, args: &WindowArgs) -> Result<()> {
    let window = window(cfg, args);
    let reference = window.reference()?;
    let adapter = build_adapter(cfg)?;
    let listed = adapter
        .list_partitions()
        .await
        .with_context(|| format!("list partitions from {}", cfg.upstream.base_url))?;
    let keys = partition::filter(&listed, &window)?;

    if keys.is_empty() {
        println!(
            "No eligible partitions for {} ({} listed).",
            reference,
            listed.len()
        );
        return Ok(());
    }
    println!("{:<12} {:>5}", "PARTITION", "DTE");
    for key in &keys {
        let dte = key
            .expiration()
            .map(|exp| (exp - reference).num_days().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<12} {:>5}", key, dte);
    }
    println!("{} of {} listed partitions eligible.", keys.len(), listed.len());
    Ok(())
}
