//! `chainfetch run` – download every eligible partition for the reference date.

use anyhow::{Context, Result};
use chainfetch_core::config::ChainfetchConfig;
use chainfetch_core::metrics::{RunMetrics, RunSink};
use chainfetch_core::progress::{format_eta, ProgressSnapshot};
use chainfetch_core::Pipeline;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::upstream::{build_adapter, open_run_store, window};
use crate::cli::WindowArgs;

const PROGRESS_INTERVAL_MS: u64 = 500;

pub async fn run_pipeline(cfg: &ChainfetchConfig, args: &WindowArgs) -> Result<()> {
    let window = window(cfg, args);
    let output_dir = match &cfg.output_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let adapter = build_adapter(cfg)?;

    let mut pipeline = Pipeline::new(Arc::new(adapter), cfg.fetch_settings())
        .with_columns(cfg.columns.clone());
    match open_run_store(cfg).await {
        Ok(store) => {
            let sink: Arc<dyn RunSink> = Arc::new(store);
            pipeline = pipeline.with_sink(sink);
        }
        Err(e) => tracing::warn!("run history unavailable, metrics will not be saved: {:#}", e),
    }

    let (progress_tx, progress_rx) = tokio::sync::mpsc::channel::<ProgressSnapshot>(16);
    let pipeline = pipeline.with_progress_channel(progress_tx);
    let progress_handle = tokio::spawn(print_progress(progress_rx));

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received; discarding unfinished partitions...");
            cancel.cancel();
        }
    });

    let result = pipeline
        .run(&window, cfg.concurrency, cfg.chunk_size, &output_dir)
        .await;
    // Closes the progress channel so the printer exits.
    drop(pipeline);
    let _ = progress_handle.await;

    let metrics = result?;
    print_summary(&metrics);
    Ok(())
}

async fn print_progress(mut rx: tokio::sync::mpsc::Receiver<ProgressSnapshot>) {
    let mut last_print: Option<Instant> = None;
    let mut printed = false;
    while let Some(s) = rx.recv().await {
        let now = Instant::now();
        let due = last_print
            .map(|t| now.duration_since(t) >= Duration::from_millis(PROGRESS_INTERVAL_MS))
            .unwrap_or(true);
        if !due && s.completed_partitions < s.total_partitions {
            continue;
        }
        let eta = s
            .estimated_completion
            .and_then(|t| (t - chrono::Utc::now()).to_std().ok())
            .map(format_eta)
            .unwrap_or_else(|| "?".to_string());
        let current = s
            .current_partition
            .as_ref()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "-".to_string());
        print!(
            "\r  {}/{} partitions ({:.0}%)  {} records  {:.0} rec/s  {:.0} MB  current {}  ETA {}  ",
            s.completed_partitions,
            s.total_partitions,
            s.fraction() * 100.0,
            s.total_records,
            s.records_per_second,
            s.memory_usage_mb,
            current,
            eta
        );
        use std::io::Write;
        let _ = std::io::stdout().flush();
        last_print = Some(now);
        printed = true;
    }
    if printed {
        println!();
    }
}

fn print_summary(m: &RunMetrics) {
    println!(
        "{} {}: {}/{} partitions ok, {} records, {:.1} MiB in {:.1}s",
        if m.interrupted { "Interrupted" } else { "Finished" },
        m.reference_date,
        m.successful_partitions,
        m.total_partitions,
        m.records_written,
        m.total_bytes as f64 / 1_048_576.0,
        m.duration_ms as f64 / 1000.0
    );
    for o in m.failures() {
        println!(
            "  failed {}: {}",
            o.partition_key,
            o.error.as_deref().unwrap_or("unknown error")
        );
    }
    tracing::info!(run_id = %m.run_id, "run summary printed");
}
