//! `chainfetch history` – show recent runs.

use anyhow::Result;
use chainfetch_core::config::ChainfetchConfig;
use chainfetch_core::metrics::{RunQuery, RunSink};
use chainfetch_core::partition::PartitionWindow;

use super::upstream::open_run_store;

pub async fn run_history(
    cfg: &ChainfetchConfig,
    reference_date: Option<String>,
    limit: u32,
    json: bool,
) -> Result<()> {
    // Stored dates are normalized to YYYY-MM-DD; accept either input form.
    let reference_date = match reference_date {
        Some(d) => Some(
            PartitionWindow::new(d, None)
                .reference()?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        None => None,
    };
    let store = open_run_store(cfg).await?;
    let runs = store
        .list_runs(&RunQuery {
            reference_date,
            limit: Some(limit),
        })
        .await?;

    if json {
        for run in &runs {
            println!("{}", serde_json::to_string(run)?);
        }
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!(
        "{:<8} {:<20} {:<10} {:>5} {:>6} {:>10} {:>9}",
        "RUN", "STARTED", "DATE", "OK", "FAILED", "RECORDS", "DURATION"
    );
    for run in runs {
        let id = run.run_id.to_string();
        println!(
            "{:<8} {:<20} {:<10} {:>5} {:>6} {:>10} {:>8.1}s{}",
            &id[..8],
            run.started_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            run.reference_date,
            run.successful_partitions,
            run.failed_partitions,
            run.total_records,
            run.duration_ms as f64 / 1000.0,
            if run.interrupted { "  (interrupted)" } else { "" }
        );
    }
    Ok(())
}
