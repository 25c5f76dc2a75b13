//! SQLite-backed run history.
//!
//! One row per run; the full [`RunMetrics`] is kept as JSON next to a few
//! columns used for filtering and ordering.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

use crate::error::MetricsPersistError;

use super::{RunMetrics, RunQuery, RunSink};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the run history database (`~/.local/state/chainfetch/runs.db` by default).
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: Pool<Sqlite>,
}

impl SqliteRunStore {
    /// Open (or create) the default database under the XDG state directory.
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = crate::logging::state_dir()?.join("runs.db");
        Ok(Self::open_at(path).await?)
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self, MetricsPersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        let store = SqliteRunStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database (no disk I/O); contents vanish with the handle.
    pub async fn open_memory() -> Result<Self, MetricsPersistError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteRunStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), MetricsPersistError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at_ms INTEGER NOT NULL,
                reference_date TEXT NOT NULL,
                total_partitions INTEGER NOT NULL,
                successful_partitions INTEGER NOT NULL,
                failed_partitions INTEGER NOT NULL,
                total_records INTEGER NOT NULL,
                interrupted INTEGER NOT NULL,
                metrics_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS runs_by_date ON runs (reference_date, started_at_ms)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RunSink for SqliteRunStore {
    async fn persist_run(&self, metrics: &RunMetrics) -> Result<(), MetricsPersistError> {
        let json = serde_json::to_string(metrics)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs (
                run_id, started_at_ms, reference_date, total_partitions,
                successful_partitions, failed_partitions, total_records,
                interrupted, metrics_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(metrics.run_id.to_string())
        .bind(metrics.started_at.timestamp_millis())
        .bind(&metrics.reference_date)
        .bind(metrics.total_partitions as i64)
        .bind(metrics.successful_partitions as i64)
        .bind(metrics.failed_partitions as i64)
        .bind(metrics.total_records as i64)
        .bind(metrics.interrupted)
        .bind(json)
        .execute(&self.pool)
        .await?;
        tracing::debug!(run_id = %metrics.run_id, "run metrics persisted");
        Ok(())
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunMetrics>, MetricsPersistError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = query.limit.map(i64::from).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT metrics_json FROM runs
            WHERE (?1 IS NULL OR reference_date = ?1)
            ORDER BY started_at_ms DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(query.reference_date.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.try_get("metrics_json")?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }
}
