//! CLI for the chainfetch options-chain downloader.

mod commands;

use anyhow::Result;
use chainfetch_core::config;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use commands::{run_completions, run_history, run_partitions, run_pipeline};

/// Top-level CLI for chainfetch.
#[derive(Debug, Parser)]
#[command(name = "chainfetch")]
#[command(about = "chainfetch: bounded-concurrency options-chain downloader", long_about = None)]
pub struct Cli {
    /// Trace-level logging for chainfetch modules.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

/// Which partitions a command looks at.
#[derive(Debug, Clone, Args)]
pub struct WindowArgs {
    /// Trading day to fetch (YYYY-MM-DD or YYYYMMDD). Defaults to today.
    #[arg(long, value_name = "DATE")]
    pub reference_date: Option<String>,
    /// Only expirations at most N days after the reference date. Overrides config `max_dte`.
    #[arg(long, value_name = "N")]
    pub max_dte: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download every eligible expiration for the reference date.
    Run {
        #[command(flatten)]
        window: WindowArgs,
        /// Fetches in flight at once. Overrides config `concurrency`.
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
        /// Records per write chunk. Overrides config `chunk_size`.
        #[arg(long, value_name = "N")]
        chunk_size: Option<usize>,
        /// Output root; a directory per reference date is created below it.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        /// Bar interval requested from the upstream (e.g. 1m, 5m).
        #[arg(long)]
        interval: Option<String>,
        /// Include data outside regular trading hours.
        #[arg(long)]
        all_hours: bool,
    },

    /// List the partitions a run would fetch, without fetching them.
    Partitions {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Show recent runs from the run history database.
    History {
        /// Only runs for this reference date.
        #[arg(long, value_name = "DATE")]
        reference_date: Option<String>,
        /// Number of runs to show, newest first.
        #[arg(long, default_value = "10", value_name = "N")]
        limit: u32,
        /// Print full run metrics as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if let CliCommand::Completions { shell } = self.command {
            run_completions(shell);
            return Ok(());
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match self.command {
            CliCommand::Run {
                window,
                concurrency,
                chunk_size,
                output_dir,
                interval,
                all_hours,
            } => {
                let mut cfg = cfg;
                if let Some(n) = concurrency {
                    cfg.concurrency = n;
                }
                if let Some(n) = chunk_size {
                    cfg.chunk_size = n;
                }
                if let Some(dir) = output_dir {
                    cfg.output_dir = Some(dir);
                }
                if let Some(i) = interval {
                    cfg.interval = i;
                }
                if all_hours {
                    cfg.trading_hours_only = false;
                }
                run_pipeline(&cfg, &window).await?;
            }
            CliCommand::Partitions { window } => run_partitions(&cfg, &window).await?,
            CliCommand::History {
                reference_date,
                limit,
                json,
            } => run_history(&cfg, reference_date, limit, json).await?,
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
