//! Tests for the run subcommand.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_run_defaults() {
    match parse(&["chainfetch", "run"]) {
        CliCommand::Run {
            window,
            concurrency,
            chunk_size,
            output_dir,
            interval,
            all_hours,
        } => {
            assert!(window.reference_date.is_none());
            assert!(window.max_dte.is_none());
            assert!(concurrency.is_none());
            assert!(chunk_size.is_none());
            assert!(output_dir.is_none());
            assert!(interval.is_none());
            assert!(!all_hours);
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_all_flags() {
    match parse(&[
        "chainfetch",
        "run",
        "--reference-date",
        "2024-01-15",
        "--max-dte",
        "30",
        "--concurrency",
        "4",
        "--chunk-size",
        "500",
        "--output-dir",
        "/data/chains",
        "--interval",
        "5m",
        "--all-hours",
    ]) {
        CliCommand::Run {
            window,
            concurrency,
            chunk_size,
            output_dir,
            interval,
            all_hours,
        } => {
            assert_eq!(window.reference_date.as_deref(), Some("2024-01-15"));
            assert_eq!(window.max_dte, Some(30));
            assert_eq!(concurrency, Some(4));
            assert_eq!(chunk_size, Some(500));
            assert_eq!(output_dir.as_deref(), Some(std::path::Path::new("/data/chains")));
            assert_eq!(interval.as_deref(), Some("5m"));
            assert!(all_hours);
        }
        _ => panic!("expected Run with flags"),
    }
}

#[test]
fn cli_parse_run_rejects_bad_numbers() {
    assert!(Cli::try_parse_from(["chainfetch", "run", "--concurrency", "many"]).is_err());
    assert!(Cli::try_parse_from(["chainfetch", "run", "--max-dte", "-1"]).is_err());
}

#[test]
fn cli_parse_verbose_is_global() {
    let cli = Cli::try_parse_from(["chainfetch", "run", "-v"]).unwrap();
    assert!(cli.verbose);
    let cli = Cli::try_parse_from(["chainfetch", "--verbose", "history"]).unwrap();
    assert!(cli.verbose);
}
