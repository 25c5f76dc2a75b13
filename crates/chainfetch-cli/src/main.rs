use chainfetch_core::logging;
use clap::Parser;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // File logging under the state dir; stderr if that is not writable.
    if let Err(e) = logging::init_logging(cli.verbose) {
        logging::init_logging_stderr(cli.verbose);
        tracing::warn!("file logging unavailable, using stderr: {:#}", e);
    }

    if let Err(err) = cli.run().await {
        eprintln!("chainfetch error: {:#}", err);
        std::process::exit(1);
    }
}
