//! Main entry point for the bio-batch CLI

use anyhow::Context;
use bio_batch::cli::error::EXIT_UNEXPECTED;
use bio_batch::cli::{Cli, CliError};
use bio_batch::metrics::init_metrics;
use bio_batch::shutdown::ShutdownCoordinator;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing(verbose: bool) {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_level = if verbose { "bio_batch=debug" } else { "bio_batch=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr)
            .map_err(CliError::from)
            .with_context(|| format!("failed to serve metrics on {addr}"))?;
    }

    let shutdown = ShutdownCoordinator::shared();
    let _ctrl_c = shutdown.listen_for_ctrl_c();

    let outcome = cli
        .execute(shutdown)
        .await
        .with_context(|| format!("run over {} failed", cli.input_file.display()))?;
    Ok(outcome.exit_code())
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Command failed: {:#}", e);
            e.downcast_ref::<CliError>()
                .map(CliError::exit_code)
                .unwrap_or(EXIT_UNEXPECTED)
        }
    };
    std::process::exit(code);
}
