//! mlops - pipeline entry point

use clap::Parser;
use colored::Colorize;
use mlops_pipelines::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mlops_pipelines=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = cli::run(cli).await {
        tracing::error!(error = %e, "Flow failed");
        eprintln!("  {} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
