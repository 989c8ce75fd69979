mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, IngestArgs};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    if let Err(err) = run(cli).await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = gazette_sync::SyncConfig::from_env();

    match cli
        .command
        .unwrap_or_else(|| Commands::Ingest(IngestArgs::default()))
    {
        Commands::Ingest(args) => commands::ingest(&config, args).await,
        Commands::Backfill(args) => commands::backfill(&config, args).await,
        Commands::Migrate => commands::migrate(&config).await,
        Commands::Schedule => commands::schedule(&config).await,
    }
}

fn init_tracing(level: Option<&str>) {
    let env_filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
