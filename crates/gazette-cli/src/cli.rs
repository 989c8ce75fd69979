use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use gazette_sync::LookupStrategy;

#[derive(Debug, Parser)]
#[command(name = "gazette")]
#[command(about = "Track newly published laws, regulations and notifications and open tickets for them")]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); falls back to RUST_LOG, then info.
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch the feed, store new items and open tickets for them (default).
    Ingest(IngestArgs),
    /// Find ticket keys for stored rows that never recorded one.
    Backfill(BackfillArgs),
    /// Create or upgrade the local database.
    Migrate,
    /// Run ingestion on the configured cron until interrupted.
    Schedule,
}

#[derive(Debug, Default, Args)]
pub struct IngestArgs {
    /// Treat this law booklet as the high-water mark.
    #[arg(long, value_name = "BOOKLET")]
    pub last_law: Option<i64>,
    /// Treat this regulation booklet as the high-water mark.
    #[arg(long, value_name = "BOOKLET", alias = "last-takana")]
    pub last_regulation: Option<i64>,
    /// Treat this notification booklet as the high-water mark.
    #[arg(long, value_name = "BOOKLET")]
    pub last_notification: Option<i64>,
    /// Booklets behind the high-water mark that are still admitted.
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    pub lookback: Option<i64>,
    /// Log what would happen without writing or calling out.
    #[arg(long)]
    pub dry_run: bool,
    /// Send the stored rows of this booklet again instead of ingesting.
    #[arg(long, value_name = "BOOKLET")]
    pub resend: Option<i64>,
    /// Read captured feed pages instead of the live endpoint (default DIR: fixtures/feed).
    #[arg(long, value_name = "DIR")]
    pub fixtures: Option<Option<PathBuf>>,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Write found keys to the database (default: report only).
    #[arg(long)]
    pub fix: bool,
    /// Only rows with booklet number >= this value.
    #[arg(long, value_name = "BOOKLET")]
    pub from_booklet: Option<i64>,
    /// Process at most this many booklets.
    #[arg(long)]
    pub limit: Option<usize>,
    /// Lookup strategy: file, title or both.
    #[arg(long = "by", default_value = "both")]
    pub strategy: LookupStrategy,
    /// Pause between lookups, in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub delay_ms: u64,
}
