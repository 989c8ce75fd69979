//! Ingestion cycle orchestration, ticket reconciliation and scheduling.

pub mod admission;
pub mod config;
pub mod pipeline;
pub mod reconcile;
pub mod schedule;
pub mod tickets;

use std::path::Path;

use anyhow::Result;

pub use admission::{admit, dedup_batch, Admission, DEFAULT_LOOKBACK};
pub use config::{GazetteSettings, SyncConfig, Wiring, SETTINGS_FILE};
pub use pipeline::{CategorySummary, IngestOptions, IngestPipeline, IngestSummary, ResendSummary};
pub use reconcile::{BackfillOptions, BackfillSummary, FoundKey, Reconciler, DEFAULT_LOOKUP_DELAY};
pub use schedule::maybe_build_scheduler;
pub use tickets::{search_prefix, HaltedSend, LookupStrategy, SendReport, TicketSync};

pub const CRATE_NAME: &str = "gazette-sync";

/// One ingestion cycle with its own store handle, closed whatever the outcome.
/// A dry run never opens the database for writing.
pub async fn run_ingest(
    config: &SyncConfig,
    settings: &GazetteSettings,
    options: &IngestOptions,
    fixtures: Option<&Path>,
) -> Result<IngestSummary> {
    let wiring = wire(config, settings, options.dry_run).await?;
    let outcome = wiring.pipeline(config, settings, fixtures).run_once(options).await;
    wiring.close().await;
    outcome
}

pub async fn run_resend(
    config: &SyncConfig,
    settings: &GazetteSettings,
    booklet_number: i64,
    dry_run: bool,
) -> Result<ResendSummary> {
    let wiring = wire(config, settings, dry_run).await?;
    let outcome = wiring
        .pipeline(config, settings, None)
        .resend(booklet_number, dry_run)
        .await;
    wiring.close().await;
    outcome
}

pub async fn run_backfill(
    config: &SyncConfig,
    settings: &GazetteSettings,
    options: &BackfillOptions,
) -> Result<BackfillSummary> {
    let wiring = wire(config, settings, !options.fix).await?;
    let outcome = wiring.reconciler().run(options).await;
    wiring.close().await;
    outcome
}

async fn wire(config: &SyncConfig, settings: &GazetteSettings, read_only: bool) -> Result<Wiring> {
    if read_only {
        Wiring::connect_read_only(config, settings).await
    } else {
        Wiring::connect(config, settings).await
    }
}

pub async fn load_settings(config: &SyncConfig) -> Result<GazetteSettings> {
    GazetteSettings::load(config.settings_path()).await
}
