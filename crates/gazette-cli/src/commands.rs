use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gazette_core::Category;
use gazette_storage::BookletStore;
use gazette_sync::config::workspace_fixture_root;
use gazette_sync::{
    load_settings, maybe_build_scheduler, run_backfill, run_ingest, run_resend, BackfillOptions,
    IngestOptions, SyncConfig,
};
use tracing::{info, warn};

use crate::cli::{BackfillArgs, IngestArgs};

pub async fn ingest(config: &SyncConfig, args: IngestArgs) -> Result<()> {
    let settings = load_settings(config).await?;

    if let Some(booklet) = args.resend {
        let summary = run_resend(config, &settings, booklet, args.dry_run).await?;
        println!(
            "resend complete: booklet={} rows={} tickets={} keys_recorded={}",
            summary.booklet_number, summary.rows, summary.tickets_created, summary.keys_recorded
        );
        if let Some(halted) = summary.send_halted {
            warn!(booklet = halted.booklet_number, reason = %halted.reason, "resend stopped early");
        }
        return Ok(());
    }

    let anchors = [
        (Category::Law, args.last_law),
        (Category::Regulation, args.last_regulation),
        (Category::Notification, args.last_notification),
    ]
    .into_iter()
    .filter_map(|(category, booklet)| booklet.map(|b| (category, b)))
    .collect::<BTreeMap<_, _>>();

    let options = IngestOptions {
        dry_run: args.dry_run,
        lookback: args.lookback.unwrap_or(config.lookback),
        anchors,
    };
    let fixtures = args
        .fixtures
        .map(|dir| dir.unwrap_or_else(|| workspace_fixture_root(config)));
    let summary = run_ingest(config, &settings, &options, fixtures.as_deref()).await?;

    println!(
        "ingest complete: run_id={} feed={} inserted={} tickets={} report={}",
        summary.run_id,
        summary.feed,
        summary.inserted,
        summary.tickets_created,
        summary.report_path.as_deref().unwrap_or("-")
    );
    if let Some(halted) = summary.send_halted {
        warn!(
            booklet = halted.booklet_number,
            not_attempted = halted.not_attempted,
            reason = %halted.reason,
            "ticket batch stopped early; run `gazette backfill` once the sink recovers"
        );
    }
    Ok(())
}

pub async fn backfill(config: &SyncConfig, args: BackfillArgs) -> Result<()> {
    let settings = load_settings(config).await?;
    let options = BackfillOptions {
        fix: args.fix,
        from_booklet: args.from_booklet,
        limit: args.limit,
        strategy: args.strategy,
        delay: Duration::from_millis(args.delay_ms),
    };
    let summary = run_backfill(config, &settings, &options).await?;
    println!(
        "backfill complete: examined={} found={} written={} missing_booklets={}",
        summary.examined,
        summary.found.len(),
        summary.keys_written,
        summary.missing_booklets.len()
    );
    Ok(())
}

pub async fn migrate(config: &SyncConfig) -> Result<()> {
    let store = BookletStore::open(&config.database_path)
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let rows = store.count().await;
    store.close().await;
    println!(
        "migrations applied: database={} rows={}",
        config.database_path.display(),
        rows?
    );
    Ok(())
}

pub async fn schedule(config: &SyncConfig) -> Result<()> {
    let settings = load_settings(config).await?;
    let Some(mut sched) = maybe_build_scheduler(config, &settings).await? else {
        bail!("scheduler is disabled; set GAZETTE_SCHEDULER_ENABLED=1");
    };

    sched.start().await.context("starting scheduler")?;
    info!(cron = %config.sync_cron, "scheduler running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    sched.shutdown().await.context("stopping scheduler")?;
    info!("scheduler stopped");
    Ok(())
}
