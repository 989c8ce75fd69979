use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::{GazetteSettings, SyncConfig};
use crate::pipeline::IngestOptions;

/// Cron-driven ingestion, or `None` when the scheduler is disabled.
///
/// A tick that fires while the previous cycle is still running is skipped.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    settings: &GazetteSettings,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let running = Arc::new(Mutex::new(()));
    let cron = config.sync_cron.clone();
    let config = config.clone();
    let settings = settings.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let config = config.clone();
        let settings = settings.clone();
        let running = running.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                warn!("previous cycle still running; tick skipped");
                return;
            };
            let options = IngestOptions {
                lookback: config.lookback,
                ..IngestOptions::default()
            };
            match crate::run_ingest(&config, &settings, &options, None).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    inserted = summary.inserted,
                    tickets_created = summary.tickets_created,
                    "scheduled cycle finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled cycle failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(%cron, "scheduler configured");
    Ok(Some(sched))
}
