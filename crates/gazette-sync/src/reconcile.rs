//! Backfill of ticket keys for rows whose create response was never recorded.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use gazette_core::StoredRow;
use gazette_storage::BookletStore;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::tickets::{LookupStrategy, TicketSync};

pub const DEFAULT_LOOKUP_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Write found keys to the store; otherwise only report.
    pub fix: bool,
    pub from_booklet: Option<i64>,
    /// Process at most this many distinct booklets, newest first.
    pub limit: Option<usize>,
    pub strategy: LookupStrategy,
    pub delay: Duration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            fix: false,
            from_booklet: None,
            limit: None,
            strategy: LookupStrategy::default(),
            delay: DEFAULT_LOOKUP_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundKey {
    pub row_id: i64,
    pub booklet_number: i64,
    pub display_name: String,
    pub ticket_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub examined: usize,
    pub found: Vec<FoundKey>,
    pub keys_written: usize,
    pub missing_rows: usize,
    pub missing_booklets: BTreeSet<i64>,
}

pub struct Reconciler {
    store: BookletStore,
    tickets: TicketSync,
}

impl Reconciler {
    pub fn new(store: BookletStore, tickets: TicketSync) -> Self {
        Self { store, tickets }
    }

    pub async fn run(&self, options: &BackfillOptions) -> Result<BackfillSummary> {
        let span = info_span!("backfill", fix = options.fix, strategy = %options.strategy);
        self.run_inner(options).instrument(span).await
    }

    async fn run_inner(&self, options: &BackfillOptions) -> Result<BackfillSummary> {
        let rows = self
            .store
            .without_ticket_key(options.from_booklet)
            .await
            .context("loading rows without ticket key")?;
        info!(rows = rows.len(), from_booklet = ?options.from_booklet, "rows have no ticket key");

        let rows = match options.limit {
            Some(limit) => {
                let limited = limit_to_booklets(rows, limit);
                info!(limit, rows = limited.len(), "limited to newest booklets");
                limited
            }
            None => rows,
        };

        let mut summary = BackfillSummary::default();
        for (idx, row) in rows.iter().enumerate() {
            if idx > 0 && !options.delay.is_zero() {
                tokio::time::sleep(options.delay).await;
            }
            summary.examined += 1;

            let found = self
                .tickets
                .lookup(row, options.strategy)
                .await
                .with_context(|| format!("looking up ticket for booklet #{}", row.booklet_number()))?;

            let Some(key) = found else {
                info!(booklet = row.booklet_number(), display_name = %row.display_name(), "not found in sink");
                summary.missing_rows += 1;
                summary.missing_booklets.insert(row.booklet_number());
                continue;
            };

            info!(booklet = row.booklet_number(), display_name = %row.display_name(), ticket_key = %key, "found");
            if options.fix {
                self.store
                    .set_ticket_key(row.id, &key)
                    .await
                    .with_context(|| format!("recording {key} on row {}", row.id))?;
                summary.keys_written += 1;
            }
            summary.found.push(FoundKey {
                row_id: row.id,
                booklet_number: row.booklet_number(),
                display_name: row.display_name().to_string(),
                ticket_key: key,
            });
        }

        info!(
            found = summary.found.len(),
            missing_booklets = summary.missing_booklets.len(),
            missing_rows = summary.missing_rows,
            "backfill finished"
        );
        if !summary.missing_booklets.is_empty() {
            let list = summary
                .missing_booklets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            info!(booklets = %list, "not in sink");
        }
        if !options.fix && !summary.found.is_empty() {
            info!("re-run with --fix to write the keys");
        }
        Ok(summary)
    }
}

/// Keeps every row of the first `limit` distinct booklets, in input order.
fn limit_to_booklets(rows: Vec<StoredRow>, limit: usize) -> Vec<StoredRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            if seen.contains(&row.booklet_number()) {
                return true;
            }
            if seen.len() >= limit {
                return false;
            }
            seen.insert(row.booklet_number());
            true
        })
        .collect()
}
