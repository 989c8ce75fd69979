//! One ingestion cycle: fetch, normalize, admit, persist, send, export, report.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use gazette_adapters::{
    normalize_page, AirtableExport, ExportSummary, FeedRequest, SourceFeed, TicketSink,
    DEFAULT_PAGE_LIMIT,
};
use gazette_core::{CandidateRecord, Category, StoredRow};
use gazette_storage::BookletStore;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::admission::{admit, dedup_batch, DEFAULT_LOOKBACK};
use crate::tickets::{HaltedSend, TicketSync};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Log every action without writing rows, creating issues, or exporting.
    pub dry_run: bool,
    pub lookback: i64,
    /// Explicit high-water booklet per category, replacing the stored maximum.
    pub anchors: BTreeMap<Category, i64>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            lookback: DEFAULT_LOOKBACK,
            anchors: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub fetched: usize,
    pub candidates: usize,
    pub high_water: Option<i64>,
    pub admitted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub feed: String,
    pub categories: Vec<CategorySummary>,
    pub inserted: usize,
    pub tickets_created: usize,
    pub send_halted: Option<HaltedSend>,
    pub export: Option<ExportSummary>,
    pub report_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResendSummary {
    pub booklet_number: i64,
    pub rows: usize,
    pub tickets_created: usize,
    pub keys_recorded: usize,
    pub send_halted: Option<HaltedSend>,
}

struct FetchedCategory {
    category: Category,
    fetched: usize,
    candidates: Vec<CandidateRecord>,
}

pub struct IngestPipeline {
    store: BookletStore,
    feed: Box<dyn SourceFeed>,
    tickets: TicketSync,
    export: Option<AirtableExport>,
    categories: Vec<Category>,
    page_limit: u32,
    reports_root: Option<PathBuf>,
}

impl IngestPipeline {
    pub fn new(store: BookletStore, feed: Box<dyn SourceFeed>, sink: Arc<dyn TicketSink>) -> Self {
        Self {
            store,
            feed,
            tickets: TicketSync::new(sink),
            export: None,
            categories: Category::ALL.to_vec(),
            page_limit: DEFAULT_PAGE_LIMIT,
            reports_root: None,
        }
    }

    pub fn with_export(mut self, export: Option<AirtableExport>) -> Self {
        self.export = export;
        self
    }

    /// Categories are always processed in [`Category::ALL`] order.
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        let mut categories = categories.into_iter().collect::<Vec<_>>();
        categories.sort();
        categories.dedup();
        self.categories = categories;
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    /// Run reports land in `<root>/reports/<run_id>/`. No root, no report.
    pub fn with_reports_root(mut self, root: Option<PathBuf>) -> Self {
        self.reports_root = root;
        self
    }

    pub async fn run_once(&self, options: &IngestOptions) -> Result<IngestSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest", %run_id, dry_run = options.dry_run);
        self.run_cycle(run_id, options).instrument(span).await
    }

    async fn run_cycle(&self, run_id: Uuid, options: &IngestOptions) -> Result<IngestSummary> {
        let started_at = Utc::now();
        info!(feed = self.feed.feed_id(), categories = self.categories.len(), "cycle started");

        for category in options.anchors.keys() {
            if !self.categories.contains(category) {
                warn!(%category, "anchor given for a category that is not enabled");
            }
        }

        // Nothing is written until every category is fetched and admitted.
        let mut fetched = Vec::with_capacity(self.categories.len());
        for &category in &self.categories {
            fetched.push(self.fetch_category(category).await?);
        }

        let mut admitted = Vec::with_capacity(fetched.len());
        for page in fetched {
            admitted.push(self.admit_category(page, options).await?);
        }

        let mut categories = Vec::with_capacity(admitted.len());
        let mut new_rows: Vec<StoredRow> = Vec::new();
        for (summary, candidates) in admitted {
            new_rows.extend(self.persist(summary.category, candidates, options.dry_run).await?);
            categories.push(summary);
        }

        if new_rows.is_empty() {
            info!("no new rows");
        }

        let report = self.tickets.send(&new_rows, options.dry_run).await;
        record_ticket_keys(&self.store, &report.created).await?;

        let export = match (&self.export, options.dry_run) {
            (Some(export), false) if !new_rows.is_empty() => Some(export.push(&new_rows).await),
            (Some(_), true) => {
                info!(rows = new_rows.len(), "dry run: would export rows");
                None
            }
            _ => None,
        };

        let mut summary = IngestSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: options.dry_run,
            feed: self.feed.feed_id().to_string(),
            categories,
            inserted: if options.dry_run { 0 } else { new_rows.len() },
            tickets_created: report.created.len(),
            send_halted: report.halted,
            export,
            report_path: None,
        };

        if !options.dry_run {
            if let Some(root) = &self.reports_root {
                let path = write_ingest_report(root, &summary).await?;
                summary.report_path = Some(path.display().to_string());
            }
        }

        info!(
            inserted = summary.inserted,
            tickets_created = summary.tickets_created,
            halted = summary.send_halted.is_some(),
            "cycle finished"
        );
        Ok(summary)
    }

    async fn fetch_category(&self, category: Category) -> Result<FetchedCategory> {
        let page = self
            .feed
            .fetch_page(&FeedRequest::first_page(category, self.page_limit))
            .await
            .with_context(|| format!("fetching {category} feed page"))?;
        let fetched = page.results.len();

        let candidates = normalize_page(page, category)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("normalizing {category} feed page"))?;
        Ok(FetchedCategory {
            category,
            fetched,
            candidates: dedup_batch(candidates),
        })
    }

    async fn admit_category(
        &self,
        page: FetchedCategory,
        options: &IngestOptions,
    ) -> Result<(CategorySummary, Vec<CandidateRecord>)> {
        let FetchedCategory {
            category,
            fetched,
            candidates,
        } = page;
        let high_water = self.anchor(category, options.anchors.get(&category).copied()).await?;
        let stored = self
            .store
            .all_keys(category)
            .await
            .with_context(|| format!("loading stored {category} keys"))?;

        let mut summary = CategorySummary {
            category,
            fetched,
            candidates: candidates.len(),
            high_water: high_water.as_ref().map(StoredRow::booklet_number),
            admitted: 0,
            skipped: 0,
        };
        let mut admitted = Vec::new();
        for candidate in candidates {
            let decision = admit(&candidate, high_water.as_ref(), &stored, options.lookback);
            debug!(
                %category,
                booklet = candidate.booklet_number,
                display_name = %candidate.display_name,
                decision = decision.label(),
                "admission"
            );
            if decision.is_admitted() {
                summary.admitted += 1;
                admitted.push(candidate);
            } else {
                summary.skipped += 1;
            }
        }

        if summary.admitted == 0 {
            info!(%category, skipped = summary.skipped, "no new rows in category");
        } else {
            info!(%category, admitted = summary.admitted, skipped = summary.skipped, "new rows in category");
        }
        Ok((summary, admitted))
    }

    async fn persist(
        &self,
        category: Category,
        candidates: Vec<CandidateRecord>,
        dry_run: bool,
    ) -> Result<Vec<StoredRow>> {
        let mut rows = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if dry_run {
                info!(
                    %category,
                    booklet = candidate.booklet_number,
                    display_name = %candidate.display_name,
                    "dry run: would insert"
                );
                rows.push(StoredRow::unsaved(candidate));
                continue;
            }

            let id = self.store.insert(&candidate).await.with_context(|| {
                format!("inserting {category} booklet #{}", candidate.booklet_number)
            })?;
            rows.push(StoredRow {
                id,
                record: candidate,
                ticket_key: None,
            });
        }
        Ok(rows)
    }

    async fn anchor(&self, category: Category, booklet: Option<i64>) -> Result<Option<StoredRow>> {
        match booklet {
            Some(number) => match self.store.by_number(category, number).await? {
                Some(row) => {
                    info!(%category, booklet = number, "using explicit high-water anchor");
                    Ok(Some(row))
                }
                None => bail!("{category} booklet #{number} is not stored and cannot anchor admission"),
            },
            None => Ok(self.store.highest(category).await?),
        }
    }

    /// Sends every stored row of one booklet again, skipping admission.
    ///
    /// New keys are recorded only on rows that had none.
    pub async fn resend(&self, booklet_number: i64, dry_run: bool) -> Result<ResendSummary> {
        let span = info_span!("resend", booklet = booklet_number, dry_run);
        self.resend_booklet(booklet_number, dry_run).instrument(span).await
    }

    async fn resend_booklet(&self, booklet_number: i64, dry_run: bool) -> Result<ResendSummary> {
        let rows = self
            .store
            .rows_by_booklet_number(booklet_number)
            .await
            .with_context(|| format!("loading rows of booklet #{booklet_number}"))?;
        if rows.is_empty() {
            warn!("no stored rows for this booklet");
        }

        let report = self.tickets.send(&rows, dry_run).await;
        let mut unkeyed = Vec::with_capacity(report.created.len());
        for created in &report.created {
            let (row, key) = created;
            match &row.ticket_key {
                Some(previous) => {
                    info!(row_id = row.id, %previous, new = %key, "row keeps its earlier ticket key");
                }
                None => unkeyed.push(created),
            }
        }
        let keys_recorded = record_ticket_keys(&self.store, unkeyed).await?;

        Ok(ResendSummary {
            booklet_number,
            rows: rows.len(),
            tickets_created: report.created.len(),
            keys_recorded,
            send_halted: report.halted,
        })
    }
}

/// Writes every created ticket key, carrying on past failures so one bad
/// row does not lose the keys of the rest.
async fn record_ticket_keys<'a>(
    store: &BookletStore,
    created: impl IntoIterator<Item = &'a (StoredRow, String)>,
) -> Result<usize> {
    let mut recorded = 0;
    let mut failed = 0;
    for (row, key) in created {
        match store.set_ticket_key(row.id, key).await {
            Ok(()) => recorded += 1,
            Err(err) => {
                warn!(row_id = row.id, ticket_key = %key, error = %err, "could not record ticket key");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} created ticket key(s) could not be recorded ({recorded} recorded)");
    }
    Ok(recorded)
}

async fn write_ingest_report(root: &std::path::Path, summary: &IngestSummary) -> Result<PathBuf> {
    let reports_dir = root.join("reports").join(summary.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let path = reports_dir.join("ingest_summary.json");
    let bytes = serde_json::to_vec_pretty(summary).context("serializing ingest summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
