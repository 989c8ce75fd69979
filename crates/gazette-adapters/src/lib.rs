//! Source feed + sink adapters, and the record normalizer that sits between them.

pub mod airtable;
pub mod feed;
pub mod jira;
pub mod normalize;

use std::path::Path;

use anyhow::Context;
use gazette_core::Category;
use gazette_storage::FetchError;
use thiserror::Error;

pub use airtable::{AirtableExport, ExportSummary, AIRTABLE_BATCH_SIZE};
pub use feed::{default_fixture_root, FeedRequest, FixtureFeed, ReshumotFeed, SourceFeed, DEFAULT_PAGE_LIMIT};
pub use jira::{
    truncate_title, CreateOutcome, IssueQuery, JiraClient, NewIssue, RemoteIssue, TicketSink,
    TicketTemplate, SUMMARY_MAX_CHARS,
};
pub use normalize::{
    normalize_document, normalize_page, FeedPage, NormalizeError, RawDocument, RawResult,
    INDIRECT_AMENDMENT_SEPARATORS,
};

pub const CRATE_NAME: &str = "gazette-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("source feed answered {status} for {category}")]
    FeedStatus { category: Category, status: u16 },
    #[error("ticket sink answered {status}: {body}")]
    SinkStatus { status: u16, body: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Reads a captured feed page (the raw search response body) from disk.
pub async fn load_feed_fixture(path: impl AsRef<Path>) -> Result<FeedPage, AdapterError> {
    let path = path.as_ref();
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let page = serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(page)
}
