//! Source feed contract + the Reshumot search endpoint and a fixture-backed feed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gazette_core::Category;
use gazette_storage::{FetchError, HttpClient};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::normalize::FeedPage;
use crate::AdapterError;

pub const DEFAULT_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRequest {
    pub category: Category,
    pub limit: u32,
    pub skip: u32,
}

impl FeedRequest {
    pub fn first_page(category: Category, limit: u32) -> Self {
        Self {
            category,
            limit,
            skip: 0,
        }
    }

    /// JSON body understood by the search endpoint.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "skip": self.skip,
            "limit": self.limit.to_string(),
            "FolderType": self.category.folder_type(),
        })
    }
}

#[async_trait]
pub trait SourceFeed: Send + Sync {
    fn feed_id(&self) -> &'static str;

    async fn fetch_page(&self, request: &FeedRequest) -> Result<FeedPage, AdapterError>;
}

/// The government publication search API.
#[derive(Debug, Clone)]
pub struct ReshumotFeed {
    http: HttpClient,
    endpoint: String,
    client_id: String,
}

impl ReshumotFeed {
    pub fn new(http: HttpClient, endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            client_id: client_id.into(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&self.client_id)
            .map_err(|e| AdapterError::Message(format!("invalid feed client id: {e}")))?;
        headers.insert(HeaderName::from_static("x-client-id"), value);
        Ok(headers)
    }
}

#[async_trait]
impl SourceFeed for ReshumotFeed {
    fn feed_id(&self) -> &'static str {
        "reshumot"
    }

    async fn fetch_page(&self, request: &FeedRequest) -> Result<FeedPage, AdapterError> {
        info!(
            category = %request.category,
            limit = request.limit,
            skip = request.skip,
            "fetching feed page"
        );
        let resp = self
            .http
            .post_json(&self.endpoint, self.headers()?, &request.body())
            .await
            .map_err(|err| match err {
                FetchError::HttpStatus { status, .. } => AdapterError::FeedStatus {
                    category: request.category,
                    status,
                },
                other => AdapterError::Fetch(other),
            })?;

        let page: FeedPage = serde_json::from_slice(&resp.body).map_err(|source| AdapterError::Decode {
            what: format!("{} feed page", request.category),
            source,
        })?;
        debug!(category = %request.category, results = page.results.len(), "feed page decoded");
        Ok(page)
    }
}

/// Captured pages on disk, one `<category>.json` per category.
#[derive(Debug, Clone)]
pub struct FixtureFeed {
    root: PathBuf,
}

impl FixtureFeed {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn page_path(&self, category: Category) -> PathBuf {
        self.root.join(format!("{}.json", category.slug()))
    }
}

#[async_trait]
impl SourceFeed for FixtureFeed {
    fn feed_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_page(&self, request: &FeedRequest) -> Result<FeedPage, AdapterError> {
        let path = self.page_path(request.category);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "no fixture page for category");
            return Ok(FeedPage::default());
        }
        let mut page = crate::load_feed_fixture(&path).await?;
        let skip = request.skip as usize;
        let limit = request.limit as usize;
        page.results = page.results.into_iter().skip(skip).take(limit).collect();
        Ok(page)
    }
}

pub fn default_fixture_root(workspace_root: &Path) -> PathBuf {
    workspace_root.join("fixtures").join("feed")
}
