//! Process configuration: environment knobs plus `gazette.yaml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gazette_adapters::{
    default_fixture_root, AirtableExport, FixtureFeed, JiraClient, ReshumotFeed, SourceFeed,
    TicketTemplate, DEFAULT_PAGE_LIMIT,
};
use gazette_core::Category;
use gazette_storage::{BookletStore, HttpClient, HttpClientConfig};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::admission::DEFAULT_LOOKBACK;
use crate::pipeline::IngestPipeline;
use crate::reconcile::Reconciler;
use crate::tickets::TicketSync;

pub const SETTINGS_FILE: &str = "gazette.yaml";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub workspace_root: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub lookback: i64,
    pub page_limit: u32,
    pub jira_api_token: Option<String>,
    pub airtable_token: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secret = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            database_path: lookup("GAZETTE_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./kzdb.sqlite")),
            workspace_root: lookup("GAZETTE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            scheduler_enabled: lookup("GAZETTE_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: lookup("GAZETTE_SYNC_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
            user_agent: lookup("GAZETTE_USER_AGENT").unwrap_or_else(|| "gazette-bot/0.1".to_string()),
            http_timeout_secs: lookup("GAZETTE_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            lookback: lookup("GAZETTE_LOOKBACK")
                .and_then(|v| v.parse().ok())
                .filter(|lookback: &i64| *lookback >= 0)
                .unwrap_or(DEFAULT_LOOKBACK),
            page_limit: lookup("GAZETTE_PAGE_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PAGE_LIMIT),
            jira_api_token: secret("JIRA_API_TOKEN"),
            airtable_token: secret("AIRTABLE_TOKEN_API"),
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.workspace_root.join(SETTINGS_FILE)
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazetteSettings {
    pub feed: FeedSettings,
    pub jira: JiraSettings,
    #[serde(default)]
    pub airtable: Option<AirtableSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    pub endpoint: String,
    pub client_id: String,
    #[serde(default = "all_categories")]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JiraSettings {
    pub base_url: String,
    pub user: String,
    #[serde(default)]
    pub template: TicketTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirtableSettings {
    pub table_url: String,
}

fn all_categories() -> Vec<Category> {
    Category::ALL.to_vec()
}

impl GazetteSettings {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Remote collaborators and the open store for one process.
pub struct Wiring {
    pub store: BookletStore,
    pub http: HttpClient,
    pub tickets: TicketSync,
    sink: Arc<JiraClient>,
}

impl Wiring {
    pub async fn connect(config: &SyncConfig, settings: &GazetteSettings) -> Result<Self> {
        let store = BookletStore::open(&config.database_path)
            .await
            .with_context(|| format!("opening {}", config.database_path.display()))?;
        info!(database = %config.database_path.display(), "store opened");
        Self::assemble(config, settings, store)
    }

    /// Wiring over a store that is never written. A missing database file is
    /// replaced by an empty in-memory store instead of being created.
    pub async fn connect_read_only(config: &SyncConfig, settings: &GazetteSettings) -> Result<Self> {
        let path = &config.database_path;
        let store = if fs::try_exists(path).await.unwrap_or(false) {
            let store = BookletStore::open_read_only(path)
                .await
                .with_context(|| format!("opening {} read-only", path.display()))?;
            info!(database = %path.display(), "store opened read-only");
            store
        } else {
            warn!(database = %path.display(), "database does not exist; using an empty in-memory store");
            BookletStore::open_in_memory().await?
        };
        Self::assemble(config, settings, store)
    }

    fn assemble(config: &SyncConfig, settings: &GazetteSettings, store: BookletStore) -> Result<Self> {
        let http = HttpClient::new(config.http_config())?;
        let token = match &config.jira_api_token {
            Some(token) => token.clone(),
            None => {
                warn!("JIRA_API_TOKEN is not set; ticket calls will be rejected");
                String::new()
            }
        };
        let sink = Arc::new(JiraClient::new(
            http.clone(),
            &settings.jira.base_url,
            &settings.jira.user,
            token,
            settings.jira.template.clone(),
        ));
        Ok(Self {
            store,
            http,
            tickets: TicketSync::new(sink.clone()),
            sink,
        })
    }

    /// Ingestion pipeline over the live feed, or over captured pages when
    /// `fixtures` is given.
    pub fn pipeline(
        &self,
        config: &SyncConfig,
        settings: &GazetteSettings,
        fixtures: Option<&Path>,
    ) -> IngestPipeline {
        let feed: Box<dyn SourceFeed> = match fixtures {
            Some(dir) => Box::new(FixtureFeed::new(dir)),
            None => Box::new(ReshumotFeed::new(
                self.http.clone(),
                &settings.feed.endpoint,
                &settings.feed.client_id,
            )),
        };
        let export = match (&settings.airtable, &config.airtable_token) {
            (Some(airtable), Some(token)) => Some(AirtableExport::new(
                self.http.clone(),
                &airtable.table_url,
                token,
            )),
            _ => None,
        };
        IngestPipeline::new(self.store.clone(), feed, self.sink.clone())
            .with_export(export)
            .with_categories(settings.feed.categories.iter().copied())
            .with_page_limit(config.page_limit)
            .with_reports_root(Some(config.workspace_root.clone()))
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.store.clone(), self.tickets.clone())
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}

/// `fixtures/feed` under the workspace root.
pub fn workspace_fixture_root(config: &SyncConfig) -> PathBuf {
    default_fixture_root(&config.workspace_root)
}
