//! Best-effort Airtable export of newly stored rows.

use std::time::Duration;

use gazette_core::StoredRow;
use gazette_storage::HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

pub const AIRTABLE_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub batches_sent: usize,
    pub batches_failed: usize,
}

#[derive(Debug, Clone)]
pub struct AirtableExport {
    http: HttpClient,
    table_url: String,
    token: String,
    pause: Duration,
}

impl AirtableExport {
    pub fn new(http: HttpClient, table_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            table_url: table_url.into(),
            token: token.into(),
            pause: Duration::from_millis(500),
        }
    }

    /// Pushes rows in batches of ten. Failures are logged and never propagate.
    pub async fn push(&self, rows: &[StoredRow]) -> ExportSummary {
        let mut summary = ExportSummary::default();
        let headers = match self.headers() {
            Some(headers) => headers,
            None => {
                warn!("airtable token is not a valid header value; export skipped");
                return summary;
            }
        };

        for (idx, batch) in rows.chunks(AIRTABLE_BATCH_SIZE).enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.pause).await;
            }
            let body = batch_body(batch);
            match self.http.post_json(&self.table_url, headers.clone(), &body).await {
                Ok(resp) => {
                    info!(status = resp.status.as_u16(), records = batch.len(), "airtable batch sent");
                    summary.batches_sent += 1;
                }
                Err(err) => {
                    warn!(error = %err, records = batch.len(), "airtable batch failed");
                    summary.batches_failed += 1;
                }
            }
        }
        summary
    }

    fn headers(&self) -> Option<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", self.token)).ok()?;
        headers.insert(AUTHORIZATION, value);
        Some(headers)
    }
}

pub fn airtable_fields(row: &StoredRow) -> JsonValue {
    serde_json::json!({
        "Name": row.record.display_name,
        "Type": row.category().hebrew_label(),
        "Description": row.record.description,
        "File of booklet": row.record.file_name,
        "Status": "Todo",
    })
}

pub fn batch_body(batch: &[StoredRow]) -> JsonValue {
    let records = batch
        .iter()
        .map(|row| serde_json::json!({ "fields": airtable_fields(row) }))
        .collect::<Vec<_>>();
    serde_json::json!({ "records": records })
}
