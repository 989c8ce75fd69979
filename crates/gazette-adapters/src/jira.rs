//! Ticket sink contract + the Jira REST implementation.
//!
//! Issues are created one at a time; searches go through JQL and are retried
//! while Jira answers 429.

use async_trait::async_trait;
use gazette_core::{parse_day, StoredRow};
use gazette_storage::HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::AdapterError;

pub const SUMMARY_MAX_CHARS: usize = 255;
const ELLIPSIS: &str = "...";

/// Fixed shape of every created issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTemplate {
    pub project_key: String,
    pub issue_type: String,
    #[serde(default)]
    pub reporter: Option<String>,
    pub published_date_field: String,
    pub file_name_field: String,
    #[serde(default)]
    pub full_title_field: Option<String>,
}

impl Default for TicketTemplate {
    fn default() -> Self {
        Self {
            project_key: "KOL".to_string(),
            issue_type: "שינוי חקיקה (עברית)".to_string(),
            reporter: None,
            published_date_field: "customfield_11690".to_string(),
            file_name_field: "customfield_11689".to_string(),
            full_title_field: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub summary: String,
    pub description: String,
    pub published_date: Option<String>,
    pub file_name: String,
    pub full_title: String,
}

impl NewIssue {
    pub fn from_row(row: &StoredRow) -> Self {
        let record = &row.record;
        let published_date = record.published_date.as_deref().map(|raw| {
            parse_day(raw)
                .map(|day| day.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| raw.to_string())
        });
        Self {
            summary: truncate_title(&record.display_name),
            description: record.description.clone(),
            published_date,
            file_name: record.file_name.clone(),
            full_title: record.display_name.clone(),
        }
    }

    pub fn to_payload(&self, template: &TicketTemplate) -> JsonValue {
        let mut fields = serde_json::Map::new();
        fields.insert("project".into(), serde_json::json!({ "key": template.project_key }));
        fields.insert("summary".into(), JsonValue::String(self.summary.clone()));
        fields.insert("description".into(), JsonValue::String(self.description.clone()));
        fields.insert("issuetype".into(), serde_json::json!({ "name": template.issue_type }));
        if let Some(reporter) = &template.reporter {
            fields.insert("reporter".into(), serde_json::json!({ "id": reporter }));
        }
        if let Some(date) = &self.published_date {
            fields.insert(template.published_date_field.clone(), JsonValue::String(date.clone()));
        }
        fields.insert(template.file_name_field.clone(), JsonValue::String(self.file_name.clone()));
        if let Some(field) = &template.full_title_field {
            fields.insert(field.clone(), JsonValue::String(self.full_title.clone()));
        }
        serde_json::json!({ "fields": fields })
    }
}

/// Bounds a title to [`SUMMARY_MAX_CHARS`] characters, marking the cut with `...`.
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= SUMMARY_MAX_CHARS {
        return title.to_string();
    }
    let keep = SUMMARY_MAX_CHARS - ELLIPSIS.len();
    let mut out = title.chars().take(keep).collect::<String>();
    out.push_str(ELLIPSIS);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { key: String },
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueQuery {
    FileNameEquals(String),
    SummaryContains(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub key: String,
    pub summary: String,
    pub published_date: Option<String>,
    pub file_name: Option<String>,
}

#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn create_issue(&self, issue: &NewIssue) -> Result<CreateOutcome, AdapterError>;

    /// Every issue matching the query, across all result pages.
    async fn search(&self, query: &IssueQuery) -> Result<Vec<RemoteIssue>, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct JiraClient {
    http: HttpClient,
    base_url: String,
    user_name: String,
    api_token: String,
    template: TicketTemplate,
    page_size: u32,
}

impl JiraClient {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        user_name: impl Into<String>,
        api_token: impl Into<String>,
        template: TicketTemplate,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_name: user_name.into(),
            api_token: api_token.into(),
            template,
            page_size: 50,
        }
    }

    pub fn jql_for(&self, query: &IssueQuery) -> String {
        jql_for(&self.template, query)
    }
}

pub fn jql_for(template: &TicketTemplate, query: &IssueQuery) -> String {
    let project = escape_jql(&template.project_key);
    match query {
        IssueQuery::FileNameEquals(file_name) => format!(
            "project = \"{project}\" AND {} ~ \"\\\"{}\\\"\"",
            jql_field(&template.file_name_field),
            escape_jql(file_name)
        ),
        IssueQuery::SummaryContains(text) => format!(
            "project = \"{project}\" AND summary ~ \"\\\"{}\\\"\"",
            escape_jql(text)
        ),
    }
}

/// `customfield_11689` is addressed as `cf[11689]` inside JQL.
fn jql_field(field_id: &str) -> String {
    match field_id.strip_prefix("customfield_") {
        Some(id) => format!("cf[{id}]"),
        None => field_id.to_string(),
    }
}

fn escape_jql(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: JsonValue,
}

#[derive(Debug, Deserialize)]
struct JiraCreated {
    key: String,
}

fn field_text(fields: &JsonValue, name: &str) -> Option<String> {
    match fields.get(name)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// Decodes one search page into issues plus the server-reported total.
pub fn parse_search_page(
    body: &[u8],
    template: &TicketTemplate,
) -> Result<(Vec<RemoteIssue>, Option<u64>), AdapterError> {
    let page: JiraSearchResponse =
        serde_json::from_slice(body).map_err(|source| AdapterError::Decode {
            what: "jira search page".to_string(),
            source,
        })?;
    let issues = page
        .issues
        .into_iter()
        .map(|issue| RemoteIssue {
            summary: field_text(&issue.fields, "summary").unwrap_or_default(),
            published_date: field_text(&issue.fields, &template.published_date_field),
            file_name: field_text(&issue.fields, &template.file_name_field),
            key: issue.key,
        })
        .collect();
    Ok((issues, page.total))
}

#[async_trait]
impl TicketSink for JiraClient {
    async fn create_issue(&self, issue: &NewIssue) -> Result<CreateOutcome, AdapterError> {
        let url = format!("{}/rest/api/2/issue/", self.base_url);
        let payload = issue.to_payload(&self.template);
        let resp = self
            .http
            .client()
            .post(&url)
            .basic_auth(&self.user_name, Some(&self.api_token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AdapterError::Fetch(e.into()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AdapterError::Fetch(e.into()))?;
        if !status.is_success() {
            return Ok(CreateOutcome::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: JiraCreated =
            serde_json::from_str(&body).map_err(|source| AdapterError::Decode {
                what: "jira create response".to_string(),
                source,
            })?;
        info!(key = %created.key, status = status.as_u16(), "jira issue created");
        Ok(CreateOutcome::Created { key: created.key })
    }

    async fn search(&self, query: &IssueQuery) -> Result<Vec<RemoteIssue>, AdapterError> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let jql = self.jql_for(query);
        let fields = format!(
            "summary,{},{}",
            self.template.published_date_field, self.template.file_name_field
        );
        debug!(%jql, "jira search");

        let mut out = Vec::new();
        let mut start_at: u64 = 0;
        loop {
            let start = start_at.to_string();
            let max = self.page_size.to_string();
            let resp = self
                .http
                .send_rate_limited("jira search", |client| {
                    client
                        .get(&url)
                        .basic_auth(&self.user_name, Some(&self.api_token))
                        .query(&[
                            ("jql", jql.as_str()),
                            ("startAt", start.as_str()),
                            ("maxResults", max.as_str()),
                            ("fields", fields.as_str()),
                        ])
                })
                .await?;

            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .map_err(|e| AdapterError::Fetch(e.into()))?;
            if !status.is_success() {
                warn!(status = status.as_u16(), %jql, "jira search failed");
                return Err(AdapterError::SinkStatus {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }

            let (issues, total) = parse_search_page(&body, &self.template)?;
            let fetched = issues.len() as u64;
            out.extend(issues);
            start_at += fetched;
            if fetched == 0 || total.map_or(true, |total| start_at >= total) {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazette_core::{CandidateRecord, Category};

    fn row(display_name: &str, published: Option<&str>) -> StoredRow {
        StoredRow {
            id: 1,
            record: CandidateRecord {
                category: Category::Law,
                booklet_number: 3100,
                display_name: display_name.to_string(),
                description: "ספר החוקים 3100".to_string(),
                file_name: "3100.pdf".to_string(),
                extension: "pdf".to_string(),
                number_of_pages: 2,
                creation_date: None,
                modify_date: None,
                published_date: published.map(ToString::to_string),
                foreign_year: None,
            },
            ticket_key: None,
        }
    }

    #[test]
    fn long_titles_are_truncated_with_ellipsis() {
        let long = "א".repeat(300);
        let truncated = truncate_title(&long);
        assert_eq!(truncated.chars().count(), SUMMARY_MAX_CHARS);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_title("קצר"), "קצר");
        let exact = "ב".repeat(SUMMARY_MAX_CHARS);
        assert_eq!(truncate_title(&exact), exact);
    }

    #[test]
    fn payload_carries_template_and_custom_fields() {
        let template = TicketTemplate {
            full_title_field: Some("customfield_11691".to_string()),
            reporter: Some("acct-1".to_string()),
            ..TicketTemplate::default()
        };
        let long = format!("חוק {}", "ג".repeat(300));
        let issue = NewIssue::from_row(&row(&long, Some("2024-03-05T00:00:00")));
        let payload = issue.to_payload(&template);
        let fields = &payload["fields"];

        assert_eq!(fields["project"]["key"], "KOL");
        assert_eq!(fields["issuetype"]["name"], "שינוי חקיקה (עברית)");
        assert_eq!(fields["reporter"]["id"], "acct-1");
        assert_eq!(fields["customfield_11690"], "2024-03-05");
        assert_eq!(fields["customfield_11689"], "3100.pdf");
        assert_eq!(fields["customfield_11691"], long.as_str());
        assert_eq!(
            fields["summary"].as_str().unwrap().chars().count(),
            SUMMARY_MAX_CHARS
        );
    }

    #[test]
    fn payload_omits_unset_optional_fields() {
        let issue = NewIssue::from_row(&row("חוק", None));
        let payload = issue.to_payload(&TicketTemplate::default());
        let fields = payload["fields"].as_object().unwrap();
        assert!(!fields.contains_key("reporter"));
        assert!(!fields.contains_key("customfield_11690"));
    }

    #[test]
    fn jql_quotes_phrases_and_uses_cf_syntax() {
        let template = TicketTemplate::default();
        assert_eq!(
            jql_for(&template, &IssueQuery::FileNameEquals("3100.pdf".into())),
            r#"project = "KOL" AND cf[11689] ~ "\"3100.pdf\"""#
        );
        assert_eq!(
            jql_for(&template, &IssueQuery::SummaryContains(r#"a "b" \c"#.into())),
            r#"project = "KOL" AND summary ~ "\"a \"b\" \\c\"""#
        );
    }

    #[test]
    fn search_page_extracts_configured_fields() {
        let body = serde_json::json!({
            "startAt": 0,
            "maxResults": 50,
            "total": 2,
            "issues": [
                {"key": "KOL-1", "fields": {"summary": "חוק א", "customfield_11690": "2024-03-05", "customfield_11689": "a.pdf"}},
                {"key": "KOL-2", "fields": {"summary": "חוק ב", "customfield_11690": null}}
            ]
        });
        let (issues, total) =
            parse_search_page(body.to_string().as_bytes(), &TicketTemplate::default()).unwrap();
        assert_eq!(total, Some(2));
        assert_eq!(issues[0].published_date.as_deref(), Some("2024-03-05"));
        assert_eq!(issues[0].file_name.as_deref(), Some("a.pdf"));
        assert_eq!(issues[1].key, "KOL-2");
        assert_eq!(issues[1].published_date, None);
        assert_eq!(issues[1].file_name, None);
    }
}
