#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gazette_adapters::{
    AdapterError, CreateOutcome, FeedPage, FeedRequest, IssueQuery, NewIssue, RemoteIssue,
    SourceFeed, TicketSink,
};
use gazette_core::{normalize_whitespace, CandidateRecord, Category};
use serde_json::{json, Value};

/// Serves one canned page per category.
#[derive(Default)]
pub struct StaticFeed {
    pages: HashMap<Category, FeedPage>,
    failing: Option<(Category, u16)>,
}

impl StaticFeed {
    pub fn with_page(mut self, category: Category, results: Vec<Value>) -> Self {
        let page = serde_json::from_value(json!({ "Results": results })).expect("feed page");
        self.pages.insert(category, page);
        self
    }

    pub fn failing(mut self, category: Category, status: u16) -> Self {
        self.failing = Some((category, status));
        self
    }
}

#[async_trait]
impl SourceFeed for StaticFeed {
    fn feed_id(&self) -> &'static str {
        "static"
    }

    async fn fetch_page(&self, request: &FeedRequest) -> Result<FeedPage, AdapterError> {
        if let Some((category, status)) = self.failing {
            if category == request.category {
                return Err(AdapterError::FeedStatus { category, status });
            }
        }
        Ok(self.pages.get(&request.category).cloned().unwrap_or_default())
    }
}

pub fn raw_result(booklet: i64, summary: &str) -> Value {
    json!({
        "Data": {
            "BookletNum": booklet,
            "Pages": 3,
            "CreationDate": "2024-03-05T08:00:00",
            "ModifyDate": "2024-03-05T09:00:00",
            "PublishDate": "2024-03-05T00:00:00",
            "ForeignYear": "5784",
            "Document": [{
                "FileName": format!("{booklet}.pdf"),
                "DisplayName": format!("ספר החוקים {booklet}"),
                "Extension": "pdf"
            }],
            "DocSummary": { "DescriptionHtmlString": summary }
        }
    })
}

/// Ticket sink double: records every create attempt and answers searches
/// from a fixed issue list.
#[derive(Default)]
pub struct FakeSink {
    pub reject_call: Option<usize>,
    pub issues: Vec<RemoteIssue>,
    pub attempts: Mutex<Vec<NewIssue>>,
    pub queries: Mutex<Vec<IssueQuery>>,
}

impl FakeSink {
    pub fn with_issues(issues: Vec<RemoteIssue>) -> Self {
        Self {
            issues,
            ..Default::default()
        }
    }

    pub fn rejecting(call: usize) -> Self {
        Self {
            reject_call: Some(call),
            ..Default::default()
        }
    }

    pub fn attempted_summaries(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|issue| issue.summary.clone())
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl TicketSink for FakeSink {
    async fn create_issue(&self, issue: &NewIssue) -> Result<CreateOutcome, AdapterError> {
        let mut attempts = self.attempts.lock().unwrap();
        let call = attempts.len();
        attempts.push(issue.clone());
        if self.reject_call == Some(call) {
            return Ok(CreateOutcome::Rejected {
                status: 400,
                body: r#"{"errors":{"summary":"rejected"}}"#.to_string(),
            });
        }
        Ok(CreateOutcome::Created {
            key: format!("KOL-{}", call + 1),
        })
    }

    async fn search(&self, query: &IssueQuery) -> Result<Vec<RemoteIssue>, AdapterError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(self
            .issues
            .iter()
            .filter(|issue| match query {
                IssueQuery::FileNameEquals(name) => issue.file_name.as_deref() == Some(name.as_str()),
                IssueQuery::SummaryContains(text) => {
                    normalize_whitespace(&issue.summary).contains(text.as_str())
                }
            })
            .cloned()
            .collect())
    }
}

pub fn remote(key: &str, summary: &str, published: Option<&str>, file_name: Option<&str>) -> RemoteIssue {
    RemoteIssue {
        key: key.to_string(),
        summary: summary.to_string(),
        published_date: published.map(ToString::to_string),
        file_name: file_name.map(ToString::to_string),
    }
}

pub fn record(category: Category, booklet: i64, name: &str) -> CandidateRecord {
    CandidateRecord {
        category,
        booklet_number: booklet,
        display_name: name.to_string(),
        description: format!("booklet {booklet}"),
        file_name: format!("{booklet}.pdf"),
        extension: "pdf".to_string(),
        number_of_pages: 1,
        creation_date: None,
        modify_date: None,
        published_date: None,
        foreign_year: None,
    }
}
