//! Ticket creation for new rows and the lookup used to recover lost keys.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use gazette_adapters::{
    truncate_title, AdapterError, CreateOutcome, IssueQuery, NewIssue, RemoteIssue, TicketSink,
};
use gazette_core::{normalize_whitespace, parse_day, StoredRow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Where a ticket batch stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HaltedSend {
    pub row_id: i64,
    pub booklet_number: i64,
    pub display_name: String,
    pub reason: String,
    pub not_attempted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Rows whose issue was created, with the key the sink assigned.
    pub created: Vec<(StoredRow, String)>,
    pub halted: Option<HaltedSend>,
}

/// How [`TicketSync::lookup`] looks for an existing ticket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    FileName,
    DisplayName,
    #[default]
    FileNameThenDisplayName,
}

impl fmt::Display for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LookupStrategy::FileName => "file",
            LookupStrategy::DisplayName => "title",
            LookupStrategy::FileNameThenDisplayName => "both",
        })
    }
}

impl FromStr for LookupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "file_name" => Ok(LookupStrategy::FileName),
            "title" | "display_name" => Ok(LookupStrategy::DisplayName),
            "both" => Ok(LookupStrategy::FileNameThenDisplayName),
            other => Err(format!("unknown lookup strategy `{other}` (expected file, title or both)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Found(String),
    Ambiguous(usize),
    Missing,
}

impl Lookup {
    fn from_matches(mut matches: Vec<RemoteIssue>) -> Self {
        match matches.len() {
            0 => Lookup::Missing,
            1 => Lookup::Found(matches.remove(0).key),
            n => Lookup::Ambiguous(n),
        }
    }

    fn into_key(self) -> Option<String> {
        match self {
            Lookup::Found(key) => Some(key),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct TicketSync {
    sink: Arc<dyn TicketSink>,
}

impl TicketSync {
    pub fn new(sink: Arc<dyn TicketSink>) -> Self {
        Self { sink }
    }

    /// Creates one issue per row, in order, stopping at the first failure.
    ///
    /// Rows created before the failure are still reported so the caller can
    /// persist their keys. A dry run only logs.
    pub async fn send(&self, rows: &[StoredRow], dry_run: bool) -> SendReport {
        let mut report = SendReport::default();
        for (idx, row) in rows.iter().enumerate() {
            let issue = NewIssue::from_row(row);
            if dry_run {
                info!(
                    category = %row.category(),
                    booklet = row.booklet_number(),
                    summary = %issue.summary,
                    file_name = %issue.file_name,
                    "dry run: would create issue"
                );
                continue;
            }

            let failure = match self.sink.create_issue(&issue).await {
                Ok(CreateOutcome::Created { key }) => {
                    info!(
                        row_id = row.id,
                        booklet = row.booklet_number(),
                        ticket_key = %key,
                        "issue created"
                    );
                    report.created.push((row.clone(), key));
                    continue;
                }
                Ok(CreateOutcome::Rejected { status, body }) => format!("sink answered {status}: {body}"),
                Err(err) => err.to_string(),
            };

            let not_attempted = rows.len() - idx - 1;
            error!(
                row_id = row.id,
                booklet = row.booklet_number(),
                display_name = %row.display_name(),
                reason = %failure,
                not_attempted,
                "issue creation failed; stopping this batch"
            );
            report.halted = Some(HaltedSend {
                row_id: row.id,
                booklet_number: row.booklet_number(),
                display_name: row.display_name().to_string(),
                reason: failure,
                not_attempted,
            });
            break;
        }
        report
    }

    /// Unique ticket carrying this file identifier, if any.
    pub async fn find_by_file_name(&self, file_name: &str) -> Result<Option<String>, AdapterError> {
        Ok(self.match_file_name(file_name).await?.into_key())
    }

    async fn match_file_name(&self, file_name: &str) -> Result<Lookup, AdapterError> {
        let query = IssueQuery::FileNameEquals(file_name.to_string());
        let matches = self
            .sink
            .search(&query)
            .await?
            .into_iter()
            .filter(|issue| issue.file_name.as_deref().map_or(true, |f| f.trim() == file_name))
            .collect::<Vec<_>>();
        let lookup = Lookup::from_matches(matches);
        if let Lookup::Ambiguous(count) = lookup {
            warn!(file_name, count, "several tickets carry the same file name");
        }
        Ok(lookup)
    }

    /// Title search with whitespace-insensitive post filtering, narrowed by
    /// published day when several tickets share the title.
    pub async fn find_by_display_name(
        &self,
        display_name: &str,
        published_date: Option<&str>,
    ) -> Result<Option<String>, AdapterError> {
        let prefix = search_prefix(display_name);
        if prefix.is_empty() {
            debug!(display_name, "empty search prefix; skipping title search");
            return Ok(None);
        }

        let wanted = normalize_whitespace(display_name);
        let wanted_summary = normalize_whitespace(&truncate_title(display_name));
        let candidates = self
            .sink
            .search(&IssueQuery::SummaryContains(prefix.clone()))
            .await?
            .into_iter()
            .filter(|issue| {
                let summary = normalize_whitespace(&issue.summary);
                summary == wanted || summary == wanted_summary
            })
            .collect::<Vec<_>>();

        match candidates.len() {
            0 => {
                debug!(display_name, %prefix, "no ticket with this title");
                Ok(None)
            }
            1 => Ok(candidates.into_iter().next().map(|issue| issue.key)),
            count => {
                let Some(day) = published_date.and_then(parse_day) else {
                    warn!(display_name, count, "several tickets share this title and no date to tell them apart");
                    return Ok(None);
                };
                let same_day = candidates
                    .into_iter()
                    .filter(|issue| issue.published_date.as_deref().and_then(parse_day) == Some(day))
                    .collect::<Vec<_>>();
                match Lookup::from_matches(same_day) {
                    Lookup::Found(key) => Ok(Some(key)),
                    Lookup::Missing => {
                        warn!(display_name, count, %day, "several tickets share this title but none on the published day");
                        Ok(None)
                    }
                    Lookup::Ambiguous(left) => {
                        warn!(display_name, count = left, %day, "several tickets share this title and published day");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Looks up the ticket of a stored row. With the combined strategy the
    /// title search only runs when the file search found nothing at all.
    pub async fn lookup(
        &self,
        row: &StoredRow,
        strategy: LookupStrategy,
    ) -> Result<Option<String>, AdapterError> {
        let record = &row.record;
        match strategy {
            LookupStrategy::FileName => self.find_by_file_name(&record.file_name).await,
            LookupStrategy::DisplayName => {
                self.find_by_display_name(&record.display_name, record.published_date.as_deref())
                    .await
            }
            LookupStrategy::FileNameThenDisplayName => match self.match_file_name(&record.file_name).await? {
                Lookup::Found(key) => Ok(Some(key)),
                Lookup::Ambiguous(_) => Ok(None),
                Lookup::Missing => {
                    self.find_by_display_name(&record.display_name, record.published_date.as_deref())
                        .await
                }
            },
        }
    }
}

/// Text handed to the sink's contains-search for a title.
///
/// Cut at the first tab, and before a `"` that sits next to a Hebrew letter
/// (year notation like התשפ"ד), which the search syntax cannot match.
pub fn search_prefix(display_name: &str) -> String {
    let head = display_name.split('\t').next().unwrap_or_default();
    let chars = head.char_indices().collect::<Vec<_>>();
    let cut = chars.iter().enumerate().find_map(|(i, &(pos, c))| {
        if c != '"' {
            return None;
        }
        let before = i.checked_sub(1).map(|j| chars[j].1);
        let after = chars.get(i + 1).map(|&(_, c)| c);
        (before.is_some_and(is_hebrew_letter) || after.is_some_and(is_hebrew_letter)).then_some(pos)
    });
    normalize_whitespace(&head[..cut.unwrap_or(head.len())])
}

fn is_hebrew_letter(c: char) -> bool {
    ('\u{05D0}'..='\u{05EA}').contains(&c)
}
