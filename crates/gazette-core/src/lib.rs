//! Core domain model for the gazette ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "gazette-core";

/// The three publication kinds tracked from the source feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Law,
    Regulation,
    Notification,
}

#[derive(Debug, Error)]
#[error("unknown category `{0}` (expected law, regulation or notification)")]
pub struct UnknownCategory(pub String);

impl Category {
    /// Processing order for one cycle and for the ticket batch.
    pub const ALL: [Category; 3] = [Category::Law, Category::Regulation, Category::Notification];

    /// Stable integer persisted in the `booklet_type` column.
    pub fn code(self) -> i64 {
        match self {
            Category::Law => 1,
            Category::Regulation => 2,
            Category::Notification => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Category::Law),
            2 => Some(Category::Regulation),
            3 => Some(Category::Notification),
            _ => None,
        }
    }

    /// `FolderType` selector understood by the upstream search endpoint.
    pub fn folder_type(self) -> &'static str {
        match self {
            Category::Law => "1",
            Category::Notification => "2",
            Category::Regulation => "3",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Category::Law => "law",
            Category::Regulation => "regulation",
            Category::Notification => "notification",
        }
    }

    pub fn hebrew_label(self) -> &'static str {
        match self {
            Category::Law => "חוק",
            Category::Regulation => "תקנה",
            Category::Notification => "הודעה",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "law" | "laws" => Ok(Category::Law),
            "regulation" | "regulations" | "takana" | "takanot" => Ok(Category::Regulation),
            "notification" | "notifications" => Ok(Category::Notification),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Uniqueness key of a stored row within one category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookletKey {
    pub booklet_number: i64,
    pub display_name: String,
}

impl BookletKey {
    pub fn new(booklet_number: i64, display_name: impl Into<String>) -> Self {
        Self {
            booklet_number,
            display_name: display_name.into(),
        }
    }
}

/// One logical item produced from a raw upstream document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub category: Category,
    pub booklet_number: i64,
    pub display_name: String,
    pub description: String,
    pub file_name: String,
    pub extension: String,
    pub number_of_pages: i64,
    pub creation_date: Option<String>,
    pub modify_date: Option<String>,
    pub published_date: Option<String>,
    pub foreign_year: Option<String>,
}

impl CandidateRecord {
    pub fn key(&self) -> BookletKey {
        BookletKey::new(self.booklet_number, self.display_name.clone())
    }

    /// Calendar day of publication, when the feed supplied a parseable date.
    pub fn published_day(&self) -> Option<NaiveDate> {
        self.published_date.as_deref().and_then(parse_day)
    }
}

/// A candidate that has been persisted, plus its ticket key once known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: i64,
    pub record: CandidateRecord,
    pub ticket_key: Option<String>,
}

impl StoredRow {
    /// Preview row for dry runs; never written to the store.
    pub fn unsaved(record: CandidateRecord) -> Self {
        Self {
            id: 0,
            record,
            ticket_key: None,
        }
    }

    pub fn category(&self) -> Category {
        self.record.category
    }

    pub fn booklet_number(&self) -> i64 {
        self.record.booklet_number
    }

    pub fn display_name(&self) -> &str {
        &self.record.display_name
    }
}

/// Parses the leading `YYYY-MM-DD` of a feed timestamp such as `2024-03-05T00:00:00`.
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    let head = value.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Line-break markup collapsed to single spaces, for search text and titles.
pub fn flatten_markup(text: &str) -> String {
    replace_line_breaks(text, " ").trim().to_string()
}

/// Line-break markup turned into newlines, for human-readable fields.
pub fn multiline_markup(text: &str) -> String {
    replace_line_breaks(text, "\n")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Splits on line-break markup (and literal newlines), dropping empty fragments.
pub fn split_line_breaks(text: &str) -> Vec<String> {
    replace_line_breaks(text, "\n")
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn replace_line_breaks(text: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some((start, end)) = find_line_break(rest) {
        out.push_str(&rest[..start]);
        out.push_str(replacement);
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

// Matches `<br>`, `<br/>`, `<br />` in any letter case.
fn find_line_break(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(offset) = text[from..].find('<') {
        let start = from + offset;
        let tag = &bytes[start..];
        if tag.len() >= 4 && tag[1..3].eq_ignore_ascii_case(b"br") {
            let mut i = 3;
            while i < tag.len() && tag[i] == b' ' {
                i += 1;
            }
            if i < tag.len() && tag[i] == b'/' {
                i += 1;
            }
            if i < tag.len() && tag[i] == b'>' {
                return Some((start, start + i + 1));
            }
        }
        from = start + 1;
    }
    None
}
