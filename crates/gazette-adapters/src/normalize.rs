//! Raw Reshumot search results and their normalization into candidate records.

use gazette_core::{
    flatten_markup, multiline_markup, normalize_whitespace, split_line_breaks, CandidateRecord,
    Category,
};
use scraper::Html;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error};

/// Phrases announcing that indirect amendments follow in a summary.
pub const INDIRECT_AMENDMENT_SEPARATORS: [&str; 2] = ["תיקונים עקיפים:", "תיקון עקיף:"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(rename = "Results", default)]
    pub results: Vec<RawResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    #[serde(rename = "Data")]
    pub data: RawDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawDocument {
    #[serde(rename = "BookletNum", deserialize_with = "lenient_i64")]
    pub booklet_num: i64,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub pages: Option<i64>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub modify_date: Option<String>,
    #[serde(default)]
    pub publish_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub foreign_year: Option<String>,
    #[serde(default)]
    pub document: Vec<RawDocumentDescriptor>,
    #[serde(default)]
    pub doc_summary: RawDocSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawDocumentDescriptor {
    pub file_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub extension: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDocSummary {
    #[serde(rename = "DescriptionHtmlString", default)]
    pub description_html_string: Option<String>,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("booklet #{booklet_number} carries {count} documents (first: `{first}`); expected exactly one")]
    MultipleDocuments {
        booklet_number: i64,
        count: usize,
        first: String,
    },
    #[error("booklet #{booklet_number} carries no document descriptor")]
    MissingDocument { booklet_number: i64 },
}

/// Turns one raw document into one candidate per logical item it announces.
pub fn normalize_document(
    raw: &RawDocument,
    category: Category,
) -> Result<Vec<CandidateRecord>, NormalizeError> {
    let descriptor = match raw.document.as_slice() {
        [one] => one,
        [] => {
            error!(booklet = raw.booklet_num, %category, "document list is empty");
            return Err(NormalizeError::MissingDocument {
                booklet_number: raw.booklet_num,
            });
        }
        [first, ..] => {
            error!(
                booklet = raw.booklet_num,
                %category,
                count = raw.document.len(),
                first = %first.display_name,
                "data has more than one document"
            );
            return Err(NormalizeError::MultipleDocuments {
                booklet_number: raw.booklet_num,
                count: raw.document.len(),
                first: first.display_name.clone(),
            });
        }
    };

    let summary = raw
        .doc_summary
        .description_html_string
        .as_deref()
        .unwrap_or_default();
    let title = multiline_markup(&descriptor.display_name);

    let (description, names_source) = match split_on_separator(summary) {
        Some((head, tail)) => {
            let head = multiline_markup(head);
            let description = if head.is_empty() {
                title
            } else {
                format!("{title}\n\n{head}")
            };
            (description, tail)
        }
        None => (title, summary),
    };

    let mut display_names = split_line_breaks(names_source)
        .iter()
        .map(|fragment| strip_inline_markup(fragment))
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    if display_names.is_empty() {
        let fallback = normalize_whitespace(&flatten_markup(&descriptor.display_name));
        if !fallback.is_empty() {
            display_names.push(fallback);
        }
    }

    debug!(
        booklet = raw.booklet_num,
        %category,
        items = display_names.len(),
        "normalized document"
    );

    Ok(display_names
        .into_iter()
        .map(|display_name| CandidateRecord {
            category,
            booklet_number: raw.booklet_num,
            display_name,
            description: description.clone(),
            file_name: descriptor.file_name.clone(),
            extension: descriptor.extension.clone(),
            number_of_pages: raw.pages.unwrap_or_default(),
            creation_date: raw.creation_date.clone(),
            modify_date: raw.modify_date.clone(),
            published_date: raw.publish_date.clone(),
            foreign_year: raw.foreign_year.clone(),
        })
        .collect())
}

/// Lazily normalizes a whole page, oldest document first.
///
/// The upstream lists newest first; walking it backwards keeps inserts in
/// ascending booklet order. The page is consumed.
pub fn normalize_page(
    page: FeedPage,
    category: Category,
) -> impl Iterator<Item = Result<CandidateRecord, NormalizeError>> {
    page.results
        .into_iter()
        .rev()
        .flat_map(move |result| match normalize_document(&result.data, category) {
            Ok(records) => records.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(err) => vec![Err(err)],
        })
}

fn split_on_separator(summary: &str) -> Option<(&str, &str)> {
    INDIRECT_AMENDMENT_SEPARATORS
        .iter()
        .filter_map(|sep| summary.find(sep).map(|pos| (pos, sep.len())))
        .min_by_key(|(pos, _)| *pos)
        .map(|(pos, len)| (&summary[..pos], &summary[pos + len..]))
}

fn strip_inline_markup(fragment: &str) -> String {
    if !fragment.contains('<') && !fragment.contains('&') {
        return normalize_whitespace(fragment);
    }
    let parsed = Html::parse_fragment(fragment);
    let text = parsed.root_element().text().collect::<String>();
    normalize_whitespace(&text)
}

fn json_to_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = JsonValue::deserialize(deserializer)?;
    json_to_i64(&value).ok_or_else(|| de::Error::custom(format!("expected an integer, got {value}")))
}

fn lenient_opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = JsonValue::deserialize(deserializer)?;
    Ok(json_to_i64(&value))
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
