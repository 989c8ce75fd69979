//! Admit-or-skip policy for freshly normalized candidates.

use std::collections::{HashMap, HashSet};

use gazette_core::{BookletKey, CandidateRecord, StoredRow};
use serde::Serialize;

pub const DEFAULT_LOOKBACK: i64 = 50;

/// Outcome of [`admit`], carrying the reason for audit logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Admission {
    Duplicate,
    FirstInCategory,
    WithinWindow { threshold: i64 },
    BehindWindow { threshold: i64 },
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::FirstInCategory | Admission::WithinWindow { .. })
    }

    pub fn label(self) -> &'static str {
        match self {
            Admission::Duplicate => "duplicate",
            Admission::FirstInCategory => "first_in_category",
            Admission::WithinWindow { .. } => "within_window",
            Admission::BehindWindow { .. } => "behind_window",
        }
    }
}

/// Decides whether a candidate becomes a stored row.
///
/// Exact `(booklet_number, display_name)` duplicates are always skipped. An
/// empty category admits everything; otherwise anything at or above
/// `high_water - lookback` is admitted so stragglers the feed skipped on a
/// previous cycle are still picked up. A negative lookback counts as zero.
pub fn admit(
    candidate: &CandidateRecord,
    high_water: Option<&StoredRow>,
    stored: &HashSet<BookletKey>,
    lookback: i64,
) -> Admission {
    if stored.contains(&candidate.key()) {
        return Admission::Duplicate;
    }
    let Some(high_water) = high_water else {
        return Admission::FirstInCategory;
    };
    let threshold = high_water.booklet_number().saturating_sub(lookback.max(0));
    if candidate.booklet_number >= threshold {
        Admission::WithinWindow { threshold }
    } else {
        Admission::BehindWindow { threshold }
    }
}

/// Collapses exact key collisions inside one batch. The last record wins but
/// keeps the slot of the first occurrence.
pub fn dedup_batch(records: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
    let mut slots: HashMap<BookletKey, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<CandidateRecord> = Vec::with_capacity(records.len());
    for record in records {
        match slots.get(&record.key()) {
            Some(&slot) => out[slot] = record,
            None => {
                slots.insert(record.key(), out.len());
                out.push(record);
            }
        }
    }
    out
}
