//! Search predicates and result ordering for the record store.
//!
//! All orderings end with the record id (ascending) so exact ties in
//! importance and timestamp still produce a stable, deterministic order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::schema::{ContextValue, MemoryRecord, MemoryType};

/// Multi-predicate search over stored records.  Every unset field matches.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Case-insensitive substrings; a record matches when any term occurs in
    /// its content, one of its tags, or a stringified context value.
    pub terms: Vec<String>,
    /// Inclusive lower timestamp bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub end: Option<DateTime<Utc>>,
    /// Allowed types; empty means all types.
    pub types: HashSet<MemoryType>,
    pub min_importance: Option<f32>,
    /// Maximum number of results; the store default applies when unset.
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn text(terms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = MemoryType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    pub fn with_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_min_importance(mut self, min: f32) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if !self.types.is_empty() && !self.types.contains(&record.memory_type) {
            return false;
        }
        if let Some(min) = self.min_importance {
            if record.importance_score < min {
                return false;
            }
        }
        if !within(record.timestamp, self.start, self.end) {
            return false;
        }

        let terms = self
            .terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>();
        terms.is_empty() || terms.iter().any(|term| mentions(record, term))
    }
}

/// Inclusive range check.  A record without a timestamp only passes an
/// unbounded range.
pub fn within(
    timestamp: Option<DateTime<Utc>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    if start.is_none() && end.is_none() {
        return true;
    }
    let Some(ts) = timestamp else { return false };
    start.is_none_or(|s| ts >= s) && end.is_none_or(|e| ts <= e)
}

fn mentions(record: &MemoryRecord, term: &str) -> bool {
    contains_icase(&record.content, term)
        || record.tags.iter().any(|tag| contains_icase(tag, term))
        || record
            .context
            .values()
            .any(|value| contains_icase(&value.to_string(), term))
}

pub(crate) fn contains_icase(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Fraction of `criteria` a record satisfies, or `None` when it must be
/// excluded.
///
/// A key present in the record's context must match (strings by
/// case-insensitive containment, everything else by value); a present but
/// mismatching key excludes the record.  A key missing from the context
/// counts as unmatched.  Records matching no criterion are excluded.
pub fn context_match_fraction(
    record: &MemoryRecord,
    criteria: &BTreeMap<String, ContextValue>,
) -> Option<f64> {
    if criteria.is_empty() {
        return None;
    }
    let mut matched = 0usize;
    for (key, wanted) in criteria {
        let Some(actual) = record.context.get(key) else { continue };
        let hit = match (actual.as_text(), wanted.as_text()) {
            (Some(actual), Some(wanted)) => contains_icase(actual, wanted),
            _ => actual.loosely_equals(wanted),
        };
        if !hit {
            return None;
        }
        matched += 1;
    }
    (matched > 0).then(|| matched as f64 / criteria.len() as f64)
}

fn by_id(a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    a.id.cmp(&b.id)
}

fn importance_desc(a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    b.importance_score.total_cmp(&a.importance_score)
}

/// Newest first; records without a timestamp sort last.
fn recency_desc(a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    b.timestamp.cmp(&a.timestamp)
}

/// Default order: importance desc, recency desc, id asc.
pub fn rank_by_importance(records: &mut [MemoryRecord]) {
    records.sort_by(|a, b| {
        importance_desc(a, b)
            .then_with(|| recency_desc(a, b))
            .then_with(|| by_id(a, b))
    });
}

/// Temporal order: recency desc, importance desc, id asc.
pub fn rank_by_recency(records: &mut [MemoryRecord]) {
    records.sort_by(|a, b| {
        recency_desc(a, b)
            .then_with(|| importance_desc(a, b))
            .then_with(|| by_id(a, b))
    });
}

/// Context order: matched fraction desc, then the default order.
pub fn rank_by_context_fraction(scored: &mut [(f64, MemoryRecord)]) {
    scored.sort_by(|(fa, a), (fb, b)| {
        fb.total_cmp(fa)
            .then_with(|| importance_desc(a, b))
            .then_with(|| recency_desc(a, b))
            .then_with(|| by_id(a, b))
    });
}
