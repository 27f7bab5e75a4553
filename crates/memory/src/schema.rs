use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime class of a memory record.
///
/// | Type        | Purpose                                              |
/// |-------------|------------------------------------------------------|
/// | `ShortTerm` | Volatile observations, normally never made durable   |
/// | `LongTerm`  | Consolidated knowledge kept across runs              |
/// | `Working`   | Scratch state for an in-flight task                  |
/// | `Episodic`  | Time-anchored experiences                            |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryType {
    ShortTerm,
    LongTerm,
    Working,
    Episodic,
}

impl MemoryType {
    pub fn label(self) -> &'static str {
        match self {
            Self::ShortTerm => "ShortTerm",
            Self::LongTerm => "LongTerm",
            Self::Working => "Working",
            Self::Episodic => "Episodic",
        }
    }

    /// Parse a type from its label (case-insensitive, `_`/`-` tolerant).
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "shortterm" | "short" => Some(Self::ShortTerm),
            "longterm" | "long" => Some(Self::LongTerm),
            "working" => Some(Self::Working),
            "episodic" => Some(Self::Episodic),
            _ => None,
        }
    }
}

/// Heterogeneous scalar stored in a record's context map.
///
/// Serialized untagged so the on-disk JSON stays a plain object; variant
/// order matters for decoding (`1` is an `Integer`, `1.0` a `Float`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Equality used by context search: numbers compare by value across the
    /// integer/float split, everything else structurally.
    pub fn loosely_equals(&self, other: &ContextValue) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A unit of durable memory plus its metadata.
///
/// Field order is the canonical serialization order; maps and sets are
/// ordered so two equal records always encode to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub context: BTreeMap<String, ContextValue>,
    /// Assigned by the store on first write when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub importance_score: f32,
    pub memory_type: MemoryType,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Ids of related records.  Dangling ids are allowed.
    #[serde(default)]
    pub associations: BTreeSet<String>,
    /// gzip level the record was last written with.
    #[serde(default)]
    pub compression_level: u32,
}

impl MemoryRecord {
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            context: BTreeMap::new(),
            timestamp: None,
            importance_score: 0.5,
            memory_type,
            tags: BTreeSet::new(),
            associations: BTreeSet::new(),
            compression_level: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance_score = importance;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_association(mut self, id: impl Into<String>) -> Self {
        self.associations.insert(id.into());
        self
    }

    /// First 8 characters of the id, used in log lines and CLI listings.
    pub fn id_short(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((i, _)) => &self.id[..i],
            None => &self.id,
        }
    }
}
