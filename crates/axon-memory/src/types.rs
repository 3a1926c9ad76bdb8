use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a stored memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// A raw conversation turn (user text + reply).
    Conversation,
    /// A compacted summary of many turns.
    Summary,
    /// An extracted entity or fact.
    Entity,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryKind::Conversation => "conversation",
            MemoryKind::Summary => "summary",
            MemoryKind::Entity => "entity",
        };
        f.write_str(s)
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(MemoryKind::Conversation),
            "summary" => Ok(MemoryKind::Summary),
            "entity" => Ok(MemoryKind::Entity),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

/// Free-form metadata attached to an entry, stored as a JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Relative weight in [0, 1]; clamped on store.
    #[serde(default = "default_importance")]
    pub importance: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_importance() -> f64 {
    0.5
}

/// A durable record used for retrieval-augmented context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub session_id: String,
    pub kind: MemoryKind,
    pub content: String,

    /// Embedding vector; empty when the store has no embedding service.
    #[serde(default)]
    pub vector: Vec<f32>,

    #[serde(default)]
    pub metadata: EntryMetadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A new entry as handed to [`store`](crate::store::MemoryStore::store);
/// the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub session_id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub metadata: EntryMetadata,
}

impl NewEntry {
    pub fn conversation(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            kind: MemoryKind::Conversation,
            content: content.into(),
            metadata: EntryMetadata::default(),
        }
    }

    pub fn summary(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            kind: MemoryKind::Summary,
            content: content.into(),
            metadata: EntryMetadata::default(),
        }
    }
}

/// How a search scores candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Fulltext,
    Hybrid,
}

/// Pre-scoring filters. All present fields must match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub session_id: Option<String>,
    pub kind: Option<MemoryKind>,
    pub tags: Vec<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Unset uses the configured default, clamped to the global maximum.
    pub limit: Option<usize>,
    /// Unset picks vector when embeddings are available, fulltext otherwise.
    pub mode: Option<SearchMode>,
    pub filter: SearchFilter,
}

/// An entry with its search score.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub score: f64,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    /// Entries carrying a non-empty vector.
    pub vectored: u64,
    /// Pinned embedding dimension, once the first vector was stored.
    pub dimension: Option<usize>,
}

/// Outcome of a retention cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub deleted: u64,
    /// Deleted conversation entries that were already covered by a stored
    /// summary for their session.
    pub summarized: u64,
    pub errors: u64,
}

/// One TODO item inside a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    #[serde(default)]
    pub done: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Default for TimeRange {
    fn default() -> Self {
        let now = Utc::now();
        Self { start: now, end: now }
    }
}

/// A compacted representation of a conversation stretch.
///
/// Persisted as a memory entry of kind `summary` with this structure's JSON
/// serialization as the content. Field names use camelCase so the stored
/// JSON matches what summarization models are asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default)]
    pub original_message_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in [
            MemoryKind::Conversation,
            MemoryKind::Summary,
            MemoryKind::Entity,
        ] {
            let s = kind.to_string();
            assert_eq!(s.parse::<MemoryKind>().unwrap(), kind);
        }
        assert!("nope".parse::<MemoryKind>().is_err());
    }

    #[test]
    fn summary_parses_partial_json_with_defaults() {
        let parsed: Summary =
            serde_json::from_str(r#"{"topic":"trip","keyPoints":["fly monday"]}"#).unwrap();
        assert_eq!(parsed.topic, "trip");
        assert_eq!(parsed.key_points, vec!["fly monday"]);
        assert!(parsed.decisions.is_empty());
        assert!(parsed.todos.is_empty());
    }

    #[test]
    fn summary_camel_case_serialization() {
        let summary = Summary {
            id: "s1".into(),
            topic: "t".into(),
            key_points: vec!["k".into()],
            original_message_count: 7,
            ..Summary::default()
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"keyPoints\""));
        assert!(json.contains("\"originalMessageCount\":7"));
    }
}
