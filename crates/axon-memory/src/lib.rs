//! Retrieval-augmented memory: a SQLite store of prior turns and summaries
//! with vector, full-text and hybrid search, plus a Markdown audit mirror.

pub mod db;
pub mod embed;
pub mod error;
pub mod fulltext;
pub mod markdown;
pub mod store;
pub mod types;

pub use embed::Embedder;
pub use error::{MemoryError, Result};
pub use store::{MemoryStore, MemoryStoreConfig, MAX_SEARCH_LIMIT};
pub use types::{
    CleanupReport, EntryMetadata, MemoryEntry, MemoryKind, MemoryStats, NewEntry, ScoredEntry,
    SearchFilter, SearchMode, SearchOptions, Summary, TimeRange, TodoItem,
};
