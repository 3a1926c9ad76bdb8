//! SQLite-backed memory store with vector, full-text and hybrid search.
//!
//! Thread-safe: the connection sits behind a `Mutex`; embedding calls happen
//! before the lock is taken so the guard never crosses an await point.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db;
use crate::embed::{cosine_similarity, Embedder};
use crate::error::{MemoryError, Result};
use crate::fulltext;
use crate::markdown;
use crate::types::*;

/// Hard cap applied to every search limit.
pub const MAX_SEARCH_LIMIT: usize = 50;
/// Upper bound on rows pulled into a scoring pass.
const CANDIDATE_SCAN_LIMIT: usize = 1000;
/// Reciprocal-rank weights for hybrid merge.
const HYBRID_VECTOR_WEIGHT: f64 = 0.6;
const HYBRID_FULLTEXT_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Default result count when a search does not specify one.
    pub search_limit: usize,
    /// Conversation entries older than this are removed by cleanup.
    pub retention_days: u32,
    /// Directory for per-session Markdown audit files; unset disables them.
    pub markdown_dir: Option<PathBuf>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            search_limit: 5,
            retention_days: 30,
            markdown_dir: None,
        }
    }
}

/// Vector + full-text store of prior turns and summaries.
pub struct MemoryStore {
    conn: Mutex<Connection>,
    embedder: Option<Arc<dyn Embedder>>,
    cfg: MemoryStoreConfig,
}

impl MemoryStore {
    /// Open (creating if needed) a store at `path`.
    pub fn open(
        path: impl Into<PathBuf>,
        cfg: MemoryStoreConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            cfg,
        })
    }

    /// In-memory store, used by tests and ephemeral deployments.
    pub fn open_in_memory(
        cfg: MemoryStoreConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            cfg,
        })
    }

    /// Whether vector search is currently possible.
    pub fn has_embeddings(&self) -> bool {
        self.embedder.as_ref().map(|e| e.is_available()).unwrap_or(false)
    }

    /// Persist a new entry, embedding its content when possible.
    ///
    /// Embedding failures are not fatal: the entry is stored with an empty
    /// vector and the error is logged.
    pub async fn store(&self, new: NewEntry) -> Result<MemoryEntry> {
        let mut metadata = new.metadata;
        metadata.importance = metadata.importance.clamp(0.0, 1.0);

        // Embed before taking the connection lock.
        let vector = match &self.embedder {
            Some(e) if e.is_available() => match e.embed(&new.content).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "embedding failed, storing entry without vector");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        let now = Utc::now();
        let entry = MemoryEntry {
            id: Uuid::now_v7().to_string(),
            session_id: new.session_id,
            kind: new.kind,
            content: new.content,
            vector,
            metadata,
            created_at: now,
            updated_at: now,
        };

        {
            let conn = self.conn.lock().unwrap();
            let vector = self.checked_vector(&conn, &entry)?;
            conn.execute(
                "INSERT INTO memory_entries
                 (id, session_id, kind, content, vector, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    entry.id,
                    entry.session_id,
                    entry.kind.to_string(),
                    entry.content,
                    vector.map(db::vector_to_blob),
                    serde_json::to_string(&entry.metadata)?,
                    entry.created_at.to_rfc3339(),
                    entry.updated_at.to_rfc3339(),
                ],
            )?;
        }

        if let Some(dir) = &self.cfg.markdown_dir {
            if let Err(e) = markdown::append_entry(dir, &entry) {
                warn!(error = %e, session = %entry.session_id, "markdown audit append failed");
            }
        }

        debug!(id = %entry.id, kind = %entry.kind, "memory entry stored");
        Ok(entry)
    }

    /// Search stored entries.
    ///
    /// Mode defaults to vector when embeddings are available, fulltext
    /// otherwise; a vector request without embeddings degrades silently to
    /// fulltext. An empty query returns an empty list.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<ScoredEntry>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = opts
            .limit
            .unwrap_or(self.cfg.search_limit)
            .clamp(1, MAX_SEARCH_LIMIT);
        let mode = opts.mode.unwrap_or(if self.has_embeddings() {
            SearchMode::Vector
        } else {
            SearchMode::Fulltext
        });

        let candidates = self.fetch_candidates(&opts.filter)?;
        match mode {
            SearchMode::Vector => self.vector_search(query, candidates, limit).await,
            SearchMode::Fulltext => Ok(fulltext_rank(query, candidates, limit)),
            SearchMode::Hybrid => self.hybrid_search(query, candidates, limit).await,
        }
    }

    /// Most recent entries for a session, newest first.
    pub fn get_recent(&self, session_id: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, kind, content, vector, metadata, created_at, updated_at
             FROM memory_entries
             WHERE session_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id, limit as i64], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT id, session_id, kind, content, vector, metadata, created_at, updated_at
             FROM memory_entries WHERE id = ?1",
            rusqlite::params![id],
            row_to_entry,
        ) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MemoryError::Database(e)),
        }
    }

    /// Delete one entry; returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM memory_entries WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Remove every entry belonging to a session. Returns the count removed.
    pub fn clear_session(&self, session_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM memory_entries WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(changed as u64)
    }

    pub fn get_stats(&self) -> Result<MemoryStats> {
        let conn = self.conn.lock().unwrap();
        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM memory_entries", [], |r| r.get(0))?;
        let vectored: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_entries WHERE vector IS NOT NULL AND LENGTH(vector) > 0",
            [],
            |r| r.get(0),
        )?;

        let mut by_kind = std::collections::BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT kind, COUNT(*) FROM memory_entries GROUP BY kind")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows.filter_map(|r| r.ok()) {
            by_kind.insert(row.0, row.1 as u64);
        }

        let dimension = db::embedding_dimension(&conn)?;
        Ok(MemoryStats {
            total: total as u64,
            by_kind,
            vectored: vectored as u64,
            dimension,
        })
    }

    /// Remove expired entries and conversation entries older than the
    /// retention window. Errors are counted, not raised.
    pub fn cleanup_expired(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let now = Utc::now();
        let cutoff = now - Duration::days(self.cfg.retention_days as i64);

        let rows: Vec<(String, String, MemoryKind, Option<DateTime<Utc>>, DateTime<Utc>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = match conn.prepare(
                "SELECT id, session_id, kind, metadata, created_at FROM memory_entries",
            ) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "cleanup: query failed");
                    report.errors += 1;
                    return report;
                }
            };
            let mapped = stmt.query_map([], |r| {
                let kind: String = r.get(2)?;
                let metadata: String = r.get(3)?;
                let created: String = r.get(4)?;
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    kind,
                    metadata,
                    created,
                ))
            });
            match mapped {
                Ok(iter) => iter
                    .filter_map(|r| r.ok())
                    .map(|(id, session, kind, metadata, created)| {
                        let kind = kind.parse().unwrap_or(MemoryKind::Conversation);
                        let expires_at = serde_json::from_str::<EntryMetadata>(&metadata)
                            .ok()
                            .and_then(|m| m.expires_at);
                        let created_at = DateTime::parse_from_rfc3339(&created)
                            .map(|d| d.with_timezone(&Utc))
                            .unwrap_or(now);
                        (id, session, kind, expires_at, created_at)
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "cleanup: scan failed");
                    report.errors += 1;
                    return report;
                }
            }
        };

        // Sessions that already have a summary keep their facts even after
        // the raw turns are dropped.
        let summarized_sessions: std::collections::HashSet<&str> = rows
            .iter()
            .filter(|(_, _, kind, _, _)| *kind == MemoryKind::Summary)
            .map(|(_, session, _, _, _)| session.as_str())
            .collect();

        for (id, session, kind, expires_at, created_at) in &rows {
            let expired = expires_at.map(|at| at <= now).unwrap_or(false);
            let aged_out = *kind == MemoryKind::Conversation && *created_at < cutoff;
            if !expired && !aged_out {
                continue;
            }
            match self.delete(id) {
                Ok(true) => {
                    report.deleted += 1;
                    if *kind == MemoryKind::Conversation
                        && summarized_sessions.contains(session.as_str())
                    {
                        report.summarized += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, id = %id, "cleanup: delete failed");
                    report.errors += 1;
                }
            }
        }

        debug!(
            deleted = report.deleted,
            summarized = report.summarized,
            errors = report.errors,
            "cleanup pass complete"
        );
        report
    }

    /// Validate the vector against the pinned dimension, pinning it on the
    /// first vectored insert. A mismatch is treated like an embedding
    /// failure: the entry is stored without a vector.
    fn checked_vector<'a>(
        &self,
        conn: &Connection,
        entry: &'a MemoryEntry,
    ) -> Result<Option<&'a [f32]>> {
        if entry.vector.is_empty() {
            return Ok(None);
        }
        match db::embedding_dimension(conn)? {
            Some(dim) if dim != entry.vector.len() => {
                warn!(
                    expected = dim,
                    got = entry.vector.len(),
                    "vector dimension mismatch, storing entry without vector"
                );
                Ok(None)
            }
            Some(_) => Ok(Some(&entry.vector)),
            None => {
                db::set_embedding_dimension(conn, entry.vector.len())?;
                Ok(Some(&entry.vector))
            }
        }
    }

    /// Load filter-matching rows, newest first, bounded by the scan cap.
    fn fetch_candidates(&self, filter: &SearchFilter) -> Result<Vec<MemoryEntry>> {
        let mut sql = String::from(
            "SELECT id, session_id, kind, content, vector, metadata, created_at, updated_at
             FROM memory_entries WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(session) = &filter.session_id {
            sql.push_str(" AND session_id = ?");
            params.push(Box::new(session.clone()));
        }
        if let Some(kind) = &filter.kind {
            sql.push_str(" AND kind = ?");
            params.push(Box::new(kind.to_string()));
        }
        if let Some(after) = &filter.after {
            sql.push_str(" AND created_at >= ?");
            params.push(Box::new(after.to_rfc3339()));
        }
        if let Some(before) = &filter.before {
            sql.push_str(" AND created_at <= ?");
            params.push(Box::new(before.to_rfc3339()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        params.push(Box::new(CANDIDATE_SCAN_LIMIT as i64));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_entry,
        )?;
        let mut entries: Vec<MemoryEntry> = rows.filter_map(|r| r.ok()).collect();

        // Tag filtering needs the parsed metadata, so it happens here.
        if !filter.tags.is_empty() {
            entries.retain(|e| {
                filter
                    .tags
                    .iter()
                    .all(|t| e.metadata.tags.iter().any(|have| have == t))
            });
        }
        Ok(entries)
    }

    async fn vector_search(
        &self,
        query: &str,
        candidates: Vec<MemoryEntry>,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let embedder = match &self.embedder {
            Some(e) if e.is_available() => e.clone(),
            _ => return Ok(fulltext_rank(query, candidates, limit)),
        };
        let query_vec = match embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to fulltext");
                return Ok(fulltext_rank(query, candidates, limit));
            }
        };

        let mut scored: Vec<ScoredEntry> = candidates
            .into_iter()
            .filter(|e| !e.vector.is_empty())
            .map(|entry| {
                let score = cosine_similarity(&query_vec, &entry.vector);
                ScoredEntry { entry, score }
            })
            .filter(|s| s.score > 0.0)
            .collect();
        sort_scored(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn hybrid_search(
        &self,
        query: &str,
        candidates: Vec<MemoryEntry>,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>> {
        // Both branches rank over a wider pool, then ranks are merged.
        let pool = (limit * 3).max(10);
        let vector_ranked = self
            .vector_search(query, candidates.clone(), pool)
            .await?;
        let fulltext_ranked = fulltext_rank(query, candidates, pool);

        let mut merged: std::collections::HashMap<String, (MemoryEntry, f64)> =
            std::collections::HashMap::new();
        for (rank, hit) in vector_ranked.into_iter().enumerate() {
            let rrf = HYBRID_VECTOR_WEIGHT / (rank as f64 + 1.0);
            merged
                .entry(hit.entry.id.clone())
                .and_modify(|(_, s)| *s += rrf)
                .or_insert((hit.entry, rrf));
        }
        for (rank, hit) in fulltext_ranked.into_iter().enumerate() {
            let rrf = HYBRID_FULLTEXT_WEIGHT / (rank as f64 + 1.0);
            merged
                .entry(hit.entry.id.clone())
                .and_modify(|(_, s)| *s += rrf)
                .or_insert((hit.entry, rrf));
        }

        let mut scored: Vec<ScoredEntry> = merged
            .into_values()
            .map(|(entry, score)| ScoredEntry { entry, score })
            .collect();
        sort_scored(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Keyword-score candidates; zero scores are dropped, recency breaks ties.
fn fulltext_rank(query: &str, candidates: Vec<MemoryEntry>, limit: usize) -> Vec<ScoredEntry> {
    let keywords = fulltext::extract_keywords(query);
    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .map(|entry| {
            let score = fulltext::score_content(&entry.content, &keywords) as f64;
            ScoredEntry { entry, score }
        })
        .filter(|s| s.score > 0.0)
        .collect();
    sort_scored(&mut scored);
    scored.truncate(limit);
    scored
}

/// Score descending, then most recently updated first.
fn sort_scored(scored: &mut [ScoredEntry]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.updated_at.cmp(&a.entry.updated_at))
    });
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let kind_str: String = row.get(2)?;
    let vector_blob: Option<Vec<u8>> = row.get(4)?;
    let metadata_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(MemoryEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: kind_str.parse().unwrap_or(MemoryKind::Conversation),
        content: row.get(3)?,
        vector: vector_blob.map(|b| db::blob_to_vector(&b)).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        created_at: parse_ts(&created_str),
        updated_at: parse_ts(&updated_str),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
