//! File-backed session history.
//!
//! One line-delimited JSON file per session: the first record is a
//! fixed-width metadata line, every following line is one message. Appending
//! a message writes the new line and rewrites only the metadata slot in
//! place — the body is never rewritten. Idle sessions are rotated: the old
//! file is archived and a fresh one takes its place.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use axon_core::types::LlmMessage;

use crate::error::{Result, SessionError};
use crate::types::{Session, SessionKey, SessionMeta};

/// Reserved byte width of the metadata line, newline included. The slot is
/// space-padded so it can be rewritten in place without touching the body.
const META_LINE_WIDTH: usize = 512;

/// On-disk form of the metadata record.
#[derive(Debug, Serialize, Deserialize)]
struct MetaRecord {
    #[serde(rename = "_type")]
    record_type: String,
    channel: String,
    chat_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_consolidated: usize,
}

impl MetaRecord {
    fn from_meta(meta: &SessionMeta) -> Self {
        Self {
            record_type: "metadata".to_string(),
            channel: meta.channel.clone(),
            chat_id: meta.chat_id.clone(),
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            last_consolidated: meta.last_consolidated,
        }
    }

    fn into_meta(self) -> SessionMeta {
        SessionMeta {
            channel: self.channel,
            chat_id: self.chat_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_consolidated: self.last_consolidated,
        }
    }
}

struct SessionState {
    meta: SessionMeta,
    /// Most recent messages, capped at `max_history`.
    window: Vec<LlmMessage>,
    /// Total message records written to the file.
    total_records: usize,
}

/// Thread-safe store for persisted sessions.
///
/// Live sessions are cached in memory; the file on disk is the source of
/// truth across restarts.
pub struct SessionStore {
    dir: PathBuf,
    session_timeout: Duration,
    max_history: usize,
    live: Mutex<HashMap<String, SessionState>>,
}

impl SessionStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, session_timeout_secs: u64, max_history: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            session_timeout: Duration::seconds(session_timeout_secs as i64),
            max_history: max_history.max(1),
            live: Mutex::new(HashMap::new()),
        })
    }

    /// Return an existing session or create a new one.
    ///
    /// A session idle for longer than the configured timeout is rotated: the
    /// old file is archived and a fresh session replaces it. `force_new`
    /// rotates unconditionally.
    pub fn get_or_create(&self, key: &SessionKey, force_new: bool) -> Result<Session> {
        let key_str = key.format();
        let mut live = self.live.lock().unwrap();

        if !live.contains_key(&key_str) {
            if let Some(state) = self.load_from_disk(key)? {
                live.insert(key_str.clone(), state);
            }
        }

        let expired = live
            .get(&key_str)
            .map(|s| Utc::now() - s.meta.updated_at > self.session_timeout)
            .unwrap_or(false);

        if force_new || expired {
            if live.remove(&key_str).is_some() {
                self.archive_file(key)?;
                info!(session = %key_str, forced = force_new, "session rotated");
            }
        }

        if !live.contains_key(&key_str) {
            let state = self.create_session(key)?;
            debug!(session = %key_str, "session created");
            live.insert(key_str.clone(), state);
        }

        let state = live.get(&key_str).expect("session just inserted");
        Ok(Session {
            key: key.clone(),
            meta: state.meta.clone(),
            message_count: state.window.len(),
        })
    }

    /// Append one message and bump `updated_at`.
    ///
    /// Writes the message line and rewrites the metadata slot; the session
    /// must already exist (created by [`get_or_create`](Self::get_or_create)).
    pub fn append_message(&self, key: &SessionKey, msg: &LlmMessage) -> Result<()> {
        let key_str = key.format();
        let mut live = self.live.lock().unwrap();

        if !live.contains_key(&key_str) {
            match self.load_from_disk(key)? {
                Some(state) => {
                    live.insert(key_str.clone(), state);
                }
                None => return Err(SessionError::NotFound(key_str)),
            }
        }
        let state = live.get_mut(&key_str).expect("session present");

        let path = self.file_path(key);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.seek(SeekFrom::End(0))?;
        let line = serde_json::to_string(msg)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        state.meta.updated_at = Utc::now();
        state.total_records += 1;
        state.window.push(msg.clone());
        if state.window.len() > self.max_history {
            let excess = state.window.len() - self.max_history;
            state.window.drain(..excess);
        }

        write_meta_line(&mut file, &MetaRecord::from_meta(&state.meta), &key_str)?;
        Ok(())
    }

    /// Suffix of the session's live window, at most `max` messages.
    ///
    /// Tool-call linkage (`tool_calls`, `tool_call_id`) is preserved.
    pub fn get_history(&self, key: &SessionKey, max: usize) -> Result<Vec<LlmMessage>> {
        let key_str = key.format();
        let mut live = self.live.lock().unwrap();
        if !live.contains_key(&key_str) {
            match self.load_from_disk(key)? {
                Some(state) => {
                    live.insert(key_str.clone(), state);
                }
                None => return Ok(Vec::new()),
            }
        }
        let state = &live[&key_str];
        let skip = state.window.len().saturating_sub(max);
        Ok(state.window[skip..].to_vec())
    }

    /// Messages appended after the last consolidation bookmark.
    pub fn messages_since_consolidation(&self, key: &SessionKey) -> Result<Vec<LlmMessage>> {
        let key_str = key.format();
        let live = self.live.lock().unwrap();
        let state = match live.get(&key_str) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let window_start = state.total_records - state.window.len();
        let skip = state.meta.last_consolidated.saturating_sub(window_start);
        Ok(state.window[skip.min(state.window.len())..].to_vec())
    }

    /// Move the consolidation bookmark to the current end of the session.
    pub fn mark_consolidated(&self, key: &SessionKey) -> Result<()> {
        let key_str = key.format();
        let mut live = self.live.lock().unwrap();
        let state = live
            .get_mut(&key_str)
            .ok_or_else(|| SessionError::NotFound(key_str.clone()))?;
        state.meta.last_consolidated = state.total_records;

        let path = self.file_path(key);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        write_meta_line(&mut file, &MetaRecord::from_meta(&state.meta), &key_str)?;
        Ok(())
    }

    /// Enumerate stored sessions ordered by `updated_at` descending.
    pub fn list(&self) -> Result<Vec<Session>> {
        let live = self.live.lock().unwrap();
        let mut sessions: Vec<Session> = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            match read_session_file(&path) {
                Ok((meta, count)) => {
                    let key = SessionKey::new(meta.channel.clone(), meta.chat_id.clone());
                    // Prefer the live copy when present; it is at least as fresh.
                    if let Some(state) = live.get(&key.format()) {
                        sessions.push(Session {
                            key,
                            meta: state.meta.clone(),
                            message_count: state.window.len(),
                        });
                    } else {
                        sessions.push(Session {
                            key,
                            meta,
                            message_count: count,
                        });
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                }
            }
        }

        sessions.sort_by(|a, b| b.meta.updated_at.cmp(&a.meta.updated_at));
        Ok(sessions)
    }

    /// Number of sessions currently held in memory.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Drop the oldest in-memory sessions until at most `max_live` remain.
    ///
    /// Files stay on disk; a dropped session reloads transparently on the
    /// next access. Returns the number of evicted sessions.
    pub fn evict_to(&self, max_live: usize) -> usize {
        let mut live = self.live.lock().unwrap();
        if live.len() <= max_live {
            return 0;
        }
        let mut by_age: Vec<(String, DateTime<Utc>)> = live
            .iter()
            .map(|(k, s)| (k.clone(), s.meta.updated_at))
            .collect();
        by_age.sort_by_key(|(_, at)| *at);
        let excess = live.len() - max_live;
        let mut evicted = 0;
        for (key, _) in by_age.into_iter().take(excess) {
            live.remove(&key);
            evicted += 1;
        }
        debug!(evicted, "evicted idle sessions from memory");
        evicted
    }

    fn file_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn create_session(&self, key: &SessionKey) -> Result<SessionState> {
        let now = Utc::now();
        let meta = SessionMeta {
            channel: key.channel.clone(),
            chat_id: key.chat_id.clone(),
            created_at: now,
            updated_at: now,
            last_consolidated: 0,
        };
        let mut file = File::create(self.file_path(key))?;
        write_meta_line(&mut file, &MetaRecord::from_meta(&meta), &key.format())?;
        Ok(SessionState {
            meta,
            window: Vec::new(),
            total_records: 0,
        })
    }

    fn load_from_disk(&self, key: &SessionKey) -> Result<Option<SessionState>> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let mut lines = text.lines();
        let meta_line = lines.next().ok_or_else(|| SessionError::Corrupt {
            path: path.display().to_string(),
            reason: "empty file".to_string(),
        })?;
        let record: MetaRecord = serde_json::from_str(meta_line.trim_end())?;
        if record.record_type != "metadata" {
            return Err(SessionError::Corrupt {
                path: path.display().to_string(),
                reason: "first record is not metadata".to_string(),
            });
        }
        let meta = record.into_meta();

        let mut messages: Vec<LlmMessage> = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            messages.push(serde_json::from_str(line)?);
        }

        let total_records = messages.len();
        let skip = messages.len().saturating_sub(self.max_history);
        let window = messages.split_off(skip);
        Ok(Some(SessionState {
            meta,
            window,
            total_records,
        }))
    }

    fn archive_file(&self, key: &SessionKey) -> Result<()> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(());
        }
        let stem = key.file_name();
        let stem = stem.trim_end_matches(".jsonl");
        let archived = self
            .dir
            .join(format!("{stem}.{}.archived", Utc::now().timestamp()));
        fs::rename(&path, &archived)?;
        Ok(())
    }
}

/// Serialize and write the fixed-width metadata line at offset zero.
fn write_meta_line(file: &mut File, record: &MetaRecord, key: &str) -> Result<()> {
    let json = serde_json::to_string(record)?;
    if json.len() >= META_LINE_WIDTH {
        return Err(SessionError::MetadataOverflow(key.to_string()));
    }
    let mut line = json.into_bytes();
    line.resize(META_LINE_WIDTH - 1, b' ');
    line.push(b'\n');
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

/// Read metadata and the message count from a session file.
fn read_session_file(path: &Path) -> Result<(SessionMeta, usize)> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();
    let meta_line = lines.next().ok_or_else(|| SessionError::Corrupt {
        path: path.display().to_string(),
        reason: "empty file".to_string(),
    })?;
    let record: MetaRecord = serde_json::from_str(meta_line.trim_end())?;
    if record.record_type != "metadata" {
        return Err(SessionError::Corrupt {
            path: path.display().to_string(),
            reason: "first record is not metadata".to_string(),
        });
    }
    let count = lines.filter(|l| !l.trim().is_empty()).count();
    Ok((record.into_meta(), count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::types::{LlmMessage, Role, ToolCall};
    use tempfile::tempdir;

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(dir, 3600, 100).unwrap()
    }

    #[test]
    fn create_append_reload_roundtrip() {
        let dir = tempdir().unwrap();
        let key = SessionKey::new("telegram", "42");

        {
            let store = store(dir.path());
            store.get_or_create(&key, false).unwrap();
            store.append_message(&key, &LlmMessage::user("hello")).unwrap();
            store
                .append_message(
                    &key,
                    &LlmMessage::assistant_with_calls(
                        "",
                        vec![ToolCall {
                            id: "1".into(),
                            name: "echo".into(),
                            arguments: serde_json::json!({"text": "ok"}),
                        }],
                    ),
                )
                .unwrap();
            store.append_message(&key, &LlmMessage::tool("1", "ok")).unwrap();
        }

        // Fresh store instance reads the same file.
        let store = store(dir.path());
        let history = store.get_history(&key, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].tool_calls.len(), 1);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("1"));

        let session = store.get_or_create(&key, false).unwrap();
        assert_eq!(session.message_count, 3);
        assert_eq!(session.meta.channel, "telegram");
    }

    #[test]
    fn first_record_is_metadata_and_messages_have_roles() {
        let dir = tempdir().unwrap();
        let key = SessionKey::new("x", "c");
        let store = store(dir.path());
        store.get_or_create(&key, false).unwrap();
        store.append_message(&key, &LlmMessage::user("hi")).unwrap();

        let text = fs::read_to_string(dir.path().join(key.file_name())).unwrap();
        let mut lines = text.lines();
        let meta: serde_json::Value =
            serde_json::from_str(lines.next().unwrap().trim_end()).unwrap();
        assert_eq!(meta["_type"], "metadata");
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            let role = record["role"].as_str().unwrap();
            assert!(["system", "user", "assistant", "tool"].contains(&role));
        }
    }

    #[test]
    fn append_rewrites_only_the_metadata_slot() {
        let dir = tempdir().unwrap();
        let key = SessionKey::new("x", "c");
        let store = store(dir.path());
        store.get_or_create(&key, false).unwrap();
        store.append_message(&key, &LlmMessage::user("one")).unwrap();

        let before = fs::read_to_string(dir.path().join(key.file_name())).unwrap();
        let body_before = &before[META_LINE_WIDTH..];

        store.append_message(&key, &LlmMessage::user("two")).unwrap();
        let after = fs::read_to_string(dir.path().join(key.file_name())).unwrap();

        // Old body bytes are untouched; the new line is appended after them.
        assert!(after[META_LINE_WIDTH..].starts_with(body_before));
    }

    #[test]
    fn idle_session_is_rotated() {
        let dir = tempdir().unwrap();
        let key = SessionKey::new("x", "c");
        let store = SessionStore::new(dir.path(), 0, 100).unwrap();
        store.get_or_create(&key, false).unwrap();
        store.append_message(&key, &LlmMessage::user("old")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let session = store.get_or_create(&key, false).unwrap();
        assert_eq!(session.message_count, 0);

        // The old file was archived alongside the fresh one.
        let archived = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("archived"))
            .count();
        assert_eq!(archived, 1);
    }

    #[test]
    fn force_new_rotates_immediately() {
        let dir = tempdir().unwrap();
        let key = SessionKey::new("x", "c");
        let store = store(dir.path());
        store.get_or_create(&key, false).unwrap();
        store.append_message(&key, &LlmMessage::user("m")).unwrap();

        let session = store.get_or_create(&key, true).unwrap();
        assert_eq!(session.message_count, 0);
    }

    #[test]
    fn window_is_bounded_by_max_history() {
        let dir = tempdir().unwrap();
        let key = SessionKey::new("x", "c");
        let store = SessionStore::new(dir.path(), 3600, 3).unwrap();
        store.get_or_create(&key, false).unwrap();
        for i in 0..6 {
            store
                .append_message(&key, &LlmMessage::user(format!("m{i}")))
                .unwrap();
        }
        let history = store.get_history(&key, 100).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content.as_text(), "m3");
    }

    #[test]
    fn list_orders_by_updated_at_desc() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let a = SessionKey::new("x", "a");
        let b = SessionKey::new("x", "b");
        store.get_or_create(&a, false).unwrap();
        store.append_message(&a, &LlmMessage::user("1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        store.get_or_create(&b, false).unwrap();
        store.append_message(&b, &LlmMessage::user("2")).unwrap();

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].key.chat_id, "b");
        assert_eq!(sessions[1].key.chat_id, "a");
    }

    #[test]
    fn consolidation_bookmark_limits_summarizer_view() {
        let dir = tempdir().unwrap();
        let key = SessionKey::new("x", "c");
        let store = store(dir.path());
        store.get_or_create(&key, false).unwrap();
        store.append_message(&key, &LlmMessage::user("a")).unwrap();
        store.append_message(&key, &LlmMessage::assistant("b")).unwrap();
        store.mark_consolidated(&key).unwrap();
        store.append_message(&key, &LlmMessage::user("c")).unwrap();

        let fresh = store.messages_since_consolidation(&key).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].content.as_text(), "c");
        // Full history is still served for conversation context.
        assert_eq!(store.get_history(&key, 10).unwrap().len(), 3);
    }

    #[test]
    fn eviction_keeps_files_readable() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        for i in 0..5 {
            let key = SessionKey::new("x", format!("c{i}"));
            store.get_or_create(&key, false).unwrap();
            store.append_message(&key, &LlmMessage::user("m")).unwrap();
        }
        assert_eq!(store.live_count(), 5);
        assert_eq!(store.evict_to(2), 3);
        assert_eq!(store.live_count(), 2);

        // An evicted session reloads from disk on demand.
        let key = SessionKey::new("x", "c0");
        let history = store.get_history(&key, 10).unwrap();
        assert_eq!(history.len(), 1);
    }
}
