use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Longest accepted session key. Keys land in file names and in the
/// fixed-width metadata slot, so they are bounded.
pub const MAX_KEY_LEN: usize = 200;

/// Conversation-scoped session key: `channel:chat_id`.
///
/// The channel name must not contain `:`; the chat id may.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel: String,
    pub chat_id: String,
}

impl SessionKey {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Canonical wire-format string: `channel:chat_id`.
    pub fn format(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// Parse a wire-format key. The chat id may contain colons.
    pub fn parse(s: &str) -> Result<Self> {
        let (channel, chat_id) = s
            .split_once(':')
            .ok_or_else(|| SessionError::InvalidKey(format!("missing ':' separator: {s}")))?;
        if channel.is_empty() || chat_id.is_empty() {
            return Err(SessionError::InvalidKey(format!(
                "key components must not be empty: {s}"
            )));
        }
        if s.len() > MAX_KEY_LEN {
            return Err(SessionError::InvalidKey(format!(
                "key exceeds {MAX_KEY_LEN} characters"
            )));
        }
        Ok(Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// File name for this session: path-unsafe characters replaced by `_`.
    pub fn file_name(&self) -> String {
        let sanitized: String = self
            .format()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                other => other,
            })
            .collect();
        format!("{sanitized}.jsonl")
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Per-session metadata, stored as the first record of the session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub channel: String,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Index into the message record sequence; records before it have been
    /// folded into a summary or aged out of the live window.
    pub last_consolidated: usize,
}

/// Snapshot of a live session returned by the store.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    pub meta: SessionMeta,
    /// Number of messages in the live window.
    pub message_count: usize,
}
