use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session key: {0}")]
    InvalidKey(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session metadata exceeds the reserved slot for key {0}")]
    MetadataOverflow(String),

    #[error("Malformed session file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
