use thiserror::Error;

#[derive(Debug, Error)]
pub enum AxonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message bus closed")]
    BusClosed,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AxonError {
    /// Short stable code for logs and operator tooling.
    pub fn code(&self) -> &'static str {
        match self {
            AxonError::Config(_) => "CONFIG_ERROR",
            AxonError::BusClosed => "BUS_CLOSED",
            AxonError::Session(_) => "SESSION_ERROR",
            AxonError::Memory(_) => "MEMORY_ERROR",
            AxonError::Provider(_) => "PROVIDER_ERROR",
            AxonError::Channel { .. } => "CHANNEL_ERROR",
            AxonError::Serialization(_) => "SERIALIZATION_ERROR",
            AxonError::Io(_) => "IO_ERROR",
            AxonError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<crate::bus::BusClosed> for AxonError {
    fn from(_: crate::bus::BusClosed) -> Self {
        AxonError::BusClosed
    }
}

pub type Result<T> = std::result::Result<T, AxonError>;
