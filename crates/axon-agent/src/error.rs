use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Session error: {0}")]
    Session(#[from] axon_sessions::SessionError),

    #[error("Memory error: {0}")]
    Memory(#[from] axon_memory::MemoryError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
