//! Shared foundation for the Axon runtime: message and model types, the
//! in-process bus, configuration loading, error kinds, call tracing and
//! user-facing redaction.

pub mod bus;
pub mod config;
pub mod error;
pub mod redact;
pub mod trace;
pub mod types;

pub use bus::{BusClosed, MessageBus};
pub use config::AxonConfig;
pub use error::{AxonError, Result};
pub use types::{
    Content, ContentPart, GenerationConfig, InboundMessage, LlmMessage, MediaRef,
    ModelCapabilities, ModelDescriptor, ModelLevel, OutboundMessage, Role, ToolCall,
    DEFAULT_CHAT_ID,
};
