use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use axon_core::types::{GenerationConfig, LlmMessage, ModelDescriptor, ModelLevel, ToolCall};

/// Tool declaration sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Response from an LLM backend.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub content: String,

    /// Tool calls requested by the LLM. Empty when none were called.
    pub tool_calls: Vec<ToolCall>,

    pub usage: Option<Usage>,

    /// Filled by the gateway with the provider that actually answered.
    pub used_provider: String,

    /// Filled by the gateway with the model that actually answered.
    pub used_model: String,

    /// Tier of the answering model, when a descriptor is registered.
    pub level: Option<ModelLevel>,
}

/// Failure classes a backend can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    BadRequest,
    Server,
    Transport,
    Timeout,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::RateLimit => "rate-limit",
            ProviderErrorKind::BadRequest => "bad-request",
            ProviderErrorKind::Server => "server",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Typed provider failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether retrying elsewhere can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit
                | ProviderErrorKind::Server
                | ProviderErrorKind::Transport
                | ProviderErrorKind::Timeout
        )
    }

    /// Map an HTTP status and response body to a typed error.
    pub fn from_status(status: u16, body: String) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::RateLimit,
            400 | 404 | 422 => ProviderErrorKind::BadRequest,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Transport,
        };
        Self::new(kind, format!("HTTP {status}: {body}"))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::new(ProviderErrorKind::Timeout, e.to_string())
        } else {
            ProviderError::new(ProviderErrorKind::Transport, e.to_string())
        }
    }
}

/// Common interface for all LLM backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    ///
    /// Implementations forward `tools` only when the selected model's
    /// capabilities include tool use.
    async fn chat(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        model: &str,
        config: &GenerationConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// Model used when a request does not pin one.
    fn default_model(&self) -> String;

    /// Whether the backend is currently usable.
    async fn is_available(&self) -> bool {
        true
    }

    /// Capabilities and tier of a model, falling back to a conservative
    /// descriptor for unknown ids.
    fn model_capabilities(&self, model: &str) -> ModelDescriptor {
        ModelDescriptor::unknown(self.name(), model)
    }

    /// Model ids the backend reports, or `None` when listing is
    /// unsupported or fails.
    async fn list_models(&self) -> Option<Vec<String>> {
        None
    }
}
