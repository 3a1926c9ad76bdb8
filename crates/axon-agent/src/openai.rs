//! OpenAI-compatible chat-completions adapter.
//!
//! Covers OpenAI itself and the long tail of compatible endpoints (local
//! llama.cpp/LM Studio servers included). An empty API key is allowed for
//! local backends; no Authorization header is sent in that case.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use axon_core::config::MAX_RESPONSE_LENGTH;
use axon_core::types::{
    Content, ContentPart, GenerationConfig, LlmMessage, ModelDescriptor, Role, ToolCall,
};

use crate::provider::{
    LlmResponse, Provider, ProviderError, ProviderErrorKind, ToolDefinition, Usage,
};

/// Wall-clock deadline for one chat request.
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiProvider {
    client: reqwest::Client,
    provider_name: String,
    api_key: String,
    base_url: String,
    /// Path appended to base_url for chat completions.
    chat_path: String,
    default_model: String,
    descriptors: HashMap<String, ModelDescriptor>,
}

impl OpenAiProvider {
    /// Create a named OpenAI-compatible provider.
    ///
    /// `base_url` must not include a trailing slash; `chat_path` starts with
    /// `/` (e.g. "/v1/chat/completions").
    pub fn new(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: String,
        default_model: String,
        descriptors: Vec<ModelDescriptor>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            provider_name: name.into(),
            api_key,
            base_url,
            chat_path,
            default_model,
            descriptors: descriptors
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn chat(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        model: &str,
        config: &GenerationConfig,
    ) -> Result<LlmResponse, ProviderError> {
        // Tools are forwarded only when the model is known to support them.
        let caps = self.model_capabilities(model).capabilities;
        let tools = if caps.tools { tools } else { &[] };

        let body = build_request_body(messages, tools, model, config);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(provider = %self.provider_name, model, "sending chat request");

        let resp = self
            .authed(self.client.post(&url))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::new(
                ProviderErrorKind::RateLimit,
                format!("rate limited, retry after {retry_ms}ms"),
            ));
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = %self.provider_name, status, body = %text, "chat API error");
            return Err(ProviderError::from_status(status, text));
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::Transport, format!("bad response: {e}"))
        })?;

        Ok(parse_response(api_resp, &self.provider_name))
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    /// Probe the models endpoint; a listing means the backend is up.
    async fn is_available(&self) -> bool {
        self.list_models().await.is_some()
    }

    fn model_capabilities(&self, model: &str) -> ModelDescriptor {
        self.descriptors
            .get(model)
            .cloned()
            .unwrap_or_else(|| ModelDescriptor::unknown(&self.provider_name, model))
    }

    async fn list_models(&self) -> Option<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);
        let resp = self.authed(self.client.get(&url)).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let listing: ModelListing = resp.json().await.ok()?;
        Some(listing.data.into_iter().map(|m| m.id).collect())
    }
}

/// Build the OpenAI chat-completions request body.
pub(crate) fn build_request_body(
    messages: &[LlmMessage],
    tools: &[ToolDefinition],
    model: &str,
    config: &GenerationConfig,
) -> serde_json::Value {
    let wire_messages: Vec<serde_json::Value> = messages.iter().map(message_to_wire).collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages,
    });

    if let Some(v) = config.max_tokens {
        body["max_tokens"] = serde_json::json!(v);
    }
    if let Some(v) = config.temperature {
        body["temperature"] = serde_json::json!(v);
    }
    if let Some(v) = config.top_p {
        body["top_p"] = serde_json::json!(v);
    }
    if let Some(v) = config.top_k {
        body["top_k"] = serde_json::json!(v);
    }
    if let Some(v) = config.frequency_penalty {
        body["frequency_penalty"] = serde_json::json!(v);
    }

    if !tools.is_empty() {
        let tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

/// Convert one message to the OpenAI wire shape. Assistant messages with
/// tool calls get a `tool_calls` array; tool messages become `tool` role
/// records answering by `tool_call_id`.
fn message_to_wire(msg: &LlmMessage) -> serde_json::Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content.as_text(),
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!(msg.content.as_text())
            };
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": calls,
            })
        }
        role => match &msg.content {
            Content::Text(t) => serde_json::json!({ "role": role.to_string(), "content": t }),
            Content::Parts(parts) => {
                let wire_parts: Vec<serde_json::Value> = parts.iter().map(part_to_wire).collect();
                serde_json::json!({ "role": role.to_string(), "content": wire_parts })
            }
        },
    }
}

fn part_to_wire(part: &ContentPart) -> serde_json::Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentPart::Image { url, .. } => serde_json::json!({
            "type": "image_url",
            "image_url": { "url": url }
        }),
    }
}

pub(crate) fn parse_response(resp: ApiResponse, provider: &str) -> LlmResponse {
    let choice = resp.choices.into_iter().next();
    let mut content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();

    if content.chars().count() > MAX_RESPONSE_LENGTH {
        content = content.chars().take(MAX_RESPONSE_LENGTH).collect();
        content.push('…');
    }

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let arguments: serde_json::Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    LlmResponse {
        content,
        tool_calls,
        usage: resp.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
        used_provider: provider.to_string(),
        used_model: resp.model,
        level: None,
    }
}

/// Embedder backed by the `/v1/embeddings` endpoint of the same API family.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }

    async fn request(&self, inputs: &[&str]) -> axon_memory::Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": inputs });

        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| axon_memory::MemoryError::Embedding(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(axon_memory::MemoryError::Embedding(format!(
                "HTTP {status}: {text}"
            )));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| axon_memory::MemoryError::Embedding(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl axon_memory::Embedder for OpenAiEmbedder {
    fn is_available(&self) -> bool {
        !self.model.is_empty()
    }

    async fn embed(&self, text: &str) -> axon_memory::Result<Vec<f32>> {
        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| axon_memory::MemoryError::Embedding("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> axon_memory::Result<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.request(&refs).await
    }
}

// OpenAI API response types.

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub(crate) model: String,
    pub(crate) choices: Vec<Choice>,
    pub(crate) usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub(crate) message: ChatMessage,
}

#[derive(Deserialize)]
pub(crate) struct ChatMessage {
    pub(crate) content: Option<String>,
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ApiToolCall {
    pub(crate) id: String,
    pub(crate) function: ApiFunction,
}

#[derive(Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    pub(crate) arguments: String,
}

#[derive(Deserialize)]
pub(crate) struct ApiUsage {
    pub(crate) prompt_tokens: u32,
    pub(crate) completion_tokens: u32,
}

#[derive(Deserialize)]
struct ModelListing {
    data: Vec<ModelListingEntry>,
}

#[derive(Deserialize)]
struct ModelListingEntry {
    id: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::types::LlmMessage;

    #[test]
    fn body_includes_set_generation_fields_only() {
        let messages = vec![LlmMessage::user("hi")];
        let config = GenerationConfig {
            max_tokens: Some(256),
            temperature: Some(0.5),
            ..Default::default()
        };
        let body = build_request_body(&messages, &[], "gpt-4o", &config);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("top_p").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn assistant_tool_calls_serialize_with_string_arguments() {
        let messages = vec![LlmMessage::assistant_with_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "echo".into(),
                arguments: serde_json::json!({"text": "ok"}),
            }],
        )];
        let body = build_request_body(&messages, &[], "m", &GenerationConfig::default());
        let wire = &body["messages"][0];
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "echo");
        // Arguments travel as a JSON-encoded string, OpenAI style.
        let args = wire["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(args).unwrap(),
            serde_json::json!({"text": "ok"})
        );
    }

    #[test]
    fn tool_message_carries_call_id() {
        let messages = vec![LlmMessage::tool("call_9", "observation")];
        let body = build_request_body(&messages, &[], "m", &GenerationConfig::default());
        let wire = &body["messages"][0];
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_9");
        assert_eq!(wire["content"], "observation");
    }

    #[test]
    fn multipart_content_becomes_image_url_parts() {
        let messages = vec![LlmMessage::user_parts(vec![
            ContentPart::Text {
                text: "what is this?".into(),
            },
            ContentPart::Image {
                url: "https://x/cat.png".into(),
                mime: None,
            },
        ])];
        let body = build_request_body(&messages, &[], "m", &GenerationConfig::default());
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://x/cat.png");
    }

    #[test]
    fn tool_definitions_are_declared_as_functions() {
        let tools = vec![ToolDefinition {
            name: "echo".into(),
            description: "repeat text".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body =
            build_request_body(&[LlmMessage::user("x")], &tools, "m", &GenerationConfig::default());
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "echo");
    }

    #[test]
    fn parse_response_extracts_tool_calls() {
        let api = ApiResponse {
            model: "m1".into(),
            choices: vec![Choice {
                message: ChatMessage {
                    content: Some("".into()),
                    tool_calls: Some(vec![ApiToolCall {
                        id: "1".into(),
                        function: ApiFunction {
                            name: "echo".into(),
                            arguments: r#"{"text":"ok"}"#.into(),
                        },
                    }]),
                },
            }],
            usage: Some(ApiUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
            }),
        };
        let parsed = parse_response(api, "test");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].arguments["text"], "ok");
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 10);
        assert_eq!(parsed.used_model, "m1");
    }

    #[test]
    fn overlong_content_is_clipped() {
        let api = ApiResponse {
            model: "m".into(),
            choices: vec![Choice {
                message: ChatMessage {
                    content: Some("x".repeat(MAX_RESPONSE_LENGTH + 100)),
                    tool_calls: None,
                },
            }],
            usage: None,
        };
        let parsed = parse_response(api, "test");
        assert_eq!(parsed.content.chars().count(), MAX_RESPONSE_LENGTH + 1);
        assert!(parsed.content.ends_with('…'));
    }

    #[test]
    fn malformed_arguments_default_to_null() {
        let api = ApiResponse {
            model: "m".into(),
            choices: vec![Choice {
                message: ChatMessage {
                    content: None,
                    tool_calls: Some(vec![ApiToolCall {
                        id: "1".into(),
                        function: ApiFunction {
                            name: "echo".into(),
                            arguments: "not json".into(),
                        },
                    }]),
                },
            }],
            usage: None,
        };
        let parsed = parse_response(api, "test");
        assert!(parsed.tool_calls[0].arguments.is_null());
    }
}
