use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel chat id meaning "the most recent chat observed on that channel".
///
/// Channels receiving an outbound message with this chat id must substitute
/// the last inbound chat id they have seen, or drop the message.
pub const DEFAULT_CHAT_ID: &str = "default";

/// Upper bound on media attachments carried by a single message.
pub const MAX_MEDIA_COUNT: usize = 10;

/// A reference to an attached media object (image, file, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Location of the media (URL, data URI, or platform handle).
    pub url: String,

    /// MIME type when known (e.g. "image/png").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime: None,
        }
    }

    /// True when the MIME type (or URL extension) indicates an image.
    pub fn is_image(&self) -> bool {
        match &self.mime {
            Some(m) => m.starts_with("image/"),
            None => {
                let lower = self.url.to_ascii_lowercase();
                [".png", ".jpg", ".jpeg", ".gif", ".webp"]
                    .iter()
                    .any(|ext| lower.ends_with(ext))
            }
        }
    }
}

/// A message received from an external channel.
///
/// Immutable once published to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Logical channel name (e.g. "telegram", "terminal").
    pub channel: String,

    /// Platform-native chat identifier.
    pub chat_id: String,

    /// Platform-native identifier for the sender.
    pub sender_id: String,

    /// Plain text content of the message.
    pub content: String,

    /// Ordered media references attached to the message.
    #[serde(default)]
    pub media: Vec<MediaRef>,

    /// Opaque platform metadata passed through untouched.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// When the message was received.
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Convenience constructor for a plain text message received now.
    pub fn text(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Session key for this message: `channel:chat_id`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A message to be delivered to external channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel that originated the conversation.
    pub channel: String,

    /// Target chat id, or [`DEFAULT_CHAT_ID`].
    pub chat_id: String,

    /// Content to deliver.
    pub content: String,

    /// Ordered media references attached to the message.
    #[serde(default)]
    pub media: Vec<MediaRef>,

    /// Opaque metadata for downstream consumers.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl OutboundMessage {
    pub fn text(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// One part of a multipart message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
}

/// Message content: either plain text or an ordered sequence of parts.
///
/// Untagged so that session files store plain strings for the common case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Flatten to plain text; image parts contribute nothing.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(t) => t.is_empty(),
            Content::Parts(p) => p.is_empty(),
        }
    }

    /// True when any part is an image.
    pub fn has_image(&self) -> bool {
        match self {
            Content::Text(_) => false,
            Content::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::Image { .. })),
        }
    }

    /// Character count of the textual portion.
    pub fn char_len(&self) -> usize {
        match self {
            Content::Text(t) => t.chars().count(),
            Content::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.chars().count(),
                    ContentPart::Image { .. } => 0,
                })
                .sum(),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

/// A structured tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments; validated against the tool schema at dispatch.
    pub arguments: serde_json::Value,
}

/// A single message in an LLM conversation.
///
/// An assistant message may carry tool calls; a tool message must carry the
/// id of the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: Content,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: Content::Parts(parts),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// A tool observation answering the call with the given id.
    pub fn tool(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Capability flags advertised by a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub tools: bool,
}

/// Coarse capability/cost tier a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelLevel {
    Fast,
    Low,
    Medium,
    High,
    Ultra,
}

impl ModelLevel {
    /// Numeric rank used for distance comparisons during routing.
    pub fn rank(&self) -> u8 {
        match self {
            ModelLevel::Fast => 0,
            ModelLevel::Low => 1,
            ModelLevel::Medium => 2,
            ModelLevel::High => 3,
            ModelLevel::Ultra => 4,
        }
    }
}

impl Default for ModelLevel {
    fn default() -> Self {
        ModelLevel::Medium
    }
}

impl std::fmt::Display for ModelLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelLevel::Fast => "fast",
            ModelLevel::Low => "low",
            ModelLevel::Medium => "medium",
            ModelLevel::High => "high",
            ModelLevel::Ultra => "ultra",
        };
        f.write_str(s)
    }
}

/// Generation parameters. Unset fields fall through to the next layer
/// (model descriptor, then provider defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

impl GenerationConfig {
    /// Field-wise merge: `over`'s set fields win, `self` fills the gaps.
    pub fn merged(&self, over: &GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            max_tokens: over.max_tokens.or(self.max_tokens),
            temperature: over.temperature.or(self.temperature),
            top_p: over.top_p.or(self.top_p),
            top_k: over.top_k.or(self.top_k),
            frequency_penalty: over.frequency_penalty.or(self.frequency_penalty),
        }
    }
}

/// Everything the runtime knows about one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model id as accepted by the provider API.
    pub id: String,

    /// Name of the provider that owns this descriptor.
    pub provider: String,

    #[serde(default)]
    pub capabilities: ModelCapabilities,

    #[serde(default)]
    pub level: ModelLevel,

    /// Generation defaults for this model; override agent-level defaults.
    #[serde(default)]
    pub defaults: GenerationConfig,
}

impl ModelDescriptor {
    /// Conservative descriptor for a model nothing is known about:
    /// tool-capable, no vision, medium tier.
    pub fn unknown(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            capabilities: ModelCapabilities {
                vision: false,
                reasoning: false,
                tools: true,
            },
            level: ModelLevel::Medium,
            defaults: GenerationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_untagged_roundtrip() {
        let plain = Content::Text("hello".into());
        let json = serde_json::to_string(&plain).unwrap();
        assert_eq!(json, "\"hello\"");
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plain);

        let parts = Content::Parts(vec![
            ContentPart::Text {
                text: "look".into(),
            },
            ContentPart::Image {
                url: "https://x/img.png".into(),
                mime: Some("image/png".into()),
            },
        ]);
        let json = serde_json::to_string(&parts).unwrap();
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parts);
        assert!(back.has_image());
    }

    #[test]
    fn message_tool_linkage_roundtrip() {
        let assistant = LlmMessage::assistant_with_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "echo".into(),
                arguments: serde_json::json!({"text": "ok"}),
            }],
        );
        let json = serde_json::to_string(&assistant).unwrap();
        let back: LlmMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_calls[0].id, "call_1");

        let tool = LlmMessage::tool("call_1", "ok");
        let json = serde_json::to_string(&tool).unwrap();
        let back: LlmMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn generation_config_merge_prefers_override() {
        let base = GenerationConfig {
            max_tokens: Some(1024),
            temperature: Some(0.7),
            ..Default::default()
        };
        let over = GenerationConfig {
            max_tokens: Some(4096),
            ..Default::default()
        };
        let merged = base.merged(&over);
        assert_eq!(merged.max_tokens, Some(4096));
        assert_eq!(merged.temperature, Some(0.7));
    }

    #[test]
    fn media_image_detection() {
        assert!(MediaRef {
            url: "x".into(),
            mime: Some("image/png".into())
        }
        .is_image());
        assert!(MediaRef::new("https://a/b.JPG").is_image());
        assert!(!MediaRef::new("https://a/b.pdf").is_image());
    }
}
