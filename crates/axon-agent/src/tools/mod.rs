//! Tool system: the `Tool` trait, execution context, and the registry that
//! validates and dispatches tool calls.
//!
//! Tool failures never propagate: every error becomes a JSON observation
//! (`{"error":true,...}`) fed back to the LLM.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use axon_core::types::OutboundMessage;

use crate::provider::ToolDefinition;

/// Default per-tool execution deadline.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text observation returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }

    /// Flatten rich content parts into the text observation; image parts
    /// contribute a placeholder line.
    pub fn from_parts(parts: &[axon_core::types::ContentPart], is_error: bool) -> Self {
        use axon_core::types::ContentPart;
        let content = parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.clone(),
                ContentPart::Image { url, .. } => format!("[image: {url}]"),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self { content, is_error }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("duplicate tool name: {0}")]
    Duplicate(String),

    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("invalid input for tool '{tool}': {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

/// Everything a tool may need about the turn it runs in.
#[derive(Clone)]
pub struct ToolContext {
    pub channel: String,
    pub chat_id: String,
    pub workspace: PathBuf,
    pub current_dir: PathBuf,
    outbound: Option<mpsc::Sender<OutboundMessage>>,
}

impl ToolContext {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        let workspace = workspace.into();
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            current_dir: workspace.clone(),
            workspace,
            outbound: None,
        }
    }

    /// Attach the bus sender so tools can inject outbound messages.
    pub fn with_outbound(mut self, sender: mpsc::Sender<OutboundMessage>) -> Self {
        self.outbound = Some(sender);
        self
    }

    /// Publish a message onto the outbound queue (e.g. a notification).
    /// Returns `false` when no bus is attached or the bus is closed.
    pub async fn send_to_bus(&self, msg: OutboundMessage) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(msg).await.is_ok(),
            None => false,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool. Errors are captured by the registry and turned
    /// into error observations.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;
}

/// Lookup and invocation wrapper around the registered tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so LLM declarations are stable.
    order: Vec<String>,
    tool_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Register a tool; fails when the name is taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        debug!(tool = %name, "registering tool");
        self.tools.insert(name.clone(), tool);
        self.order.push(name);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Declarations for the LLM, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool call.
    ///
    /// Input is validated against the tool's schema first; non-conforming
    /// arguments are rejected rather than coerced. Any failure — unknown
    /// tool, bad input, tool error, timeout — comes back as an error
    /// observation, never as an Err.
    pub async fn execute(&self, name: &str, args: &Value, ctx: &ToolContext) -> ToolResult {
        let tool = match self.tools.get(name) {
            Some(t) => Arc::clone(t),
            None => return error_observation(name, "unknown tool"),
        };

        if let Err(reason) = validate_input(&tool.input_schema(), args) {
            warn!(tool = %name, %reason, "rejecting non-conforming tool input");
            return error_observation(name, &reason);
        }

        debug!(tool = %name, "executing tool");
        match tokio::time::timeout(self.tool_timeout, tool.execute(args.clone(), ctx)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => error_observation(name, &e.to_string()),
            Err(_) => error_observation(
                name,
                &format!("timed out after {}ms", self.tool_timeout.as_millis()),
            ),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Structured error observation for the LLM.
fn error_observation(tool: &str, message: &str) -> ToolResult {
    let body = serde_json::json!({
        "error": true,
        "message": message,
        "tool": tool,
    });
    ToolResult::error(body.to_string())
}

/// Structural validation of tool arguments against a JSON schema: top-level
/// type, required properties, and declared property types.
fn validate_input(schema: &Value, args: &Value) -> Result<(), String> {
    let declared_type = schema.get("type").and_then(Value::as_str);
    if declared_type == Some("object") && !args.is_object() {
        return Err(format!(
            "expected an object, got {}",
            json_type_name(args)
        ));
    }

    let obj = match args.as_object() {
        Some(o) => o,
        None => return Ok(()),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, spec) in properties {
            let value = match obj.get(field) {
                Some(v) => v,
                None => continue,
            };
            let expected = match spec.get("type").and_then(Value::as_str) {
                Some(t) => t,
                None => continue,
            };
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "field '{field}' should be {expected}, got {}",
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
