use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::ModelLevel;

/// Hard cap on live sessions held by the executor.
pub const MAX_SESSIONS: usize = 1000;
/// Hard cap applied to any configured memory search limit.
pub const MAX_SEARCH_LIMIT: usize = 50;
/// Parsed assistant responses are clipped at this many characters.
pub const MAX_RESPONSE_LENGTH: usize = 10_000;

/// Top-level config (axon.toml + AXON_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AxonConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Provider name → connection settings. Tried by ascending `priority`.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Provider used when a model id does not resolve to a registered one.
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(rename = "loop", default)]
    pub loop_detection: LoopConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum agent loop iterations per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub frequency_penalty: Option<f32>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Per-tool execution deadline, seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            system_prompt: default_system_prompt(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// A single keyword routing rule. Highest `priority` match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    /// Rule only fires when the message is at least this long.
    pub min_length: Option<usize>,
    /// Rule only fires when the message is at most this long.
    pub max_length: Option<usize>,
    pub level: ModelLevel,
    #[serde(default)]
    pub priority: i32,
}

/// Monotonic score thresholds mapping a complexity score to a level.
///
/// score < low → fast; < medium → low; < high → medium; < ultra → high;
/// otherwise ultra.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelThresholds {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub ultra: u32,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            low: 20,
            medium: 50,
            high: 120,
            ultra: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
    #[serde(default = "default_base_score")]
    pub base_score: u32,
    #[serde(default = "default_length_weight")]
    pub length_weight: u32,
    #[serde(default = "default_code_block_score")]
    pub code_block_score: u32,
    #[serde(default = "default_tool_call_score")]
    pub tool_call_score: u32,
    #[serde(default = "default_multi_turn_score")]
    pub multi_turn_score: u32,
    /// Force every turn onto the highest tier.
    #[serde(default)]
    pub max: bool,
    #[serde(default)]
    pub thresholds: LevelThresholds,
    /// Case-insensitive keywords that mark a turn as tool-requiring.
    #[serde(default)]
    pub tool_keywords: Vec<String>,
    /// Model asked to classify the task type; unset disables intent routing.
    pub intent_model: Option<String>,
    /// Task tag → model id used when intent routing is active.
    #[serde(default)]
    pub task_models: BTreeMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
            base_score: default_base_score(),
            length_weight: default_length_weight(),
            code_block_score: default_code_block_score(),
            tool_call_score: default_tool_call_score(),
            multi_turn_score: default_multi_turn_score(),
            max: false,
            thresholds: LevelThresholds::default(),
            tool_keywords: Vec::new(),
            intent_model: None,
            task_models: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_memory_path")]
    pub storage_path: String,
    /// Default number of entries returned by a search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Conversation entries older than this are removed by cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "bool_true")]
    pub auto_summarize: bool,
    /// Session message count that triggers summarization.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
    /// Seconds of inactivity before the idle check summarizes a session.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Embedding model id; unset disables vector search.
    pub embedding_model: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: default_memory_path(),
            search_limit: default_search_limit(),
            retention_days: default_retention_days(),
            auto_summarize: true,
            summarize_threshold: default_summarize_threshold(),
            idle_timeout_secs: default_idle_timeout_secs(),
            embedding_model: None,
        }
    }
}

/// Capability and tier hints for one model owned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model id, or "*" to claim every id routed at this provider.
    pub id: String,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default = "bool_true")]
    pub tools: bool,
    #[serde(default)]
    pub level: ModelLevel,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL without trailing slash (e.g. "https://api.openai.com").
    pub base_url: String,
    /// Empty key is allowed for local backends; no auth header is sent.
    #[serde(default)]
    pub api_key: String,
    /// Path appended to base_url for chat completions.
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    /// Models this provider owns.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    /// Lower is more preferred during fallback.
    #[serde(default = "default_provider_priority")]
    pub priority: u32,
    /// Model used when a request does not pin one.
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle seconds after which a session is rotated.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Maximum messages retained in a session's live window.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_session_path")]
    pub storage_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
            max_history: default_max_history(),
            storage_path: default_session_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: u32,
    /// Total recorded calls that trip the breaker.
    /// Defaults to `agent.max_iterations + 10` when unset.
    pub global_circuit_breaker: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            global_circuit_breaker: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

/// Per-channel settings keyed by channel name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Sender allow-lists. A configured list is deny-by-default;
    /// an absent entry disables filtering for that channel.
    #[serde(default)]
    pub allow: BTreeMap<String, Vec<String>>,
    /// Consecutive send failures before a channel is marked unavailable.
    #[serde(default = "default_max_reconnect")]
    pub max_reconnect: u32,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            allow: BTreeMap::new(),
            max_reconnect: default_max_reconnect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds granted to in-flight turns during shutdown.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_max_iterations() -> u32 {
    20
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_base_score() -> u32 {
    10
}
fn default_length_weight() -> u32 {
    2
}
fn default_code_block_score() -> u32 {
    15
}
fn default_tool_call_score() -> u32 {
    20
}
fn default_multi_turn_score() -> u32 {
    1
}
fn default_memory_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.axon/memory.db")
}
fn default_search_limit() -> usize {
    5
}
fn default_retention_days() -> u32 {
    30
}
fn default_summarize_threshold() -> usize {
    10
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}
fn default_provider_priority() -> u32 {
    100
}
fn default_session_timeout_secs() -> u64 {
    3600
}
fn default_max_history() -> usize {
    100
}
fn default_session_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.axon/sessions")
}
fn default_warning_threshold() -> u32 {
    3
}
fn default_critical_threshold() -> u32 {
    5
}
fn default_bus_capacity() -> usize {
    crate::bus::DEFAULT_BUS_CAPACITY
}
fn default_max_reconnect() -> u32 {
    3
}
fn default_grace_secs() -> u64 {
    5
}

impl AxonConfig {
    /// Load config from a TOML file with AXON_* env var overrides.
    ///
    /// A missing file is not an error — defaults apply; an unreadable or
    /// invalid file is fatal.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AxonConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("AXON_").split("_"))
            .extract()
            .map_err(|e| crate::error::AxonError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(crate::error::AxonError::Config(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.loop_detection.warning_threshold > self.loop_detection.critical_threshold {
            return Err(crate::error::AxonError::Config(
                "loop.warning_threshold must not exceed loop.critical_threshold".into(),
            ));
        }
        for (name, p) in &self.providers {
            if p.base_url.is_empty() {
                return Err(crate::error::AxonError::Config(format!(
                    "providers.{name}.base_url must not be empty"
                )));
            }
        }
        if let Some(name) = &self.default_provider {
            if !self.providers.is_empty() && !self.providers.contains_key(name) {
                return Err(crate::error::AxonError::Config(format!(
                    "default_provider '{name}' is not a configured provider"
                )));
            }
        }
        Ok(())
    }

    /// Effective circuit breaker: configured value or `max_iterations + 10`.
    pub fn circuit_breaker(&self) -> u32 {
        self.loop_detection
            .global_circuit_breaker
            .unwrap_or(self.agent.max_iterations + 10)
    }

    /// Effective search limit, clamped to [`MAX_SEARCH_LIMIT`].
    pub fn effective_search_limit(&self) -> usize {
        self.memory.search_limit.min(MAX_SEARCH_LIMIT)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.axon/axon.toml")
}
