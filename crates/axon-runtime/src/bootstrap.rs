//! Construction of the runtime object graph from configuration.
//!
//! Kept separate from `main` so integration tests can assemble the same
//! components around mock providers and channels.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use axon_agent::{
    AgentExecutor, ExecutorConfig, LlmGateway, LoopThresholds, ModelRouter, OpenAiEmbedder,
    OpenAiProvider, Summarizer, SummarizerConfig, ToolRegistry,
};
use axon_channels::MessageProcessor;
use axon_core::config::{AxonConfig, ModelEntry, ProviderConfig};
use axon_core::types::{
    GenerationConfig, InboundMessage, ModelCapabilities, ModelDescriptor, OutboundMessage,
};
use axon_memory::{MemoryStore, MemoryStoreConfig};
use axon_sessions::SessionStore;

/// Adapts the executor to the channel gateway's processor seam.
pub struct ExecutorBridge(pub Arc<AgentExecutor>);

#[async_trait::async_trait]
impl MessageProcessor for ExecutorBridge {
    async fn process_message(&self, msg: InboundMessage) -> Option<OutboundMessage> {
        self.0.process_message(msg).await
    }
}

/// Register every configured provider with the LLM gateway.
pub fn build_gateway(config: &AxonConfig) -> Arc<LlmGateway> {
    let gateway = Arc::new(LlmGateway::new(true));

    for (name, pcfg) in &config.providers {
        let descriptors = descriptors_for(name, pcfg);
        let model_ids: Vec<String> = pcfg.models.iter().map(|m| m.id.clone()).collect();
        let default_model = pcfg
            .default_model
            .clone()
            .or_else(|| {
                pcfg.models
                    .iter()
                    .map(|m| m.id.clone())
                    .find(|id| id != "*")
            })
            .unwrap_or_else(|| "default".to_string());

        let adapter = Arc::new(OpenAiProvider::new(
            name.clone(),
            pcfg.api_key.clone(),
            pcfg.base_url.clone(),
            pcfg.chat_path.clone(),
            default_model,
            descriptors.clone(),
        ));
        gateway.register_provider(name.clone(), adapter, model_ids, pcfg.priority, descriptors);
    }

    if let Some(default) = &config.default_provider {
        gateway.set_default_provider(default.clone());
    }
    gateway
}

pub fn descriptors_for(provider: &str, pcfg: &ProviderConfig) -> Vec<ModelDescriptor> {
    pcfg.models
        .iter()
        .filter(|m| m.id != "*")
        .map(|m: &ModelEntry| ModelDescriptor {
            id: m.id.clone(),
            provider: provider.to_string(),
            capabilities: ModelCapabilities {
                vision: m.vision,
                reasoning: m.reasoning,
                tools: m.tools,
            },
            level: m.level,
            defaults: GenerationConfig {
                max_tokens: m.max_tokens,
                temperature: m.temperature,
                ..Default::default()
            },
        })
        .collect()
}

/// Open the memory store, wiring an embedder when one is configured.
pub fn build_memory(config: &AxonConfig) -> anyhow::Result<Option<Arc<MemoryStore>>> {
    if !config.memory.enabled {
        return Ok(None);
    }

    let embedder = config.memory.embedding_model.as_ref().and_then(|model| {
        // Embeddings ride on the default (or first) configured provider.
        let provider = config
            .default_provider
            .as_ref()
            .and_then(|name| config.providers.get(name))
            .or_else(|| config.providers.values().next())?;
        Some(Arc::new(OpenAiEmbedder::new(
            provider.api_key.clone(),
            provider.base_url.clone(),
            model.clone(),
        )) as Arc<dyn axon_memory::Embedder>)
    });
    if config.memory.embedding_model.is_some() && embedder.is_none() {
        warn!("embedding_model configured but no provider available; vector search disabled");
    }

    let storage = std::path::PathBuf::from(&config.memory.storage_path);
    let markdown_dir = storage.parent().map(|p| p.join("memory-md"));
    let store = MemoryStore::open(
        &storage,
        MemoryStoreConfig {
            search_limit: config.effective_search_limit(),
            retention_days: config.memory.retention_days,
            markdown_dir,
        },
        embedder,
    )?;
    Ok(Some(Arc::new(store)))
}

/// Translate config sections into the executor's own settings.
pub fn executor_config(config: &AxonConfig) -> ExecutorConfig {
    ExecutorConfig {
        max_iterations: config.agent.max_iterations,
        system_prompt: config.agent.system_prompt.clone(),
        generation: GenerationConfig {
            max_tokens: Some(config.agent.max_tokens),
            temperature: config.agent.temperature,
            top_p: config.agent.top_p,
            top_k: config.agent.top_k,
            frequency_penalty: config.agent.frequency_penalty,
        },
        memory_enabled: config.memory.enabled,
        auto_summarize: config.memory.auto_summarize,
        summarize_threshold: config.memory.summarize_threshold,
        history_limit: config.session.max_history,
        loop_thresholds: LoopThresholds {
            warning: config.loop_detection.warning_threshold,
            critical: config.loop_detection.critical_threshold,
            circuit_breaker: config.circuit_breaker(),
        },
        ..Default::default()
    }
}

/// Assemble the executor with its session store, tools and optional
/// memory/summarizer attachments.
#[allow(clippy::too_many_arguments)]
pub fn build_executor(
    config: &AxonConfig,
    gateway: Arc<LlmGateway>,
    sessions: Arc<SessionStore>,
    tools: Arc<ToolRegistry>,
    memory: Option<Arc<MemoryStore>>,
    summarizer: Option<Arc<Summarizer>>,
    outbound: Option<tokio::sync::mpsc::Sender<OutboundMessage>>,
) -> Arc<AgentExecutor> {
    let mut executor = AgentExecutor::new(
        gateway,
        ModelRouter::new(config.routing.clone()),
        sessions,
        tools,
        executor_config(config),
    );
    if let Some(store) = memory {
        executor = executor.with_memory(store);
    }
    if let Some(s) = summarizer {
        executor = executor.with_summarizer(s);
    }
    if let Some(tx) = outbound {
        executor = executor.with_outbound(tx);
    }
    Arc::new(executor)
}

/// Build the summarizer when memory is enabled.
pub fn build_summarizer(
    config: &AxonConfig,
    gateway: &Arc<LlmGateway>,
    memory: &Option<Arc<MemoryStore>>,
) -> Option<Arc<Summarizer>> {
    memory.as_ref().map(|store| {
        Arc::new(Summarizer::new(
            Arc::clone(gateway),
            Arc::clone(store),
            SummarizerConfig {
                min_messages: config.memory.summarize_threshold,
                idle_timeout: Duration::from_secs(config.memory.idle_timeout_secs),
                model: None,
                ..Default::default()
            },
        ))
    })
}
