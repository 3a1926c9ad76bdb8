//! Agent executor — runs one full agentic turn per inbound message.
//!
//! Flow: load session history → retrieve memories → build the prompt →
//! route a model → tool loop (LLM → tool calls → observations → LLM) →
//! persist the turn → fire-and-forget memory write and summarization.
//!
//! The executor is the last line of defense for a turn: any uncaught error
//! becomes a redacted "internal error" reply instead of propagating.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use axon_core::config::MAX_SESSIONS;
use axon_core::redact::redact_user_facing;
use axon_core::trace;
use axon_core::types::{
    Content, ContentPart, GenerationConfig, InboundMessage, LlmMessage, ModelDescriptor,
    OutboundMessage, Role, MAX_MEDIA_COUNT,
};
use axon_memory::{MemoryStore, NewEntry, ScoredEntry, SearchOptions};
use axon_sessions::{SessionKey, SessionStore};

use crate::error::Result;
use crate::gateway::LlmGateway;
use crate::history::HistoryManager;
use crate::loop_detect::{LoopDetector, LoopSeverity, LoopThresholds};
use crate::router::ModelRouter;
use crate::summarize::Summarizer;
use crate::tools::{ToolContext, ToolRegistry};

/// Memory entries injected per turn.
const MEMORY_RETRIEVE_LIMIT: usize = 5;
/// Characters of each memory entry shown in the prompt.
const MEMORY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_iterations: u32,
    pub system_prompt: String,
    /// Agent-level generation defaults; model descriptors override them.
    pub generation: GenerationConfig,
    pub memory_enabled: bool,
    pub auto_summarize: bool,
    /// Session message count that triggers summarization.
    pub summarize_threshold: usize,
    /// Live session cap; oldest sessions are evicted beyond it.
    pub max_sessions: usize,
    /// Messages of history loaded into the prompt.
    pub history_limit: usize,
    pub loop_thresholds: LoopThresholds,
    /// Workspace root handed to tools.
    pub workspace: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            system_prompt: "You are a helpful assistant.".to_string(),
            generation: GenerationConfig::default(),
            memory_enabled: true,
            auto_summarize: true,
            summarize_threshold: 10,
            max_sessions: MAX_SESSIONS,
            history_limit: 40,
            loop_thresholds: LoopThresholds::default(),
            workspace: PathBuf::from("."),
        }
    }
}

/// Drives the tool-calling agent loop for every conversation.
pub struct AgentExecutor {
    gateway: Arc<LlmGateway>,
    router: ModelRouter,
    sessions: Arc<SessionStore>,
    tools: Arc<ToolRegistry>,
    memory: Option<Arc<MemoryStore>>,
    summarizer: Option<Arc<Summarizer>>,
    history: HistoryManager,
    outbound: Option<mpsc::Sender<OutboundMessage>>,
    cfg: ExecutorConfig,
    /// Per-session turn locks: turns on one session are sequential,
    /// distinct sessions run concurrently.
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AgentExecutor {
    pub fn new(
        gateway: Arc<LlmGateway>,
        router: ModelRouter,
        sessions: Arc<SessionStore>,
        tools: Arc<ToolRegistry>,
        cfg: ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            router,
            sessions,
            tools,
            memory: None,
            summarizer: None,
            history: HistoryManager::default(),
            outbound: None,
            cfg,
            turn_locks: DashMap::new(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_history(mut self, history: HistoryManager) -> Self {
        self.history = history;
        self
    }

    /// Attach the bus sender so tools can publish outbound messages.
    pub fn with_outbound(mut self, sender: mpsc::Sender<OutboundMessage>) -> Self {
        self.outbound = Some(sender);
        self
    }

    /// Process one inbound message into at most one reply.
    pub async fn process_message(&self, inbound: InboundMessage) -> Option<OutboundMessage> {
        if inbound.content.trim().is_empty() && inbound.media.is_empty() {
            return None;
        }

        let key = SessionKey::new(inbound.channel.clone(), inbound.chat_id.clone());
        let lock = {
            let entry = self
                .turn_locks
                .entry(key.format())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let _turn = lock.lock().await;

        let outcome = trace::with_trace(self.run_turn(&inbound, &key)).await;
        match outcome {
            Ok(reply) => Some(reply),
            Err(e) => {
                error!(session = %key, error = %e, "turn failed");
                let detail = redact_user_facing(&e.to_string());
                Some(OutboundMessage::text(
                    inbound.channel,
                    inbound.chat_id,
                    format!("Internal error, please retry later. ({detail})"),
                ))
            }
        }
    }

    async fn run_turn(
        &self,
        inbound: &InboundMessage,
        key: &SessionKey,
    ) -> Result<OutboundMessage> {
        self.sessions.get_or_create(key, false)?;
        let history = self.sessions.get_history(key, self.cfg.history_limit)?;

        let memories = self.retrieve_memories(&inbound.content).await;

        // Assemble the prompt: system + optional memory block + history +
        // the new user message.
        let mut convo: Vec<LlmMessage> = vec![LlmMessage::system(self.cfg.system_prompt.clone())];
        if !memories.is_empty() {
            convo.push(LlmMessage::system(format_memories(&memories)));
        }
        convo.extend(history);

        let persist_from = convo.len();
        convo.push(build_user_message(inbound));

        // Pick a model once; the choice holds for the whole turn.
        let media_attached = !inbound.media.is_empty();
        let decision = if self.router.enabled() {
            match self.router.analyze_task_type(&self.gateway, &convo).await {
                Some(d) => Some(d),
                None => self
                    .router
                    .select(&convo, media_attached, &self.gateway.candidates()),
            }
        } else {
            None
        };
        let model_ref = decision.as_ref().map(|d| d.model_ref());
        let (provider, model_id) = self.gateway.resolve(model_ref.as_deref())?;
        let descriptor = self
            .gateway
            .descriptor_for(&provider, &model_id)
            .unwrap_or_else(|| ModelDescriptor::unknown(&provider, &model_id));
        let pinned = format!("{provider}/{model_id}");
        debug!(session = %key, model = %pinned, "model chosen for turn");

        let tool_defs = self.tools.definitions();
        let tool_ctx = {
            let ctx = ToolContext::new(
                inbound.channel.clone(),
                inbound.chat_id.clone(),
                self.cfg.workspace.clone(),
            );
            match &self.outbound {
                Some(tx) => ctx.with_outbound(tx.clone()),
                None => ctx,
            }
        };

        let mut detector = LoopDetector::new(self.cfg.loop_thresholds.clone());
        let mut final_content: Option<String> = None;
        let mut loop_detected = false;
        let mut iterations = 0u32;

        'agent: for iteration in 0..self.cfg.max_iterations {
            iterations = iteration + 1;

            let mut working = self.history.truncate(&convo);
            if !descriptor.capabilities.vision {
                downgrade_images(&mut working);
            }

            let response = trace::trace_async(
                "executor.rs",
                "gateway.chat",
                &json!({ "model": pinned, "iteration": iteration }),
                self.gateway
                    .chat(&working, &tool_defs, Some(&pinned), &self.cfg.generation),
            )
            .await?;

            if response.tool_calls.is_empty() {
                final_content = Some(response.content);
                break;
            }

            convo.push(LlmMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for (idx, call) in response.tool_calls.iter().enumerate() {
                detector.record_call(&call.name, &call.arguments);
                if let Some(signal) = detector.detect() {
                    match signal.severity {
                        LoopSeverity::Critical => {
                            warn!(session = %key, detail = %signal.detail, "loop detected, terminating turn");
                            // Answer this and any remaining calls so the
                            // persisted history keeps its call linkage.
                            for pending in &response.tool_calls[idx..] {
                                convo.push(LlmMessage::tool(
                                    pending.id.clone(),
                                    "loop detected, execution halted",
                                ));
                            }
                            final_content =
                                Some(format!("Loop detected: {}. Stopping here.", signal.detail));
                            loop_detected = true;
                            break 'agent;
                        }
                        LoopSeverity::Warning => {
                            warn!(session = %key, detail = %signal.detail, "loop warning");
                        }
                    }
                }

                let result = match trace::trace_async(
                    "executor.rs",
                    "tool.execute",
                    &json!({ "tool": call.name, "arguments": call.arguments }),
                    async {
                        Ok::<_, std::convert::Infallible>(
                            self.tools.execute(&call.name, &call.arguments, &tool_ctx).await,
                        )
                    },
                )
                .await
                {
                    Ok(result) => result,
                    Err(never) => match never {},
                };
                convo.push(LlmMessage::tool(call.id.clone(), result.content));
            }

            self.history.compress_tool_results(&mut convo);
        }

        let content = final_content.unwrap_or_else(|| {
            format!(
                "I could not finish within {} steps. Partial progress has been recorded.",
                self.cfg.max_iterations
            )
        });
        convo.push(LlmMessage::assistant(content.clone()));

        // Persist this turn's messages (history and system prefix excluded).
        for msg in &convo[persist_from..] {
            self.sessions.append_message(key, msg)?;
        }

        self.after_turn(key, &inbound.content, &content);

        info!(
            session = %key,
            model = %pinned,
            iterations,
            loop_detected,
            "turn complete"
        );

        let mut reply = OutboundMessage::text(
            inbound.channel.clone(),
            inbound.chat_id.clone(),
            content,
        );
        reply
            .metadata
            .insert("model".to_string(), json!(pinned));
        reply
            .metadata
            .insert("iterations".to_string(), json!(iterations));
        if loop_detected {
            reply
                .metadata
                .insert("loop_detected".to_string(), json!(true));
        }
        Ok(reply)
    }

    /// Post-turn side effects: memory write, summarization, idle check,
    /// session cap. All fire-and-forget; failures are logged only.
    fn after_turn(&self, key: &SessionKey, user_text: &str, reply: &str) {
        let session_id = key.format();

        if let Some(memory) = self.memory.as_ref().filter(|_| self.cfg.memory_enabled) {
            let memory = Arc::clone(memory);
            let mut entry = NewEntry::conversation(
                session_id.clone(),
                format!("User: {user_text}\nAssistant: {reply}"),
            );
            entry.metadata.channel = Some(key.channel.clone());
            tokio::spawn(async move {
                if let Err(e) = memory.store(entry).await {
                    warn!(error = %e, "memory store failed");
                }
            });
        }

        if let Some(summarizer) = &self.summarizer {
            summarizer.record_activity(&session_id);

            let fetch_sessions = Arc::clone(&self.sessions);
            let fetch_key = key.clone();
            summarizer.start_idle_check(
                &session_id,
                Arc::new(move || {
                    fetch_sessions
                        .messages_since_consolidation(&fetch_key)
                        .unwrap_or_default()
                }),
            );

            if self.cfg.auto_summarize {
                let pending = self
                    .sessions
                    .messages_since_consolidation(key)
                    .unwrap_or_default();
                if pending.len() >= self.cfg.summarize_threshold
                    && summarizer.should_summarize(&pending)
                {
                    let summarizer = Arc::clone(summarizer);
                    let sessions = Arc::clone(&self.sessions);
                    let key = key.clone();
                    tokio::spawn(async move {
                        match summarizer.summarize_and_store(&key.format(), &pending).await {
                            Ok(_) => {
                                if let Err(e) = sessions.mark_consolidated(&key) {
                                    warn!(error = %e, "failed to advance consolidation bookmark");
                                }
                            }
                            Err(e) => warn!(error = %e, "threshold summarization failed"),
                        }
                    });
                }
            }
        }

        let evicted = self.sessions.evict_to(self.cfg.max_sessions);
        if evicted > 0 {
            debug!(evicted, "session cap enforced");
        }
    }

    /// Memory lookup for prompt injection. Best-effort: failures and empty
    /// queries return no entries.
    async fn retrieve_memories(&self, query: &str) -> Vec<ScoredEntry> {
        let memory = match self.memory.as_ref().filter(|_| self.cfg.memory_enabled) {
            Some(m) => m,
            None => return Vec::new(),
        };
        if query.trim().is_empty() {
            return Vec::new();
        }
        let opts = SearchOptions {
            limit: Some(MEMORY_RETRIEVE_LIMIT),
            ..Default::default()
        };
        match memory.search(query, &opts).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "memory retrieval failed");
                Vec::new()
            }
        }
    }
}

/// Render retrieved memories as a prompt block, one labeled line each.
fn format_memories(memories: &[ScoredEntry]) -> String {
    let mut block = String::from("<relevant-memories>\n");
    for hit in memories {
        let mut snippet: String = hit
            .entry
            .content
            .chars()
            .take(MEMORY_SNIPPET_CHARS)
            .collect();
        if hit.entry.content.chars().count() > MEMORY_SNIPPET_CHARS {
            snippet.push('…');
        }
        // Keep each entry on one line.
        let snippet = snippet.replace('\n', " ");
        block.push_str(&format!("[{}] {}\n", hit.entry.kind, snippet));
    }
    block.push_str("</relevant-memories>");
    block
}

/// User message, multipart when media is attached.
fn build_user_message(inbound: &InboundMessage) -> LlmMessage {
    if inbound.media.is_empty() {
        return LlmMessage::user(inbound.content.clone());
    }

    let mut parts = vec![ContentPart::Text {
        text: inbound.content.clone(),
    }];
    for media in inbound.media.iter().take(MAX_MEDIA_COUNT) {
        if media.is_image() {
            parts.push(ContentPart::Image {
                url: media.url.clone(),
                mime: media.mime.clone(),
            });
        } else {
            parts.push(ContentPart::Text {
                text: format!("[attachment: {}]", media.url),
            });
        }
    }
    LlmMessage::user_parts(parts)
}

/// Replace image parts with a `[image]` placeholder for non-vision models.
fn downgrade_images(messages: &mut [LlmMessage]) {
    for msg in messages.iter_mut() {
        if msg.role != Role::User {
            continue;
        }
        if let Content::Parts(parts) = &mut msg.content {
            for part in parts.iter_mut() {
                if matches!(part, ContentPart::Image { .. }) {
                    *part = ContentPart::Text {
                        text: "[image]".to_string(),
                    };
                }
            }
        }
    }
}
