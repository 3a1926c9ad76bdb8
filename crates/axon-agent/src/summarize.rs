//! Conversation summarization — threshold- and idle-triggered compaction.
//!
//! Long sessions are compacted into structured JSON summaries stored as
//! `summary` memory entries. A per-session idle check runs as a periodic
//! task; a failed summarization is logged and the check keeps running.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use axon_core::types::{GenerationConfig, LlmMessage};
use axon_memory::{MemoryEntry, MemoryStore, NewEntry, Summary, TimeRange};

use crate::error::{AgentError, Result};
use crate::gateway::LlmGateway;

/// Fixed instruction for the summarization model.
const SUMMARY_SYSTEM_PROMPT: &str = "You are a conversation summarizer. Summarize the \
conversation below into JSON with exactly these fields: \
{\"topic\": string, \"keyPoints\": [string], \"decisions\": [string], \
\"todos\": [{\"done\": bool, \"content\": string}], \"entities\": [string]}. \
Reply with the JSON object only.";

/// How often each idle check wakes up.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Minimum messages before a summary is worth producing.
    pub min_messages: usize,
    /// Inactivity span that triggers the idle summarization.
    pub idle_timeout: Duration,
    /// Model reference used for summarization; unset uses the default.
    pub model: Option<String>,
    /// Wake-up cadence of the idle check.
    pub check_interval: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            min_messages: 10,
            idle_timeout: Duration::from_secs(300),
            model: None,
            check_interval: IDLE_CHECK_INTERVAL,
        }
    }
}

pub struct Summarizer {
    gateway: Arc<LlmGateway>,
    store: Arc<MemoryStore>,
    cfg: SummarizerConfig,
    activity: DashMap<String, Instant>,
    idle_tasks: DashMap<String, CancellationToken>,
}

impl Summarizer {
    pub fn new(gateway: Arc<LlmGateway>, store: Arc<MemoryStore>, cfg: SummarizerConfig) -> Self {
        Self {
            gateway,
            store,
            cfg,
            activity: DashMap::new(),
            idle_tasks: DashMap::new(),
        }
    }

    /// Whether the message list is long enough to summarize.
    pub fn should_summarize(&self, messages: &[LlmMessage]) -> bool {
        messages.len() >= self.cfg.min_messages
    }

    /// Produce a structured summary of the given messages.
    pub async fn summarize(&self, messages: &[LlmMessage]) -> Result<Summary> {
        let transcript: String = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content.as_text()))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = vec![
            LlmMessage::system(SUMMARY_SYSTEM_PROMPT),
            LlmMessage::user(format!("Summarize this conversation:\n\n{transcript}")),
        ];
        let response = self
            .gateway
            .chat(
                &prompt,
                &[],
                self.cfg.model.as_deref(),
                &GenerationConfig {
                    max_tokens: Some(1024),
                    ..Default::default()
                },
            )
            .await?;

        let json_block = extract_json_object(&response.content).ok_or_else(|| {
            AgentError::Parse(format!(
                "no JSON object in summarizer response: {}",
                response.content.chars().take(120).collect::<String>()
            ))
        })?;
        let mut summary: Summary =
            serde_json::from_str(json_block).map_err(|e| AgentError::Parse(e.to_string()))?;

        summary.id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now();
        summary.time_range = TimeRange { start: now, end: now };
        summary.original_message_count = messages.len();
        Ok(summary)
    }

    /// Summarize and persist as a `summary` memory entry.
    pub async fn summarize_and_store(
        &self,
        session_id: &str,
        messages: &[LlmMessage],
    ) -> Result<MemoryEntry> {
        let summary = self.summarize(messages).await?;
        let content =
            serde_json::to_string(&summary).map_err(|e| AgentError::Parse(e.to_string()))?;
        let entry = self
            .store
            .store(NewEntry::summary(session_id, content))
            .await?;
        info!(
            session = %session_id,
            topic = %summary.topic,
            messages = summary.original_message_count,
            "conversation summarized"
        );
        Ok(entry)
    }

    /// Note session activity; resets the idle clock.
    pub fn record_activity(&self, session_id: &str) {
        self.activity.insert(session_id.to_string(), Instant::now());
    }

    /// Start (or restart) the periodic idle check for a session.
    ///
    /// `fetch` returns the messages that would be summarized; it runs on
    /// every wake-up so the view is always current.
    pub fn start_idle_check(
        self: &Arc<Self>,
        session_id: &str,
        fetch: Arc<dyn Fn() -> Vec<LlmMessage> + Send + Sync>,
    ) {
        // Replace any previous check for this session.
        let token = CancellationToken::new();
        if let Some(old) = self
            .idle_tasks
            .insert(session_id.to_string(), token.clone())
        {
            old.cancel();
        }

        let this = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.cfg.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let idle = this
                    .activity
                    .get(&session_id)
                    .map(|at| at.elapsed())
                    .unwrap_or_else(|| Duration::from_secs(0));
                if idle < this.cfg.idle_timeout {
                    continue;
                }

                let messages = fetch();
                if messages.is_empty() {
                    continue;
                }

                debug!(session = %session_id, idle_secs = idle.as_secs(), "idle summarization");
                if let Err(e) = this.summarize_and_store(&session_id, &messages).await {
                    warn!(session = %session_id, error = %e, "idle summarization failed");
                }
                // Either way the clock resets so the check does not fire in
                // a tight loop on the same idle stretch.
                this.record_activity(&session_id);
            }
        });
    }

    /// Stop the idle check for one session.
    pub fn stop_idle_check(&self, session_id: &str) {
        if let Some((_, token)) = self.idle_tasks.remove(session_id) {
            token.cancel();
        }
    }

    /// Cancel every idle check (runtime shutdown).
    pub fn shutdown(&self) {
        for entry in self.idle_tasks.iter() {
            entry.value().cancel();
        }
        self.idle_tasks.clear();
    }
}

/// Slice out the first JSON object, fenced or bare.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LlmResponse, Provider, ProviderError, ToolDefinition};
    use async_trait::async_trait;
    use axon_memory::{MemoryKind, MemoryStoreConfig, SearchFilter, SearchOptions};

    struct CannedProvider {
        reply: String,
    }

    #[async_trait]
    impl Provider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }
        async fn chat(
            &self,
            _messages: &[LlmMessage],
            _tools: &[ToolDefinition],
            model: &str,
            _config: &GenerationConfig,
        ) -> std::result::Result<LlmResponse, ProviderError> {
            Ok(LlmResponse {
                content: self.reply.clone(),
                tool_calls: Vec::new(),
                usage: None,
                used_provider: "canned".into(),
                used_model: model.to_string(),
                level: None,
            })
        }
        fn default_model(&self) -> String {
            "summarizer-model".into()
        }
    }

    fn summarizer_with_reply(reply: &str) -> Arc<Summarizer> {
        let gateway = Arc::new(LlmGateway::new(true));
        gateway.register_provider(
            "canned",
            Arc::new(CannedProvider {
                reply: reply.to_string(),
            }),
            vec!["*".into()],
            1,
            Vec::new(),
        );
        let store =
            Arc::new(MemoryStore::open_in_memory(MemoryStoreConfig::default(), None).unwrap());
        Arc::new(Summarizer::new(gateway, store, SummarizerConfig::default()))
    }

    fn turns(n: usize) -> Vec<LlmMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    LlmMessage::user(format!("question {i}"))
                } else {
                    LlmMessage::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn threshold_gates_summarization() {
        let s = summarizer_with_reply("{}");
        assert!(!s.should_summarize(&turns(9)));
        assert!(s.should_summarize(&turns(10)));
    }

    #[tokio::test]
    async fn summarize_parses_bare_json() {
        let s = summarizer_with_reply(
            r#"{"topic":"travel plans","keyPoints":["fly monday"],"decisions":["book hotel"],"todos":[{"done":false,"content":"pack"}],"entities":["Paris"]}"#,
        );
        let summary = s.summarize(&turns(4)).await.unwrap();
        assert_eq!(summary.topic, "travel plans");
        assert_eq!(summary.key_points, vec!["fly monday"]);
        assert_eq!(summary.todos[0].content, "pack");
        assert_eq!(summary.original_message_count, 4);
        assert!(!summary.id.is_empty());
    }

    #[tokio::test]
    async fn summarize_parses_fenced_json_with_defaults() {
        let s = summarizer_with_reply(
            "Here you go:\n```json\n{\"topic\": \"short chat\"}\n```\nanything else?",
        );
        let summary = s.summarize(&turns(2)).await.unwrap();
        assert_eq!(summary.topic, "short chat");
        assert!(summary.key_points.is_empty());
        assert!(summary.decisions.is_empty());
    }

    #[tokio::test]
    async fn summarize_without_json_is_a_parse_error() {
        let s = summarizer_with_reply("sorry, I cannot do that");
        let err = s.summarize(&turns(2)).await.unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[tokio::test]
    async fn summarize_and_store_persists_summary_entry() {
        let s = summarizer_with_reply(r#"{"topic":"t"}"#);
        let entry = s.summarize_and_store("telegram:42", &turns(4)).await.unwrap();
        assert_eq!(entry.kind, MemoryKind::Summary);

        let loaded = s.store.get_by_id(&entry.id).unwrap().unwrap();
        let stored: Summary = serde_json::from_str(&loaded.content).unwrap();
        assert_eq!(stored.topic, "t");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_check_summarizes_after_timeout() {
        let gateway = Arc::new(LlmGateway::new(true));
        gateway.register_provider(
            "canned",
            Arc::new(CannedProvider {
                reply: r#"{"topic":"idle"}"#.to_string(),
            }),
            vec!["*".into()],
            1,
            Vec::new(),
        );
        let store =
            Arc::new(MemoryStore::open_in_memory(MemoryStoreConfig::default(), None).unwrap());
        let s = Arc::new(Summarizer::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            SummarizerConfig {
                min_messages: 1,
                idle_timeout: Duration::from_millis(100),
                model: None,
                check_interval: Duration::from_millis(50),
            },
        ));

        s.record_activity("s1");
        s.start_idle_check("s1", Arc::new(|| turns(4)));

        // Long past the idle timeout plus several check intervals.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let hits = store
            .search(
                "idle",
                &SearchOptions {
                    filter: SearchFilter {
                        kind: Some(MemoryKind::Summary),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!hits.is_empty());
        s.stop_idle_check("s1");
    }
}
