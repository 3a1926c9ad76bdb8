//! Model router: picks a model per turn from routing signals.
//!
//! Signals: vision requirement (image parts or attached media), tool
//! requirement (configured keywords in the latest user text), a complexity
//! score mapped through monotonic thresholds, and explicit keyword rules.
//! Max mode short-circuits everything to the highest tier.

use tracing::debug;

use axon_core::config::{KeywordRule, RoutingConfig};
use axon_core::types::{LlmMessage, ModelLevel, Role};

use crate::gateway::{LlmGateway, RouteCandidate};

/// Outcome of a routing pass.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub provider: String,
    pub model: String,
    pub level: ModelLevel,
    /// Human-readable note on how the decision was made, for logs.
    pub reason: String,
}

impl RouteDecision {
    /// Gateway-ready model reference, pinning the provider when one was
    /// chosen.
    pub fn model_ref(&self) -> String {
        if self.provider.is_empty() {
            self.model.clone()
        } else {
            format!("{}/{}", self.provider, self.model)
        }
    }
}

pub struct ModelRouter {
    cfg: RoutingConfig,
}

impl ModelRouter {
    pub fn new(cfg: RoutingConfig) -> Self {
        Self { cfg }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Select a model for the turn. `None` when routing is disabled or no
    /// candidate survives filtering; the caller then uses the gateway
    /// default.
    pub fn select(
        &self,
        messages: &[LlmMessage],
        media_attached: bool,
        candidates: &[RouteCandidate],
    ) -> Option<RouteDecision> {
        if !self.cfg.enabled || candidates.is_empty() {
            return None;
        }

        let last_user_text = last_user_text(messages);
        let vision_required = media_attached || any_user_image(messages);
        let tool_required = self.requires_tools(&last_user_text);

        let (mut target, mut reason) = if self.cfg.max {
            (ModelLevel::Ultra, "max mode".to_string())
        } else {
            let score = self.complexity_score(messages, &last_user_text, tool_required);
            let level = self.level_for_score(score);
            (level, format!("score {score}"))
        };

        if !self.cfg.max {
            if let Some(rule) = self.matching_rule(&last_user_text) {
                target = rule.level;
                reason = format!("rule [{}]", rule.keywords.join(","));
            }
        }

        let mut pool: Vec<&RouteCandidate> = candidates
            .iter()
            .filter(|c| !vision_required || c.descriptor.capabilities.vision)
            .filter(|c| !tool_required || c.descriptor.capabilities.tools)
            .collect();
        if pool.is_empty() {
            debug!(vision_required, tool_required, "no routing candidate matches constraints");
            return None;
        }

        // Exact level match wins; otherwise the closest level, ties broken
        // toward the higher tier in max mode and the lower tier otherwise.
        // Final tie-break: provider priority, then model id.
        let target_rank = target.rank() as i16;
        pool.sort_by(|a, b| {
            let da = (a.descriptor.level.rank() as i16 - target_rank).abs();
            let db = (b.descriptor.level.rank() as i16 - target_rank).abs();
            da.cmp(&db)
                .then_with(|| {
                    let ra = a.descriptor.level.rank();
                    let rb = b.descriptor.level.rank();
                    if self.cfg.max {
                        rb.cmp(&ra)
                    } else {
                        ra.cmp(&rb)
                    }
                })
                .then_with(|| a.provider_priority.cmp(&b.provider_priority))
                .then_with(|| a.descriptor.id.cmp(&b.descriptor.id))
        });

        let chosen = pool[0];
        debug!(
            provider = %chosen.provider,
            model = %chosen.descriptor.id,
            level = %chosen.descriptor.level,
            target = %target,
            %reason,
            "routing decision"
        );
        Some(RouteDecision {
            provider: chosen.provider.clone(),
            model: chosen.descriptor.id.clone(),
            level: chosen.descriptor.level,
            reason,
        })
    }

    /// Ask the configured intent model to classify the task, and map the
    /// tag to a preconfigured model. Intent calls bypass routing entirely.
    pub async fn analyze_task_type(
        &self,
        gateway: &LlmGateway,
        messages: &[LlmMessage],
    ) -> Option<RouteDecision> {
        let intent_model = self.cfg.intent_model.as_deref()?;
        let last = last_user_text(messages);
        if last.is_empty() {
            return None;
        }

        let prompt = vec![
            LlmMessage::system(
                "Classify the user's request. Reply with exactly one word: \
                 chat, code, vision, research, or other.",
            ),
            LlmMessage::user(last),
        ];
        let resp = gateway
            .chat(
                &prompt,
                &[],
                Some(intent_model),
                &axon_core::types::GenerationConfig {
                    max_tokens: Some(8),
                    ..Default::default()
                },
            )
            .await
            .ok()?;

        let tag = resp
            .content
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_lowercase();
        let model_ref = self.cfg.task_models.get(&tag)?;
        let (provider, model) = match model_ref.split_once('/') {
            Some((p, m)) => (p.to_string(), m.to_string()),
            None => (String::new(), model_ref.clone()),
        };
        debug!(%tag, model = %model_ref, "intent routing decision");
        Some(RouteDecision {
            provider,
            model,
            level: ModelLevel::Medium,
            reason: format!("intent [{tag}]"),
        })
    }

    fn requires_tools(&self, last_user_text: &str) -> bool {
        if self.cfg.tool_keywords.is_empty() || last_user_text.is_empty() {
            return false;
        }
        let lower = last_user_text.to_lowercase();
        self.cfg
            .tool_keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
    }

    fn complexity_score(
        &self,
        messages: &[LlmMessage],
        last_user_text: &str,
        tool_required: bool,
    ) -> u32 {
        let length = last_user_text.chars().count() as u32;
        let fenced_blocks = (last_user_text.matches("```").count() / 2) as u32;

        self.cfg.base_score
            + (length / 100) * self.cfg.length_weight
            + self.cfg.code_block_score * fenced_blocks
            + self.cfg.tool_call_score * u32::from(tool_required)
            + self.cfg.multi_turn_score * messages.len() as u32
    }

    fn level_for_score(&self, score: u32) -> ModelLevel {
        let t = &self.cfg.thresholds;
        if score < t.low {
            ModelLevel::Fast
        } else if score < t.medium {
            ModelLevel::Low
        } else if score < t.high {
            ModelLevel::Medium
        } else if score < t.ultra {
            ModelLevel::High
        } else {
            ModelLevel::Ultra
        }
    }

    /// Highest-priority rule whose keywords and length bounds match.
    fn matching_rule(&self, last_user_text: &str) -> Option<&KeywordRule> {
        if last_user_text.is_empty() {
            return None;
        }
        let lower = last_user_text.to_lowercase();
        let length = last_user_text.chars().count();
        self.cfg
            .rules
            .iter()
            .filter(|rule| {
                rule.min_length.map(|min| length >= min).unwrap_or(true)
                    && rule.max_length.map(|max| length <= max).unwrap_or(true)
                    && rule
                        .keywords
                        .iter()
                        .any(|kw| lower.contains(&kw.to_lowercase()))
            })
            .max_by_key(|rule| rule.priority)
    }
}

/// Text of the most recent user message.
fn last_user_text(messages: &[LlmMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_text())
        .unwrap_or_default()
}

fn any_user_image(messages: &[LlmMessage]) -> bool {
    messages
        .iter()
        .any(|m| m.role == Role::User && m.content.has_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::config::LevelThresholds;
    use axon_core::types::{
        ContentPart, GenerationConfig, ModelCapabilities, ModelDescriptor,
    };

    fn candidate(
        provider: &str,
        priority: u32,
        id: &str,
        level: ModelLevel,
        vision: bool,
        tools: bool,
    ) -> RouteCandidate {
        RouteCandidate {
            provider: provider.to_string(),
            provider_priority: priority,
            descriptor: ModelDescriptor {
                id: id.to_string(),
                provider: provider.to_string(),
                capabilities: ModelCapabilities {
                    vision,
                    reasoning: false,
                    tools,
                },
                level,
                defaults: GenerationConfig::default(),
            },
        }
    }

    fn full_pool() -> Vec<RouteCandidate> {
        vec![
            candidate("p", 1, "tiny", ModelLevel::Fast, false, true),
            candidate("p", 1, "small", ModelLevel::Low, false, true),
            candidate("p", 1, "mid", ModelLevel::Medium, true, true),
            candidate("p", 1, "big", ModelLevel::High, false, true),
            candidate("p", 1, "huge", ModelLevel::Ultra, true, true),
        ]
    }

    fn router(cfg: RoutingConfig) -> ModelRouter {
        ModelRouter::new(cfg)
    }

    #[test]
    fn short_chat_routes_to_fast_tier() {
        let r = router(RoutingConfig {
            base_score: 0,
            multi_turn_score: 0,
            ..Default::default()
        });
        let decision = r
            .select(&[LlmMessage::user("hi")], false, &full_pool())
            .unwrap();
        assert_eq!(decision.model, "tiny");
        assert_eq!(decision.level, ModelLevel::Fast);
    }

    #[test]
    fn long_code_heavy_message_routes_higher() {
        let r = router(RoutingConfig {
            base_score: 0,
            multi_turn_score: 0,
            thresholds: LevelThresholds {
                low: 10,
                medium: 20,
                high: 40,
                ultra: 80,
            },
            ..Default::default()
        });
        let text = format!("```rust\n{}\n```  please refactor this", "x".repeat(600));
        let decision = r.select(&[LlmMessage::user(text)], false, &full_pool()).unwrap();
        // 6 length buckets * 2 + one fenced block * 15 = 27 → medium.
        assert_eq!(decision.level, ModelLevel::Medium);
    }

    #[test]
    fn vision_requirement_filters_candidates() {
        let r = router(RoutingConfig::default());
        let msg = LlmMessage::user_parts(vec![
            ContentPart::Text { text: "what is this".into() },
            ContentPart::Image { url: "x.png".into(), mime: None },
        ]);
        let decision = r.select(&[msg], false, &full_pool()).unwrap();
        assert!(["mid", "huge"].contains(&decision.model.as_str()));
    }

    #[test]
    fn attached_media_also_requires_vision() {
        let r = router(RoutingConfig::default());
        let decision = r
            .select(&[LlmMessage::user("look at this")], true, &full_pool())
            .unwrap();
        assert!(["mid", "huge"].contains(&decision.model.as_str()));
    }

    #[test]
    fn tool_keywords_filter_to_tool_capable() {
        let pool = vec![
            candidate("p", 1, "no-tools", ModelLevel::Fast, false, false),
            candidate("p", 1, "with-tools", ModelLevel::Fast, false, true),
        ];
        let r = router(RoutingConfig {
            tool_keywords: vec!["run".into()],
            base_score: 0,
            multi_turn_score: 0,
            tool_call_score: 0,
            ..Default::default()
        });
        let decision = r
            .select(&[LlmMessage::user("please RUN the tests")], false, &pool)
            .unwrap();
        assert_eq!(decision.model, "with-tools");
    }

    #[test]
    fn keyword_rule_overrides_score_by_priority() {
        let r = router(RoutingConfig {
            base_score: 0,
            multi_turn_score: 0,
            rules: vec![
                KeywordRule {
                    keywords: vec!["translate".into()],
                    min_length: None,
                    max_length: None,
                    level: ModelLevel::Low,
                    priority: 1,
                },
                KeywordRule {
                    keywords: vec!["translate".into()],
                    min_length: None,
                    max_length: None,
                    level: ModelLevel::Ultra,
                    priority: 9,
                },
            ],
            ..Default::default()
        });
        let decision = r
            .select(&[LlmMessage::user("translate this")], false, &full_pool())
            .unwrap();
        assert_eq!(decision.level, ModelLevel::Ultra);
    }

    #[test]
    fn rule_length_bounds_are_enforced() {
        let r = router(RoutingConfig {
            base_score: 0,
            multi_turn_score: 0,
            rules: vec![KeywordRule {
                keywords: vec!["hi".into()],
                min_length: Some(100),
                max_length: None,
                level: ModelLevel::Ultra,
                priority: 1,
            }],
            ..Default::default()
        });
        let decision = r.select(&[LlmMessage::user("hi")], false, &full_pool()).unwrap();
        // Rule did not fire: message shorter than min_length.
        assert_eq!(decision.level, ModelLevel::Fast);
    }

    #[test]
    fn max_mode_forces_ultra() {
        let r = router(RoutingConfig {
            max: true,
            ..Default::default()
        });
        let decision = r.select(&[LlmMessage::user("hi")], false, &full_pool()).unwrap();
        assert_eq!(decision.level, ModelLevel::Ultra);
        assert_eq!(decision.model, "huge");
    }

    #[test]
    fn closest_level_prefers_lower_outside_max_mode() {
        // Target medium, pool only has low and high: equal distance.
        let pool = vec![
            candidate("p", 1, "low", ModelLevel::Low, false, true),
            candidate("p", 1, "high", ModelLevel::High, false, true),
        ];
        let r = router(RoutingConfig {
            base_score: 60,
            multi_turn_score: 0,
            ..Default::default()
        });
        let decision = r.select(&[LlmMessage::user("hi")], false, &pool).unwrap();
        assert_eq!(decision.model, "low");
    }

    #[test]
    fn ties_break_by_provider_priority_then_model_id() {
        let pool = vec![
            candidate("b", 2, "bbb", ModelLevel::Fast, false, true),
            candidate("a", 1, "zzz", ModelLevel::Fast, false, true),
            candidate("a", 1, "aaa", ModelLevel::Fast, false, true),
        ];
        let r = router(RoutingConfig {
            base_score: 0,
            multi_turn_score: 0,
            ..Default::default()
        });
        let decision = r.select(&[LlmMessage::user("hi")], false, &pool).unwrap();
        assert_eq!(decision.provider, "a");
        assert_eq!(decision.model, "aaa");
    }

    #[test]
    fn disabled_router_returns_none() {
        let r = router(RoutingConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(r.select(&[LlmMessage::user("hi")], false, &full_pool()).is_none());
    }

    #[tokio::test]
    async fn intent_analysis_maps_tag_to_configured_model() {
        use crate::provider::{LlmResponse, Provider, ProviderError};
        use async_trait::async_trait;
        use std::sync::Arc;

        struct IntentProvider;

        #[async_trait]
        impl Provider for IntentProvider {
            fn name(&self) -> &str {
                "canned"
            }
            async fn chat(
                &self,
                _messages: &[LlmMessage],
                _tools: &[crate::provider::ToolDefinition],
                model: &str,
                _config: &GenerationConfig,
            ) -> Result<LlmResponse, ProviderError> {
                Ok(LlmResponse {
                    content: "Code.".to_string(),
                    tool_calls: Vec::new(),
                    usage: None,
                    used_provider: "canned".into(),
                    used_model: model.to_string(),
                    level: None,
                })
            }
            fn default_model(&self) -> String {
                "intent-mini".into()
            }
        }

        let gateway = LlmGateway::new(true);
        gateway.register_provider("canned", Arc::new(IntentProvider), vec!["*".into()], 1, Vec::new());

        let mut task_models = std::collections::BTreeMap::new();
        task_models.insert("code".to_string(), "canned/big-coder".to_string());
        let r = router(RoutingConfig {
            intent_model: Some("canned/intent-mini".into()),
            task_models,
            ..Default::default()
        });

        let decision = r
            .analyze_task_type(&gateway, &[LlmMessage::user("write a sort function")])
            .await
            .unwrap();
        assert_eq!(decision.provider, "canned");
        assert_eq!(decision.model, "big-coder");
        assert!(decision.reason.contains("code"));
    }

    #[tokio::test]
    async fn intent_analysis_without_mapping_returns_none() {
        let gateway = LlmGateway::new(true);
        let r = router(RoutingConfig {
            intent_model: None,
            ..Default::default()
        });
        assert!(r
            .analyze_task_type(&gateway, &[LlmMessage::user("hi")])
            .await
            .is_none());
    }
}
