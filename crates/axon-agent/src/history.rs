//! Token-bounded history truncation and tool-result compression.

use axon_core::types::{Content, ContentPart, LlmMessage, Role};

/// Marker appended to clipped tool results.
const TRUNCATION_SUFFIX: &str = "…[truncated]";
/// Flat token cost charged per image part.
const IMAGE_TOKEN_COST: usize = 85;
/// Per-message role/framing overhead.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateStrategy {
    /// Keep the most recent messages.
    Sliding,
    /// Keep recent user messages and recent assistant/tool messages in
    /// equal halves.
    Priority,
}

#[derive(Debug, Clone)]
pub struct HistoryManager {
    pub strategy: TruncateStrategy,
    /// Non-system messages kept by the sliding strategy.
    pub preserve_recent: usize,
    /// Total messages targeted by the priority strategy.
    pub max_messages: usize,
    /// Tool results longer than this are clipped.
    pub max_tool_result_len: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self {
            strategy: TruncateStrategy::Sliding,
            preserve_recent: 40,
            max_messages: 50,
            max_tool_result_len: 4000,
        }
    }
}

impl HistoryManager {
    /// Bound the message list. System messages always survive.
    pub fn truncate(&self, messages: &[LlmMessage]) -> Vec<LlmMessage> {
        match self.strategy {
            TruncateStrategy::Sliding => self.truncate_sliding(messages),
            TruncateStrategy::Priority => self.truncate_priority(messages),
        }
    }

    fn truncate_sliding(&self, messages: &[LlmMessage]) -> Vec<LlmMessage> {
        let non_system_count = messages.iter().filter(|m| m.role != Role::System).count();
        let mut skip = non_system_count.saturating_sub(self.preserve_recent);

        messages
            .iter()
            .filter(|m| {
                if m.role == Role::System {
                    return true;
                }
                if skip > 0 {
                    skip -= 1;
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect()
    }

    fn truncate_priority(&self, messages: &[LlmMessage]) -> Vec<LlmMessage> {
        let system_count = messages.iter().filter(|m| m.role == Role::System).count();
        let slots = self.max_messages.saturating_sub(system_count);
        let user_slots = slots / 2;
        let other_slots = slots - user_slots;

        // Indexes of the most recent N of each bucket.
        let user_indexes: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User)
            .map(|(i, _)| i)
            .rev()
            .take(user_slots)
            .collect();
        let other_indexes: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m.role, Role::Assistant | Role::Tool))
            .map(|(i, _)| i)
            .rev()
            .take(other_slots)
            .collect();

        let mut keep: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::System)
            .map(|(i, _)| i)
            .collect();
        keep.extend(user_indexes);
        keep.extend(other_indexes);
        keep.sort_unstable();

        keep.into_iter().map(|i| messages[i].clone()).collect()
    }

    /// Clip oversized tool results in place.
    pub fn compress_tool_results(&self, messages: &mut [LlmMessage]) {
        for msg in messages.iter_mut().filter(|m| m.role == Role::Tool) {
            let text = msg.content.as_text();
            if text.chars().count() > self.max_tool_result_len {
                let clipped: String = text.chars().take(self.max_tool_result_len).collect();
                msg.content = Content::Text(format!("{clipped}{TRUNCATION_SUFFIX}"));
            }
        }
    }

    /// Rough token estimate: ⌈chars/4⌉ per text, a flat cost per image,
    /// plus per-message overhead. Only used for logging and opportunistic
    /// checks.
    pub fn estimate_tokens(&self, messages: &[LlmMessage]) -> usize {
        messages
            .iter()
            .map(|m| {
                let content_tokens = match &m.content {
                    Content::Text(t) => t.chars().count().div_ceil(4),
                    Content::Parts(parts) => parts
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => text.chars().count().div_ceil(4),
                            ContentPart::Image { .. } => IMAGE_TOKEN_COST,
                        })
                        .sum(),
                };
                content_tokens + MESSAGE_OVERHEAD_TOKENS
            })
            .sum()
    }
}
