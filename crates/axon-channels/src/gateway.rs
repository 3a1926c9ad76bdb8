//! Channel gateway — fan-in from channels to the executor, fan-out of
//! replies to every running channel.
//!
//! Broadcast is settle-all: channels are dispatched in registration order
//! and complete independently; one failing channel never affects the rest.
//! Repeated send failures trigger an asynchronous stop→start restart; past
//! the limit the channel is marked unavailable and skipped.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use axon_core::types::{InboundMessage, OutboundMessage, DEFAULT_CHAT_ID};

use crate::channel::Channel;

/// The executor seam: turns one inbound message into at most one reply.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process_message(&self, msg: InboundMessage) -> Option<OutboundMessage>;
}

struct ChannelSlot {
    channel: Arc<dyn Channel>,
    failures: AtomicU32,
    available: AtomicBool,
    /// Most recent inbound chat id observed on this channel.
    last_chat_id: Mutex<Option<String>>,
}

/// Registry of live channels plus the broadcast and reconnect machinery.
pub struct ChannelGateway {
    slots: DashMap<String, Arc<ChannelSlot>>,
    /// Registration order, for deterministic broadcast dispatch.
    order: Mutex<Vec<String>>,
    processor: Arc<dyn MessageProcessor>,
    max_reconnect: u32,
}

impl ChannelGateway {
    pub fn new(processor: Arc<dyn MessageProcessor>, max_reconnect: u32) -> Self {
        Self {
            slots: DashMap::new(),
            order: Mutex::new(Vec::new()),
            processor,
            max_reconnect,
        }
    }

    /// Register a channel adapter. Re-registering a name replaces the old
    /// adapter and resets its failure state.
    pub fn register(&self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering channel adapter");
        let replaced = self
            .slots
            .insert(
                name.clone(),
                Arc::new(ChannelSlot {
                    channel,
                    failures: AtomicU32::new(0),
                    available: AtomicBool::new(true),
                    last_chat_id: Mutex::new(None),
                }),
            )
            .is_some();
        if !replaced {
            self.order.lock().unwrap().push(name);
        }
    }

    /// Record the inbound chat id so later `default` outbounds can resolve.
    pub fn note_inbound(&self, msg: &InboundMessage) {
        if let Some(slot) = self.slots.get(&msg.channel) {
            *slot.last_chat_id.lock().unwrap() = Some(msg.chat_id.clone());
        }
    }

    /// Process one inbound message end to end.
    pub async fn process(&self, inbound: InboundMessage) {
        self.note_inbound(&inbound);
        if let Some(outbound) = self.processor.process_message(inbound).await {
            self.broadcast(outbound).await;
        }
    }

    /// Send a reply to every running channel in parallel (settle-all).
    pub async fn broadcast(&self, msg: OutboundMessage) {
        let order: Vec<String> = self.order.lock().unwrap().clone();
        let mut targets: Vec<(String, Arc<ChannelSlot>, OutboundMessage)> = Vec::new();

        for name in order {
            let slot = match self.slots.get(&name) {
                Some(s) => Arc::clone(&s),
                None => continue,
            };
            if !slot.available.load(Ordering::Relaxed) || !slot.channel.is_running() {
                continue;
            }
            match resolve_for_channel(&name, &slot, &msg) {
                Some(resolved) => targets.push((name, slot, resolved)),
                None => {
                    warn!(channel = %name, "no known chat id for broadcast, dropping");
                }
            }
        }

        let sends = targets.iter().map(|(name, slot, resolved)| {
            let name = name.clone();
            let slot = Arc::clone(slot);
            async move {
                let result = slot.channel.send(resolved).await;
                (name, slot, result)
            }
        });

        for (name, slot, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    slot.failures.store(0, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(channel = %name, error = %e, "channel send failed");
                    self.handle_send_failure(name, slot);
                }
            }
        }
    }

    /// Start every registered channel. Errors are logged, not raised.
    pub async fn start_all(&self) {
        let order: Vec<String> = self.order.lock().unwrap().clone();
        for name in order {
            if let Some(slot) = self.slots.get(&name).map(|s| Arc::clone(&s)) {
                if let Err(e) = slot.channel.start().await {
                    warn!(channel = %name, error = %e, "channel start failed");
                }
            }
        }
    }

    /// Stop every registered channel. Errors are logged, not raised.
    pub async fn stop_all(&self) {
        let order: Vec<String> = self.order.lock().unwrap().clone();
        for name in order {
            if let Some(slot) = self.slots.get(&name).map(|s| Arc::clone(&s)) {
                if let Err(e) = slot.channel.stop().await {
                    warn!(channel = %name, error = %e, "channel stop failed");
                }
            }
        }
    }

    /// Running/available state per channel, sorted by name.
    pub fn statuses(&self) -> Vec<(String, bool, bool)> {
        let mut out: Vec<(String, bool, bool)> = self
            .slots
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.channel.is_running(),
                    entry.available.load(Ordering::Relaxed),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn handle_send_failure(&self, name: String, slot: Arc<ChannelSlot>) {
        let failures = slot.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures > self.max_reconnect {
            slot.available.store(false, Ordering::Relaxed);
            warn!(channel = %name, failures, "channel exceeded reconnect limit, marked unavailable");
            return;
        }

        debug!(channel = %name, failures, "scheduling channel restart");
        tokio::spawn(async move {
            if let Err(e) = slot.channel.stop().await {
                warn!(channel = %name, error = %e, "restart: stop failed");
            }
            match slot.channel.start().await {
                Ok(()) => {
                    slot.failures.store(0, Ordering::Relaxed);
                    slot.available.store(true, Ordering::Relaxed);
                    info!(channel = %name, "channel restarted");
                }
                Err(e) => {
                    warn!(channel = %name, error = %e, "restart: start failed");
                }
            }
        });
    }
}

/// Target a broadcast message at one channel.
///
/// The sentinel `default` chat id — and any chat id from a different
/// originating channel — resolves to the channel's last observed inbound
/// chat. Returns `None` when no chat is known.
fn resolve_for_channel(
    name: &str,
    slot: &ChannelSlot,
    msg: &OutboundMessage,
) -> Option<OutboundMessage> {
    let mut resolved = msg.clone();
    resolved.channel = name.to_string();

    let needs_substitution = msg.channel != name || msg.chat_id == DEFAULT_CHAT_ID;
    if needs_substitution {
        match slot.last_chat_id.lock().unwrap().clone() {
            Some(chat) => resolved.chat_id = chat,
            None => return None,
        }
    }
    Some(resolved)
}
