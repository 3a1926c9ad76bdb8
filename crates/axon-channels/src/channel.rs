use async_trait::async_trait;

use axon_core::types::OutboundMessage;

use crate::error::ChannelError;

/// Common interface implemented by every channel adapter (IM bridge,
/// terminal, web client, …).
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelGateway`](crate::gateway::ChannelGateway) and driven from
/// multiple Tokio tasks. Adapters publish the messages they receive to the
/// runtime bus themselves; the gateway only drives the outbound side.
///
/// `start`/`stop` take `&self`: adapters keep their connection state behind
/// interior mutability so the gateway can restart them from shared handles.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    ///
    /// Used as the registry key; must be unique across registered adapters.
    fn name(&self) -> &str;

    /// Whether the channel is currently connected and able to send.
    fn is_running(&self) -> bool;

    /// Establish the connection to the external service and begin
    /// publishing inbound messages to the bus.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message.
    ///
    /// `&self` so a connected adapter can send concurrently.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;
}
