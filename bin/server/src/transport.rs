//! Transport wiring.
//!
//! The real channel drivers (Signal, Obsidian, web) are external
//! collaborators. Until one is plugged in, every channel is backed by a
//! logging transport that honors the router gate and records the
//! delivery in the process log.

use async_trait::async_trait;
use minder_attention::{Channel, DeliveryContext, OutboundMessage, Transport, TransportError};

/// A transport that logs deliveries instead of sending them.
#[derive(Debug, Default)]
pub struct LoggingTransport {
    channel: &'static str,
}

impl LoggingTransport {
    /// Creates a logging transport for a channel.
    #[must_use]
    pub fn for_channel(channel: Channel) -> Self {
        Self {
            channel: channel.as_str(),
        }
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn send(
        &self,
        ctx: &DeliveryContext,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        ctx.ensure_router_active(&message.source_component, self.channel)?;
        tracing::info!(
            channel = self.channel,
            owner = %message.owner,
            signal_reference = %message.signal_reference,
            body = %message.body,
            "outbound delivery"
        );
        Ok(())
    }
}
