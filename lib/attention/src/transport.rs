//! Transport drivers behind the router gate.
//!
//! Transports deliver on one channel each and refuse any delivery
//! context without the router-active flag. The actual drivers (Signal,
//! Obsidian, web) live with the external collaborators; this crate
//! defines the trait and a recording implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::Channel;
use crate::error::TransportError;
use crate::gate::DeliveryContext;

/// One message handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// The channel to deliver on.
    pub channel: Channel,
    /// The owner the message is for.
    pub owner: String,
    /// Stable reference of the signal.
    pub signal_reference: String,
    /// The component that produced the message.
    pub source_component: String,
    /// Sending identity, when the channel needs one.
    pub from: Option<String>,
    /// Receiving identity, when the channel needs one.
    pub to: Option<String>,
    /// Message body.
    pub body: String,
}

/// A delivery driver for one channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers a message.
    ///
    /// Implementations must call
    /// [`DeliveryContext::ensure_router_active`] before any side effect.
    ///
    /// # Errors
    ///
    /// Returns a `router_violation` outside the router and a provider
    /// error when delivery fails.
    async fn send(
        &self,
        ctx: &DeliveryContext,
        message: &OutboundMessage,
    ) -> Result<(), TransportError>;
}

/// Maps channels to their transports.
#[derive(Default, Clone)]
pub struct TransportRegistry {
    transports: HashMap<Channel, Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport for a channel.
    #[must_use]
    pub fn with_transport(mut self, channel: Channel, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(channel, transport);
        self
    }

    /// Returns the transport for a channel.
    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<Arc<dyn Transport>> {
        self.transports.get(&channel).cloned()
    }
}

/// A transport that records sends, for tests and embedded use.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingTransport {
    /// Creates an empty recording transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next send fail with the given reason.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(reason.into());
    }

    /// Returns the messages sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        ctx: &DeliveryContext,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        ctx.ensure_router_active(&message.source_component, message.channel.as_str())?;
        if let Some(reason) = self.fail_next.lock().unwrap().take() {
            return Err(TransportError::SendFailed { reason });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ViolationRecorder;

    fn message() -> OutboundMessage {
        OutboundMessage {
            channel: Channel::Signal,
            owner: "marion".to_string(),
            signal_reference: "status:42".to_string(),
            source_component: "status_reporter".to_string(),
            from: Some("+31600000001".to_string()),
            to: Some("+31600000002".to_string()),
            body: "Heads up".to_string(),
        }
    }

    #[tokio::test]
    async fn send_requires_router_context() {
        let recorder = ViolationRecorder::new();
        let transport = RecordingTransport::new();

        let err = transport
            .send(&DeliveryContext::bare(recorder.clone()), &message())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::RouterViolation { .. }));
        assert!(transport.sent().is_empty());
        assert_eq!(recorder.list().len(), 1);

        transport
            .send(&DeliveryContext::router_scoped(recorder), &message())
            .await
            .expect("send inside router");
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn registry_lookup() {
        let transport = Arc::new(RecordingTransport::new());
        let registry =
            TransportRegistry::new().with_transport(Channel::Signal, transport.clone());
        assert!(registry.get(Channel::Signal).is_some());
        assert!(registry.get(Channel::Web).is_none());
    }
}
