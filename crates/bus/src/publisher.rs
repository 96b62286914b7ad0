use async_trait::async_trait;
use rumqttc::QoS;
use tracing::debug;

use oee_core::{EventSink, MachineEvent};

use crate::types::{BusError, OutboundMessage, PublishError};

/// Anything that can hand one message to the bus.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish(&self, msg: OutboundMessage) -> Result<(), BusError>;
}

/// Serializes events and sends them at-least-once with the retain flag set, so a
/// late subscriber sees the newest event per topic.
pub struct Publisher<C> {
    client: C,
}

impl<C: BusClient> Publisher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn outbound(event: &MachineEvent) -> Result<OutboundMessage, PublishError> {
        Ok(OutboundMessage {
            topic: event.topic().to_string(),
            payload: event.to_payload()?,
            retain: true,
            qos: QoS::AtLeastOnce,
        })
    }

    /// Delivers a single event. Failures are returned to the caller, never retried.
    pub async fn publish(&self, event: &MachineEvent) -> Result<(), PublishError> {
        let msg = Self::outbound(event)?;
        let topic = msg.topic.clone();
        debug!(%topic, bytes = msg.payload.len(), "publishing");
        self.client
            .publish(msg)
            .await
            .map_err(|source| PublishError::Bus { topic, source })
    }
}

#[async_trait]
impl<C: BusClient> EventSink for Publisher<C> {
    async fn emit(&self, event: MachineEvent) -> anyhow::Result<()> {
        self.publish(&event).await?;
        Ok(())
    }
}
