//! Transport-level types shared by every bus implementation.

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::mpsc;

use oee_core::CoreError;

/// A message as received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
    pub qos: QoS,
}

impl OutboundMessage {
    pub fn to_bus_message(&self) -> BusMessage {
        BusMessage { topic: self.topic.clone(), payload: self.payload.clone() }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[from] rumqttc::ConnectionError),
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("bus is closed")]
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] CoreError),
    #[error("failed to publish to '{topic}': {source}")]
    Bus {
        topic: String,
        #[source]
        source: BusError,
    },
}

/// The receiving half of a subscription.
#[async_trait]
pub trait Inbox: Send {
    /// `None` once the bus side has gone away.
    async fn recv(&mut self) -> Option<BusMessage>;
}

#[async_trait]
impl Inbox for mpsc::Receiver<BusMessage> {
    async fn recv(&mut self) -> Option<BusMessage> {
        mpsc::Receiver::recv(self).await
    }
}

#[async_trait]
impl Inbox for mpsc::UnboundedReceiver<BusMessage> {
    async fn recv(&mut self) -> Option<BusMessage> {
        mpsc::UnboundedReceiver::recv(self).await
    }
}
