//! Message bus plumbing: the event publisher, an MQTT client and an in-process bus.

pub mod memory;
pub mod mqtt;
pub mod publisher;
pub mod types;

pub use memory::MemoryBus;
pub use mqtt::MqttBus;
pub use publisher::{BusClient, Publisher};
pub use rumqttc::QoS;
pub use types::{BusError, BusMessage, Inbox, OutboundMessage, PublishError};
