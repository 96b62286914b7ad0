//! In-process bus with MQTT retained-message semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use oee_core::topic::matches_filter;

use crate::publisher::BusClient;
use crate::types::{BusError, BusMessage, OutboundMessage};

#[derive(Default)]
struct Inner {
    retained: HashMap<String, OutboundMessage>,
    published: Vec<OutboundMessage>,
    subscribers: Vec<(Vec<String>, mpsc::UnboundedSender<BusMessage>)>,
    closed: bool,
}

fn any_match(filters: &[String], topic: &str) -> bool {
    filters.iter().any(|f| matches_filter(f, topic))
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to `filter`; retained messages that match are delivered first.
    pub fn subscribe(&self, filter: &str) -> mpsc::UnboundedReceiver<BusMessage> {
        self.subscribe_all(&[filter])
    }

    /// Subscribe to several filters through one receiver. A message matching more
    /// than one of them is delivered once.
    pub fn subscribe_all(&self, filters: &[&str]) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let filters: Vec<String> = filters.iter().map(|f| f.to_string()).collect();
        let mut inner = self.lock();
        let mut retained: Vec<&OutboundMessage> = inner
            .retained
            .values()
            .filter(|m| any_match(&filters, &m.topic))
            .collect();
        retained.sort_by(|a, b| a.topic.cmp(&b.topic));
        for msg in retained {
            let _ = tx.send(msg.to_bus_message());
        }
        inner.subscribers.push((filters, tx));
        rx
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.lock().published.clone()
    }

    pub fn retained(&self, topic: &str) -> Option<OutboundMessage> {
        self.lock().retained.get(topic).cloned()
    }

    /// Refuse further publishes and end every subscription.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn publish(&self, msg: OutboundMessage) -> Result<(), BusError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BusError::Closed);
        }
        if msg.retain {
            // Empty retained payload clears the slot, as on a broker.
            if msg.payload.is_empty() {
                inner.retained.remove(&msg.topic);
            } else {
                inner.retained.insert(msg.topic.clone(), msg.clone());
            }
        }
        let delivered = msg.to_bus_message();
        inner.subscribers.retain(|(filters, tx)| {
            if !any_match(filters, &delivered.topic) {
                return !tx.is_closed();
            }
            tx.send(delivered.clone()).is_ok()
        });
        inner.published.push(msg);
        Ok(())
    }
}
