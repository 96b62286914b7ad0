use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use oee_bus::BusMessage;
use oee_core::topic::TopicError;
use oee_core::{EventKind, MachineId, ProductionEvent, StatusEvent, Topic};
use oee_runtime::metrics::MetricsRegistry;

use crate::payload::{effective_timestamp, ProductionPayload, StatusPayload};
use crate::store::{EventStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Status(StatusEvent),
    Production(ProductionEvent),
}

/// Why a message was dropped. Every variant is local to one message.
#[derive(thiserror::Error, Debug)]
pub enum Discard {
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error("failed to decode {kind} payload: {source}")]
    Decode {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EventKind, reason: String },
    #[error("failed to store {kind} event: {source}")]
    Store {
        kind: EventKind,
        #[source]
        source: StoreError,
    },
}

pub struct IngestRouter<S: ?Sized> {
    store: Arc<S>,
    metrics: MetricsRegistry,
}

impl<S: EventStore + ?Sized> IngestRouter<S> {
    pub fn new(store: Arc<S>, metrics: MetricsRegistry) -> Self {
        Self { store, metrics }
    }

    /// Route one message to its table.
    ///
    /// The topic decides the table. The payload's own `machine_id` is stored when
    /// present; the topic id only fills in for a payload without one.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<Ingested, Discard> {
        let route = Topic::parse(topic)?;
        match route.kind {
            EventKind::Status => {
                let p: StatusPayload = decode(route.kind, payload)?;
                let event = StatusEvent {
                    machine_id: self.machine_id(&route, p.machine_id),
                    status: p.status,
                    timestamp: effective_timestamp(p.timestamp, Utc::now()),
                };
                self.store
                    .insert_status(&event)
                    .await
                    .map_err(|source| Discard::Store { kind: route.kind, source })?;
                Ok(Ingested::Status(event))
            }
            EventKind::Production => {
                let p: ProductionPayload = decode(route.kind, payload)?;
                if p.parts_produced < 0 || p.parts_scrapped < 0 {
                    return Err(Discard::InvalidPayload {
                        kind: route.kind,
                        reason: format!(
                            "negative part count (produced {}, scrapped {})",
                            p.parts_produced, p.parts_scrapped
                        ),
                    });
                }
                let event = ProductionEvent {
                    machine_id: self.machine_id(&route, p.machine_id),
                    parts_produced: p.parts_produced,
                    parts_scrapped: p.parts_scrapped,
                    timestamp: effective_timestamp(p.timestamp, Utc::now()),
                };
                self.store
                    .insert_production(&event)
                    .await
                    .map_err(|source| Discard::Store { kind: route.kind, source })?;
                Ok(Ingested::Production(event))
            }
        }
    }

    /// Handle one bus message, logging and counting the outcome.
    pub async fn process(&self, msg: BusMessage) {
        self.metrics.inc_messages_received(1);
        match self.handle(&msg.topic, &msg.payload).await {
            Ok(_) => {
                self.metrics.inc_rows_inserted(1);
                debug!(topic = %msg.topic, "event stored");
            }
            Err(Discard::Store { kind, source }) => {
                self.metrics.inc_store_failures(1);
                self.metrics.inc_messages_discarded(1);
                error!(topic = %msg.topic, %kind, "failed to insert event: {source}");
            }
            Err(e) => {
                self.metrics.inc_messages_discarded(1);
                warn!(topic = %msg.topic, "discarding message: {e}");
            }
        }
    }

    fn machine_id(&self, route: &Topic, payload_id: Option<MachineId>) -> MachineId {
        match payload_id {
            Some(id) if id != route.machine_id => {
                self.metrics.inc_machine_id_mismatches(1);
                warn!(
                    topic_machine_id = route.machine_id,
                    payload_machine_id = id,
                    "payload machine id differs from topic, storing payload value"
                );
                id
            }
            Some(id) => id,
            None => route.machine_id,
        }
    }
}

fn decode<T: DeserializeOwned>(kind: EventKind, payload: &[u8]) -> Result<T, Discard> {
    serde_json::from_slice(payload).map_err(|source| Discard::Decode { kind, source })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use oee_core::MachineStatus;

    use super::*;
    use crate::store::MemoryStore;

    fn router() -> (IngestRouter<MemoryStore>, Arc<MemoryStore>, MetricsRegistry) {
        let store = Arc::new(MemoryStore::new());
        let metrics = MetricsRegistry::default();
        (IngestRouter::new(store.clone(), metrics.clone()), store, metrics)
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn stores_status_row() {
        let (router, store, _) = router();
        router
            .handle(
                "factory/machine/7/status",
                br#"{"machine_id":7,"status":"running","timestamp":"2024-01-01T00:00:00Z"}"#,
            )
            .await
            .unwrap();

        assert_eq!(
            store.status_rows(),
            vec![StatusEvent {
                machine_id: 7,
                status: MachineStatus::Running,
                timestamp: ts("2024-01-01T00:00:00Z"),
            }]
        );
        assert!(store.production_rows().is_empty());
    }

    #[tokio::test]
    async fn stores_production_row() {
        let (router, store, _) = router();
        let stored = router
            .handle(
                "factory/machine/3/production",
                br#"{"machine_id":3,"parts_produced":1,"parts_scrapped":0,"timestamp":"2024-01-01T00:00:03Z"}"#,
            )
            .await
            .unwrap();

        let expected = ProductionEvent {
            machine_id: 3,
            parts_produced: 1,
            parts_scrapped: 0,
            timestamp: ts("2024-01-01T00:00:03Z"),
        };
        assert_eq!(stored, Ingested::Production(expected.clone()));
        assert_eq!(store.production_rows(), vec![expected]);
    }

    #[tokio::test]
    async fn missing_scrap_count_is_stored_as_zero() {
        let (router, store, _) = router();
        router
            .handle(
                "factory/machine/3/production",
                br#"{"machine_id":3,"parts_produced":1,"timestamp":"2024-01-01T00:00:03Z"}"#,
            )
            .await
            .unwrap();

        assert_eq!(
            store.production_rows(),
            vec![ProductionEvent::good(3, ts("2024-01-01T00:00:03Z"))]
        );
    }

    #[tokio::test]
    async fn malformed_topics_write_nothing() {
        let (router, store, metrics) = router();
        let payload = br#"{"machine_id":3,"parts_produced":1,"parts_scrapped":0}"#;
        for topic in ["factory/widget/3/production", "factory/machine/3"] {
            let err = router.handle(topic, payload).await.unwrap_err();
            assert!(matches!(err, Discard::Topic(TopicError::Malformed(_))), "{topic}: {err}");
            router
                .process(BusMessage { topic: topic.to_string(), payload: payload.to_vec() })
                .await;
        }
        assert!(store.production_rows().is_empty() && store.status_rows().is_empty());
        assert_eq!(metrics.snapshot().messages_discarded, 2);
    }

    #[tokio::test]
    async fn unknown_kind_is_unhandled() {
        let (router, store, _) = router();
        let err = router
            .handle("factory/machine/9/unknown_kind", br#"{"machine_id":9}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unhandled event kind"));
        assert!(store.status_rows().is_empty() && store.production_rows().is_empty());
    }

    #[tokio::test]
    async fn missing_timestamp_uses_receive_time() {
        let (router, store, _) = router();
        let before = Utc::now();
        router
            .handle("factory/machine/2/status", br#"{"machine_id":2,"status":"stopped"}"#)
            .await
            .unwrap();
        let after = Utc::now();

        let rows = store.status_rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].timestamp >= before && rows[0].timestamp <= after);
        assert!(after - rows[0].timestamp < Duration::seconds(5));
    }

    #[tokio::test]
    async fn zero_timestamp_uses_receive_time() {
        let (router, store, _) = router();
        router
            .handle(
                "factory/machine/2/production",
                br#"{"machine_id":2,"parts_produced":0,"parts_scrapped":1,"timestamp":"0001-01-01T00:00:00Z"}"#,
            )
            .await
            .unwrap();
        let rows = store.production_rows();
        assert!(rows[0].timestamp.timestamp() > 0);
    }

    #[tokio::test]
    async fn undecodable_payloads_are_discarded() {
        let (router, store, _) = router();
        for (topic, payload) in [
            ("factory/machine/1/status", &b"not json"[..]),
            ("factory/machine/1/status", &br#"{"status":"exploded"}"#[..]),
            ("factory/machine/1/production", &br#"{"parts_produced":"one"}"#[..]),
        ] {
            let err = router.handle(topic, payload).await.unwrap_err();
            assert!(matches!(err, Discard::Decode { .. }), "{err}");
        }
        let err = router
            .handle(
                "factory/machine/1/production",
                br#"{"parts_produced":-1,"parts_scrapped":0}"#,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Discard::InvalidPayload { .. }));
        assert!(store.status_rows().is_empty() && store.production_rows().is_empty());
    }

    #[tokio::test]
    async fn payload_machine_id_wins_and_topic_fills_gaps() {
        let (router, store, metrics) = router();
        router
            .handle("factory/machine/5/status", br#"{"machine_id":6,"status":"running"}"#)
            .await
            .unwrap();
        router
            .handle("factory/machine/5/status", br#"{"status":"stopped"}"#)
            .await
            .unwrap();

        let ids: Vec<MachineId> = store.status_rows().iter().map(|r| r.machine_id).collect();
        assert_eq!(ids, vec![6, 5]);
        assert_eq!(metrics.snapshot().machine_id_mismatches, 1);
    }

    #[tokio::test]
    async fn store_failure_does_not_stop_later_messages() {
        let (router, store, metrics) = router();
        let msg = |status: &str| BusMessage {
            topic: "factory/machine/1/status".to_string(),
            payload: format!(r#"{{"machine_id":1,"status":"{status}"}}"#).into_bytes(),
        };

        store.set_failing(true);
        router.process(msg("running")).await;
        store.set_failing(false);
        router.process(msg("stopped")).await;

        assert_eq!(store.status_rows().len(), 1);
        let snap = metrics.snapshot();
        assert_eq!(
            (snap.messages_received, snap.rows_inserted, snap.store_failures),
            (2, 1, 1)
        );
    }

    #[tokio::test]
    async fn duplicates_are_stored_twice() {
        let (router, store, _) = router();
        let payload = br#"{"machine_id":1,"parts_produced":1,"parts_scrapped":0,"timestamp":"2024-01-01T00:00:03Z"}"#;
        for _ in 0..2 {
            router.handle("factory/machine/1/production", payload).await.unwrap();
        }
        assert_eq!(store.production_rows().len(), 2);
    }
}
