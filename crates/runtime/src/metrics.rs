use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    status_events: AtomicU64,
    production_events: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    rows_inserted: AtomicU64,
    messages_discarded: AtomicU64,
    store_failures: AtomicU64,
    machine_id_mismatches: AtomicU64,
    store_reconnects: AtomicU64,
}

impl MetricsRegistry {
    pub fn inc_status_events(&self, delta: u64) {
        self.inner.status_events.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_production_events(&self, delta: u64) {
        self.inner.production_events.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_publish_failures(&self, delta: u64) {
        self.inner.publish_failures.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_messages_received(&self, delta: u64) {
        self.inner.messages_received.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_rows_inserted(&self, delta: u64) {
        self.inner.rows_inserted.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_messages_discarded(&self, delta: u64) {
        self.inner.messages_discarded.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_store_failures(&self, delta: u64) {
        self.inner.store_failures.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_machine_id_mismatches(&self, delta: u64) {
        self.inner.machine_id_mismatches.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_store_reconnects(&self, delta: u64) {
        self.inner.store_reconnects.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            status_events: self.inner.status_events.load(Ordering::Relaxed),
            production_events: self.inner.production_events.load(Ordering::Relaxed),
            publish_failures: self.inner.publish_failures.load(Ordering::Relaxed),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
            rows_inserted: self.inner.rows_inserted.load(Ordering::Relaxed),
            messages_discarded: self.inner.messages_discarded.load(Ordering::Relaxed),
            store_failures: self.inner.store_failures.load(Ordering::Relaxed),
            machine_id_mismatches: self.inner.machine_id_mismatches.load(Ordering::Relaxed),
            store_reconnects: self.inner.store_reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub status_events: u64,
    pub production_events: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub rows_inserted: u64,
    pub messages_discarded: u64,
    pub store_failures: u64,
    pub machine_id_mismatches: u64,
    pub store_reconnects: u64,
}

impl MetricsSnapshot {
    pub fn to_json_line(&self, label: &str, elapsed: Option<Duration>) -> String {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            label: &'a str,
            #[serde(flatten)]
            counters: &'a MetricsSnapshot,
            elapsed_ms: Option<u128>,
        }

        let payload = Snapshot {
            label,
            counters: self,
            elapsed_ms: elapsed.map(|d| d.as_millis()),
        };
        serde_json::to_string(&payload).unwrap_or_else(|_| String::from("{}"))
    }
}

pub struct Uptime {
    start: Instant,
}

impl Uptime {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
