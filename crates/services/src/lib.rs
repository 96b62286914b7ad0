//! Wiring for the `iot_simulator` and `ingestion_service` binaries.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use oee_bus::Inbox;
use oee_core::config::SimulatorConfig;
use oee_core::EventSink;
use oee_ingest::{run_consumer, EventStore, IngestRouter};
use oee_runtime::metrics::MetricsRegistry;
use oee_simulator::spawn_fleet;

pub mod cli;

/// Run every configured machine against `sink` until `cancel` fires.
pub async fn simulate(
    cfg: &SimulatorConfig,
    sink: Arc<dyn EventSink>,
    metrics: MetricsRegistry,
    cancel: CancellationToken,
) -> Result<()> {
    info!("starting IoT simulator for {} machines", cfg.machine_ids.len());
    let mut fleet = spawn_fleet(cfg, sink, metrics, cancel);
    while let Some(done) = fleet.join_next().await {
        match done {
            Ok(machine_id) => info!(machine_id, "machine loop finished"),
            Err(e) => error!("machine task failed: {e}"),
        }
    }
    Ok(())
}

/// Route inbound messages into `store` until the inbox closes or `cancel` fires.
pub async fn ingest<I, S>(
    inbox: I,
    store: Arc<S>,
    metrics: MetricsRegistry,
    cancel: CancellationToken,
) -> usize
where
    I: Inbox,
    S: EventStore + ?Sized + 'static,
{
    let router = Arc::new(IngestRouter::new(store, metrics));
    run_consumer(inbox, router, cancel).await
}
