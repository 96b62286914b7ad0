use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use oee_bus::MqttBus;
use oee_core::topic::SUBSCRIPTIONS;
use oee_ingest::PgStore;
use oee_runtime::metrics::MetricsRegistry;
use oee_runtime::{init_tracing, spawn_metrics_reporter, start_runtime};
use oee_services::cli::IngestorArgs;
use oee_services::ingest;

fn main() -> Result<()> {
    init_tracing();
    let settings = IngestorArgs::parse()
        .into_settings()
        .context("invalid ingestor configuration")?;
    info!(
        broker = %settings.broker.host,
        store = ?settings.store,
        apply_migrations = settings.apply_migrations,
        "ingestor configured"
    );

    start_runtime(settings.workers, |cancel| async move {
        let metrics = MetricsRegistry::default();
        let store = PgStore::connect(&settings.store, settings.apply_migrations, metrics.clone())
            .await
            .context("failed to connect to PostgreSQL")?;
        let store = Arc::new(store);

        let (bus, inbox) = MqttBus::connect(&settings.broker, &SUBSCRIPTIONS)
            .await
            .context("failed to connect to MQTT broker")?;
        info!(filters = ?SUBSCRIPTIONS, "ingestor subscribed");

        let reporter = spawn_metrics_reporter(
            metrics.clone(),
            "ingestion_service",
            settings.metrics_interval,
            cancel.clone(),
        );

        let dispatched = ingest(inbox, store, metrics, cancel.clone()).await;

        bus.disconnect().await;
        // the inbox can close before a signal arrives; stop the reporter either way
        cancel.cancel();
        let _ = reporter.await;
        info!(dispatched, "ingestor stopped");
        Ok(())
    })
}
