use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use oee_bus::{MqttBus, Publisher};
use oee_runtime::metrics::MetricsRegistry;
use oee_runtime::{init_tracing, spawn_metrics_reporter, start_runtime};
use oee_services::cli::SimulatorArgs;
use oee_services::simulate;

fn main() -> Result<()> {
    init_tracing();
    let settings = SimulatorArgs::parse()
        .into_settings()
        .context("invalid simulator configuration")?;
    info!(
        broker = %settings.broker.host,
        port = settings.broker.port,
        machines = ?settings.simulator.machine_ids,
        seed = ?settings.simulator.seed,
        "simulator configured"
    );

    start_runtime(settings.workers, |cancel| async move {
        let (bus, inbox) = MqttBus::connect(&settings.broker, &[])
            .await
            .context("failed to connect to MQTT broker")?;
        drop(inbox);
        let publisher = Arc::new(Publisher::new(bus));

        let metrics = MetricsRegistry::default();
        let reporter = spawn_metrics_reporter(
            metrics.clone(),
            "iot_simulator",
            settings.metrics_interval,
            cancel.clone(),
        );

        simulate(&settings.simulator, publisher.clone(), metrics, cancel).await?;

        publisher.client().disconnect().await;
        let _ = reporter.await;
        info!("simulator stopped");
        Ok(())
    })
}
