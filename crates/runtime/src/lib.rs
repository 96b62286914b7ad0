//! Runtime bootstrap: tracing, the tokio runtime and process lifetime.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::metrics::{MetricsRegistry, Uptime};

pub mod metrics;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build a multi-threaded tokio runtime and block on `f` until it returns.
///
/// `f` receives the root cancellation token; Ctrl-C cancels it.
pub fn start_runtime<F, Fut>(workers: Option<usize>, f: F) -> Result<()>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = workers {
        builder.worker_threads(workers.max(1));
    }
    let runtime = builder
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    info!(workers = ?workers, "starting tokio runtime");
    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        tokio::spawn(shutdown_signal(cancel.clone()));
        f(cancel).await
    })
}

/// Cancel `cancel` on Ctrl-C.
pub async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Ctrl+C received, shutting down"),
                Err(e) => warn!("failed to listen for Ctrl+C: {e}"),
            }
            cancel.cancel();
        }
    }
}

/// Log a metrics snapshot every `every` until cancelled.
pub fn spawn_metrics_reporter(
    metrics: MetricsRegistry,
    label: &'static str,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let uptime = Uptime::start();
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let line = metrics.snapshot().to_json_line(label, Some(uptime.elapsed()));
                    info!(target: "metrics", "{line}");
                }
            }
        }
        let line = metrics.snapshot().to_json_line(label, Some(uptime.elapsed()));
        info!(target: "metrics", "final {line}");
    })
}
