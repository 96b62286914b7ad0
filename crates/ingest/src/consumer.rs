use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use oee_bus::Inbox;

use crate::router::IngestRouter;
use crate::store::EventStore;

/// Read the inbox until cancelled or closed, handling each message on its own task.
///
/// Messages already taken off the inbox are drained before returning. Returns the
/// number of messages dispatched.
pub async fn run_consumer<I, S>(
    mut inbox: I,
    router: Arc<IngestRouter<S>>,
    cancel: CancellationToken,
) -> usize
where
    I: Inbox,
    S: EventStore + ?Sized + 'static,
{
    let mut in_flight = JoinSet::new();
    let mut dispatched = 0usize;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("ingestion cancelled");
                break;
            }
            msg = inbox.recv() => match msg {
                Some(msg) => {
                    dispatched += 1;
                    let router = router.clone();
                    in_flight.spawn(async move { router.process(msg).await });
                }
                None => {
                    info!("bus inbox closed");
                    break;
                }
            },
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    error!("ingest task failed: {e}");
                }
            }
        }
    }

    info!(pending = in_flight.len(), "draining in-flight messages");
    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            error!("ingest task failed: {e}");
        }
    }
    dispatched
}
