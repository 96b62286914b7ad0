use async_trait::async_trait;

use crate::events::MachineEvent;

/// Where simulated machines deliver their events.
///
/// An `Err` is a per-event failure; the emitting machine logs it and carries on.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: MachineEvent) -> anyhow::Result<()>;
}
