use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use oee_core::config::SimulatorConfig;
use oee_core::{EventSink, MachineEvent, MachineId, MachineStatus, ProductionEvent, StatusEvent};
use oee_runtime::metrics::MetricsRegistry;

use crate::machine::{machine_rng, CycleOutcome, Emit, MachineSimulator};

fn stamp(machine_id: MachineId, emit: Emit, now: DateTime<Utc>) -> MachineEvent {
    match emit {
        Emit::Status(status) => StatusEvent { machine_id, status, timestamp: now }.into(),
        Emit::Production(CycleOutcome::Good) => ProductionEvent::good(machine_id, now).into(),
        Emit::Production(CycleOutcome::Scrap) => ProductionEvent::scrap(machine_id, now).into(),
    }
}

/// Drive one machine until `cancel` fires.
///
/// Publish failures are counted and logged; they never end the loop.
pub async fn run_machine<R, S>(
    sim: MachineSimulator<R>,
    sink: &S,
    metrics: &MetricsRegistry,
    cancel: &CancellationToken,
) where
    R: Rng + Send,
    S: EventSink + ?Sized,
{
    let machine_id = sim.id();
    info!(machine_id, "machine simulation started");

    for emission in sim {
        if emission.emit == Emit::Status(MachineStatus::Running) && !emission.after.is_zero() {
            info!(machine_id, downtime = ?emission.after, "machine is down");
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(emission.after) => {}
        }

        let event = stamp(machine_id, emission.emit, Utc::now());
        match &event {
            MachineEvent::Status(e) => {
                metrics.inc_status_events(1);
                info!(machine_id, status = %e.status, "status change");
            }
            MachineEvent::Production(_) => metrics.inc_production_events(1),
        }

        let kind = event.kind();
        let published = tokio::select! {
            _ = cancel.cancelled() => break,
            res = sink.emit(event) => res,
        };
        match published {
            Ok(()) => debug!(machine_id, %kind, "event published"),
            Err(e) => {
                metrics.inc_publish_failures(1);
                warn!(machine_id, %kind, "failed to publish event: {e:#}");
            }
        }
    }

    info!(machine_id, "machine simulation stopped");
}

/// Spawn one task per configured machine, each with its own generator.
pub fn spawn_fleet(
    cfg: &SimulatorConfig,
    sink: Arc<dyn EventSink>,
    metrics: MetricsRegistry,
    cancel: CancellationToken,
) -> JoinSet<MachineId> {
    let mut fleet = JoinSet::new();
    for &id in &cfg.machine_ids {
        let sim = MachineSimulator::new(id, cfg.profile, machine_rng(cfg.seed, id));
        let sink = sink.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        fleet.spawn(async move {
            run_machine(sim, sink.as_ref(), &metrics, &cancel).await;
            id
        });
    }
    fleet
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use oee_core::config::MachineProfile;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<MachineEvent>>,
    }

    #[async_trait]
    impl EventSink for Recorder {
        async fn emit(&self, event: MachineEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Refuses {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for Refuses {
        async fn emit(&self, _event: MachineEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("broker unavailable")
        }
    }

    fn steady() -> MachineProfile {
        MachineProfile {
            scrap_rate: 0.0,
            downtime_chance: 0.0,
            performance_loss_chance: 0.0,
            ..MachineProfile::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_on_cycle_boundaries() {
        let sink = Arc::new(Recorder::default());
        let metrics = MetricsRegistry::default();
        let cancel = CancellationToken::new();
        let sim = MachineSimulator::new(4, steady(), ChaCha8Rng::seed_from_u64(1));

        let task = {
            let (sink, metrics, cancel) = (sink.clone(), metrics.clone(), cancel.clone());
            tokio::spawn(async move { run_machine(sim, sink.as_ref(), &metrics, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        cancel.cancel();
        task.await.unwrap();

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            MachineEvent::Status(StatusEvent { machine_id: 4, status: MachineStatus::Running, .. })
        ));
        for event in &events[1..] {
            let MachineEvent::Production(p) = event else { panic!("expected production") };
            assert_eq!((p.machine_id, p.parts_produced, p.parts_scrapped), (4, 1, 0));
        }
        let snap = metrics.snapshot();
        assert_eq!((snap.status_events, snap.production_events), (1, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failures_do_not_stop_the_machine() {
        let sink = Arc::new(Refuses::default());
        let metrics = MetricsRegistry::default();
        let cancel = CancellationToken::new();
        let sim = MachineSimulator::new(1, steady(), ChaCha8Rng::seed_from_u64(1));

        let task = {
            let (sink, metrics, cancel) = (sink.clone(), metrics.clone(), cancel.clone());
            tokio::spawn(async move { run_machine(sim, sink.as_ref(), &metrics, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
        assert_eq!(metrics.snapshot().publish_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fleet_runs_every_machine_until_cancelled() {
        let cfg = SimulatorConfig {
            machine_ids: vec![1, 2, 3],
            profile: MachineProfile { downtime_chance: 0.3, ..MachineProfile::default() },
            seed: Some(99),
        };
        let sink = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let mut fleet = spawn_fleet(&cfg, sink.clone(), MetricsRegistry::default(), cancel.clone());

        tokio::time::sleep(Duration::from_secs(600)).await;
        cancel.cancel();
        let mut finished = Vec::new();
        while let Some(id) = fleet.join_next().await {
            finished.push(id.unwrap());
        }
        finished.sort();
        assert_eq!(finished, vec![1, 2, 3]);

        let events = sink.events.lock().unwrap().clone();
        for id in 1..=3 {
            let statuses: Vec<MachineStatus> = events
                .iter()
                .filter_map(|e| match e {
                    MachineEvent::Status(s) if s.machine_id == id => Some(s.status),
                    _ => None,
                })
                .collect();
            assert_eq!(statuses.first(), Some(&MachineStatus::Running));
            assert!(statuses.windows(2).all(|w| w[0] != w[1]), "machine {id}: {statuses:?}");
        }
    }
}
