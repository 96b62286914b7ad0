use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use oee_core::config::MachineProfile;
use oee_core::{MachineId, MachineStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Good,
    Scrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Status(MachineStatus),
    Production(CycleOutcome),
}

/// One outbound event, due `after` the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub after: Duration,
    pub emit: Emit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// A single machine's two-state process.
///
/// Iterating never ends and cannot be rewound; every call to `next` advances the
/// machine by exactly one event. Timing is left to the caller.
pub struct MachineSimulator<R> {
    id: MachineId,
    profile: MachineProfile,
    rng: R,
    phase: Phase,
    state: MachineStatus,
}

impl<R: Rng> MachineSimulator<R> {
    /// `profile` must have passed validation; draw ranges are not re-checked here.
    pub fn new(id: MachineId, profile: MachineProfile, rng: R) -> Self {
        Self {
            id,
            profile,
            rng,
            phase: Phase::Starting,
            state: MachineStatus::Running,
        }
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn state(&self) -> MachineStatus {
        self.state
    }

    fn cycle_time(&mut self) -> Duration {
        let mut cycle = self.profile.ideal_cycle_time;
        if self.rng.gen_bool(self.profile.performance_loss_chance) {
            cycle += self
                .rng
                .gen_range(Duration::ZERO..self.profile.performance_loss_max_delay);
        }
        cycle
    }

    fn run_cycle(&mut self) -> Emission {
        let after = self.cycle_time();
        let outcome = if self.rng.gen_bool(self.profile.scrap_rate) {
            CycleOutcome::Scrap
        } else {
            CycleOutcome::Good
        };
        if self.rng.gen_bool(self.profile.downtime_chance) {
            self.phase = Phase::Stopping;
        }
        Emission { after, emit: Emit::Production(outcome) }
    }

    fn recover(&mut self) -> Emission {
        let after = self
            .rng
            .gen_range(self.profile.downtime_min..self.profile.downtime_max);
        self.phase = Phase::Running;
        self.state = MachineStatus::Running;
        Emission { after, emit: Emit::Status(MachineStatus::Running) }
    }
}

impl<R: Rng> Iterator for MachineSimulator<R> {
    type Item = Emission;

    fn next(&mut self) -> Option<Emission> {
        let emission = match self.phase {
            Phase::Starting => {
                self.phase = Phase::Running;
                Emission { after: Duration::ZERO, emit: Emit::Status(MachineStatus::Running) }
            }
            Phase::Running => self.run_cycle(),
            Phase::Stopping => {
                self.phase = Phase::Stopped;
                self.state = MachineStatus::Stopped;
                Emission { after: Duration::ZERO, emit: Emit::Status(MachineStatus::Stopped) }
            }
            Phase::Stopped => self.recover(),
        };
        Some(emission)
    }
}

/// Independent generator for one machine. A fixed `seed` makes the fleet reproducible
/// while still giving each machine its own stream.
pub fn machine_rng(seed: Option<u64>, id: MachineId) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            let mix = (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            ChaCha8Rng::seed_from_u64(seed ^ mix)
        }
        None => ChaCha8Rng::from_entropy(),
    }
}
