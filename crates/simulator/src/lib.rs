//! Per-machine stochastic simulation of status and production events.

pub mod machine;
pub mod runner;

pub use machine::{machine_rng, CycleOutcome, Emission, Emit, MachineSimulator};
pub use runner::{run_machine, spawn_fleet};
