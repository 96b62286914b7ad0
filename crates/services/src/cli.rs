//! Command-line and environment configuration. Every flag can also be set through
//! the environment variable named next to it.

use std::time::Duration;

use clap::Parser;

use oee_core::config::{BrokerConfig, ConfigError, MachineProfile, SimulatorConfig, StoreConfig};
use oee_core::MachineId;

fn parse_machine_id(s: &str) -> Result<MachineId, String> {
    s.trim()
        .parse::<MachineId>()
        .map_err(|e| format!("invalid machine id '{s}': {e}"))
}

/// Non-negative seconds, fractions allowed.
fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.trim().parse().map_err(|e| format!("invalid seconds '{s}': {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds '{s}': {e}"))
}

fn interval(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Zero("metrics_interval"));
    }
    Ok(Duration::from_secs(secs))
}

#[derive(Parser, Debug, Clone)]
#[command(name = "iot_simulator", about = "Simulate machines and publish their telemetry over MQTT")]
pub struct SimulatorArgs {
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "tcp://localhost:1883")]
    pub broker_url: String,
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "oee-simulator")]
    pub client_id: String,

    /// Comma-separated machine ids
    #[arg(long, env = "MACHINE_IDS", value_delimiter = ',', value_parser = parse_machine_id, default_value = "1,2,3")]
    pub machine_ids: Vec<MachineId>,

    /// Seconds per cycle without performance loss
    #[arg(long, env = "IDEAL_CYCLE_TIME", value_parser = parse_secs, default_value = "3")]
    pub ideal_cycle_time: Duration,
    #[arg(long, env = "SCRAP_RATE", default_value_t = 0.05)]
    pub scrap_rate: f64,
    #[arg(long, env = "DOWNTIME_CHANCE", default_value_t = 0.1)]
    pub downtime_chance: f64,
    #[arg(long, env = "DOWNTIME_MIN", value_parser = parse_secs, default_value = "10")]
    pub downtime_min: Duration,
    #[arg(long, env = "DOWNTIME_MAX", value_parser = parse_secs, default_value = "30")]
    pub downtime_max: Duration,
    #[arg(long, env = "PERFORMANCE_LOSS_CHANCE", default_value_t = 0.20)]
    pub performance_loss_chance: f64,
    #[arg(long, env = "PERFORMANCE_LOSS_MAX_DELAY", value_parser = parse_secs, default_value = "2")]
    pub performance_loss_max_delay: Duration,

    /// Fixed seed for reproducible runs
    #[arg(long, env = "SIM_SEED")]
    pub seed: Option<u64>,
    /// Seconds between metrics log lines
    #[arg(long, env = "METRICS_INTERVAL", default_value_t = 60)]
    pub metrics_interval: u64,
    #[arg(long, env = "WORKER_THREADS")]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub simulator: SimulatorConfig,
    pub broker: BrokerConfig,
    pub metrics_interval: Duration,
    pub workers: Option<usize>,
}

impl SimulatorArgs {
    pub fn into_settings(self) -> Result<SimulatorSettings, ConfigError> {
        let simulator = SimulatorConfig {
            machine_ids: self.machine_ids,
            profile: MachineProfile {
                ideal_cycle_time: self.ideal_cycle_time,
                scrap_rate: self.scrap_rate,
                downtime_chance: self.downtime_chance,
                downtime_min: self.downtime_min,
                downtime_max: self.downtime_max,
                performance_loss_chance: self.performance_loss_chance,
                performance_loss_max_delay: self.performance_loss_max_delay,
            },
            seed: self.seed,
        };
        simulator.validate()?;
        Ok(SimulatorSettings {
            simulator,
            broker: BrokerConfig::from_url(&self.broker_url, &self.client_id)?,
            metrics_interval: interval(self.metrics_interval)?,
            workers: self.workers,
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ingestion_service", about = "Persist factory telemetry from MQTT into PostgreSQL")]
pub struct IngestorArgs {
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "tcp://localhost:1883")]
    pub broker_url: String,
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "oee-ingestor")]
    pub client_id: String,

    #[arg(long, env = "PG_HOST", default_value = "localhost")]
    pub pg_host: String,
    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,
    #[arg(long, env = "PG_USER", default_value = "postgres")]
    pub pg_user: String,
    #[arg(long, env = "PG_PASSWORD", default_value = "postgres", hide_env_values = true)]
    pub pg_password: String,
    #[arg(long, env = "PG_DB", default_value = "oee")]
    pub pg_db: String,

    /// Create tables, hypertables and retention policies on startup
    #[arg(long, env = "PG_APPLY_MIGRATIONS")]
    pub apply_migrations: bool,

    #[arg(long, env = "METRICS_INTERVAL", default_value_t = 60)]
    pub metrics_interval: u64,
    #[arg(long, env = "WORKER_THREADS")]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IngestorSettings {
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub apply_migrations: bool,
    pub metrics_interval: Duration,
    pub workers: Option<usize>,
}

impl IngestorArgs {
    pub fn into_settings(self) -> Result<IngestorSettings, ConfigError> {
        let store = StoreConfig {
            host: self.pg_host,
            port: self.pg_port,
            user: self.pg_user,
            password: self.pg_password,
            dbname: self.pg_db,
        };
        store.validate()?;
        Ok(IngestorSettings {
            broker: BrokerConfig::from_url(&self.broker_url, &self.client_id)?,
            store,
            apply_migrations: self.apply_migrations,
            metrics_interval: interval(self.metrics_interval)?,
            workers: self.workers,
        })
    }
}
