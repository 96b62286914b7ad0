//! Validated parameters for the simulator, the bus client and the store.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MachineId;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("at least one machine id is required")]
    NoMachines,
    #[error("machine id {0} is listed more than once")]
    DuplicateMachine(MachineId),
    #[error("{name} must be a probability in [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("downtime range is empty: min {min:?} must be below max {max:?}")]
    EmptyDowntimeRange { min: Duration, max: Duration },
    #[error("invalid broker url '{0}'")]
    InvalidBrokerUrl(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Loss model shared by every simulated machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MachineProfile {
    pub ideal_cycle_time: Duration,
    pub scrap_rate: f64,
    pub downtime_chance: f64,
    pub downtime_min: Duration,
    pub downtime_max: Duration,
    pub performance_loss_chance: f64,
    pub performance_loss_max_delay: Duration,
}

impl Default for MachineProfile {
    fn default() -> Self {
        Self {
            ideal_cycle_time: Duration::from_secs(3),
            scrap_rate: 0.05,
            downtime_chance: 0.1,
            downtime_min: Duration::from_secs(10),
            downtime_max: Duration::from_secs(30),
            performance_loss_chance: 0.20,
            performance_loss_max_delay: Duration::from_secs(2),
        }
    }
}

impl MachineProfile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        probability("scrap_rate", self.scrap_rate)?;
        probability("downtime_chance", self.downtime_chance)?;
        probability("performance_loss_chance", self.performance_loss_chance)?;
        if self.ideal_cycle_time.is_zero() {
            return Err(ConfigError::Zero("ideal_cycle_time"));
        }
        if self.performance_loss_max_delay.is_zero() {
            return Err(ConfigError::Zero("performance_loss_max_delay"));
        }
        // Half-open draw range, so equal bounds are as empty as inverted ones.
        if self.downtime_max <= self.downtime_min {
            return Err(ConfigError::EmptyDowntimeRange {
                min: self.downtime_min,
                max: self.downtime_max,
            });
        }
        Ok(())
    }
}

fn probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability { name, value })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatorConfig {
    pub machine_ids: Vec<MachineId>,
    pub profile: MachineProfile,
    /// Fixed base seed; machines draw from entropy when unset.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            machine_ids: vec![1, 2, 3],
            profile: MachineProfile::default(),
            seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine_ids.is_empty() {
            return Err(ConfigError::NoMachines);
        }
        let mut seen = HashSet::new();
        for id in &self.machine_ids {
            if !seen.insert(*id) {
                return Err(ConfigError::DuplicateMachine(*id));
            }
        }
        self.profile.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub channel_capacity: usize,
}

impl BrokerConfig {
    /// Accepts `tcp://host:port`, `mqtt://host:port` or a bare `host[:port]`.
    pub fn from_url(url: &str, client_id: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidBrokerUrl(url.to_string());
        let rest = match url.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some(_) => return Err(invalid()),
            None => url,
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (rest, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() || host.contains('/') || port == 0 {
            return Err(invalid());
        }
        let cfg = Self {
            host: host.to_string(),
            port,
            client_id: client_id.to_string(),
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            channel_capacity: 64,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Empty("client_id"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            dbname: "oee".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Empty("store host"));
        }
        if self.dbname.is_empty() {
            return Err(ConfigError::Empty("store dbname"));
        }
        Ok(())
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("dbname", &self.dbname)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SimulatorConfig::default().validate().unwrap();
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_downtime_range() {
        let mut profile = MachineProfile::default();
        profile.downtime_max = profile.downtime_min;
        assert!(matches!(profile.validate(), Err(ConfigError::EmptyDowntimeRange { .. })));

        profile.downtime_max = Duration::from_secs(1);
        assert!(matches!(profile.validate(), Err(ConfigError::EmptyDowntimeRange { .. })));
    }

    #[test]
    fn rejects_zero_delay_and_cycle() {
        let profile = MachineProfile {
            performance_loss_max_delay: Duration::ZERO,
            ..MachineProfile::default()
        };
        assert_eq!(
            profile.validate(),
            Err(ConfigError::Zero("performance_loss_max_delay"))
        );

        let profile = MachineProfile {
            ideal_cycle_time: Duration::ZERO,
            ..MachineProfile::default()
        };
        assert_eq!(profile.validate(), Err(ConfigError::Zero("ideal_cycle_time")));
    }

    #[test]
    fn rejects_out_of_range_probabilities() {
        for value in [-0.1, 1.5, f64::NAN] {
            let profile = MachineProfile { scrap_rate: value, ..MachineProfile::default() };
            assert!(matches!(
                profile.validate(),
                Err(ConfigError::InvalidProbability { name: "scrap_rate", .. })
            ));
        }
    }

    #[test]
    fn rejects_empty_and_duplicate_machines() {
        let cfg = SimulatorConfig { machine_ids: vec![], ..SimulatorConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::NoMachines));

        let cfg = SimulatorConfig { machine_ids: vec![1, 2, 1], ..SimulatorConfig::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::DuplicateMachine(1)));
    }

    #[test]
    fn parses_broker_urls() {
        let cfg = BrokerConfig::from_url("tcp://localhost:1883", "sim").unwrap();
        assert_eq!((cfg.host.as_str(), cfg.port), ("localhost", 1883));

        let cfg = BrokerConfig::from_url("mqtt://emqx:1884", "sim").unwrap();
        assert_eq!((cfg.host.as_str(), cfg.port), ("emqx", 1884));

        let cfg = BrokerConfig::from_url("broker.local", "sim").unwrap();
        assert_eq!(cfg.port, DEFAULT_MQTT_PORT);

        for bad in ["ssl://host:8883", "tcp://:1883", "tcp://host:notaport", "tcp://host:0"] {
            assert!(BrokerConfig::from_url(bad, "sim").is_err(), "{bad}");
        }
        assert_eq!(
            BrokerConfig::from_url("tcp://host:1883", " "),
            Err(ConfigError::Empty("client_id"))
        );
    }

    #[test]
    fn store_debug_redacts_password() {
        let cfg = StoreConfig { password: "hunter2".to_string(), ..StoreConfig::default() };
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
