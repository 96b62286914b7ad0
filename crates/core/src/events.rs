use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::topic::{EventKind, Topic};
use crate::{CoreError, MachineId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Running,
    Stopped,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Running => "running",
            MachineStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine changing its operational state. One record per transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEvent {
    pub machine_id: MachineId,
    pub status: MachineStatus,
    pub timestamp: DateTime<Utc>,
}

/// The outcome of a single completed cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductionEvent {
    pub machine_id: MachineId,
    pub parts_produced: i32,
    pub parts_scrapped: i32,
    pub timestamp: DateTime<Utc>,
}

impl ProductionEvent {
    pub fn good(machine_id: MachineId, timestamp: DateTime<Utc>) -> Self {
        Self { machine_id, parts_produced: 1, parts_scrapped: 0, timestamp }
    }

    pub fn scrap(machine_id: MachineId, timestamp: DateTime<Utc>) -> Self {
        Self { machine_id, parts_produced: 0, parts_scrapped: 1, timestamp }
    }

    pub fn is_scrap(&self) -> bool {
        self.parts_scrapped > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    Status(StatusEvent),
    Production(ProductionEvent),
}

impl MachineEvent {
    pub fn machine_id(&self) -> MachineId {
        match self {
            MachineEvent::Status(e) => e.machine_id,
            MachineEvent::Production(e) => e.machine_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            MachineEvent::Status(_) => EventKind::Status,
            MachineEvent::Production(_) => EventKind::Production,
        }
    }

    pub fn topic(&self) -> Topic {
        Topic::new(self.machine_id(), self.kind())
    }

    /// Canonical JSON payload, as published on the bus.
    pub fn to_payload(&self) -> Result<Vec<u8>, CoreError> {
        let bytes = match self {
            MachineEvent::Status(e) => serde_json::to_vec(e)?,
            MachineEvent::Production(e) => serde_json::to_vec(e)?,
        };
        Ok(bytes)
    }
}

impl From<StatusEvent> for MachineEvent {
    fn from(e: StatusEvent) -> Self {
        MachineEvent::Status(e)
    }
}

impl From<ProductionEvent> for MachineEvent {
    fn from(e: ProductionEvent) -> Self {
        MachineEvent::Production(e)
    }
}

/// Zero-valued timestamps as producers emit them when the field was never set:
/// `0001-01-01T00:00:00Z` or the unix epoch.
pub fn is_zero_timestamp(ts: &DateTime<Utc>) -> bool {
    if ts.timestamp() == 0 && ts.timestamp_subsec_nanos() == 0 {
        return true;
    }
    match Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0) {
        chrono::LocalResult::Single(zero) => *ts == zero,
        _ => false,
    }
}
