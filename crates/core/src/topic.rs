//! Bus addressing: `factory/machine/{machine_id}/{kind}`.

use std::fmt;
use std::str::FromStr;

use crate::MachineId;

pub const TOPIC_ROOT: &str = "factory";
pub const TOPIC_MACHINE: &str = "machine";

pub const STATUS_FILTER: &str = "factory/machine/+/status";
pub const PRODUCTION_FILTER: &str = "factory/machine/+/production";

/// Filters an ingestor subscribes to.
pub const SUBSCRIPTIONS: [&str; 2] = [STATUS_FILTER, PRODUCTION_FILTER];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("malformed topic '{0}'")]
    Malformed(String),
    #[error("invalid machine id '{segment}' in topic '{topic}'")]
    InvalidMachineId { topic: String, segment: String },
    #[error("unhandled event kind '{0}'")]
    UnhandledKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    Production,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Production => "production",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(EventKind::Status),
            "production" => Ok(EventKind::Production),
            other => Err(TopicError::UnhandledKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    pub machine_id: MachineId,
    pub kind: EventKind,
}

impl Topic {
    pub fn new(machine_id: MachineId, kind: EventKind) -> Self {
        Self { machine_id, kind }
    }

    pub fn status(machine_id: MachineId) -> Self {
        Self::new(machine_id, EventKind::Status)
    }

    pub fn production(machine_id: MachineId) -> Self {
        Self::new(machine_id, EventKind::Production)
    }

    /// Recovers routing information from a concrete topic string.
    ///
    /// The shape is checked before the kind, so `factory/widget/3/status` is
    /// malformed while `factory/machine/3/vibration` is an unhandled kind.
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() != 4 || segments[0] != TOPIC_ROOT || segments[1] != TOPIC_MACHINE {
            return Err(TopicError::Malformed(topic.to_string()));
        }
        let machine_id = segments[2]
            .parse::<MachineId>()
            .map_err(|_| TopicError::InvalidMachineId {
                topic: topic.to_string(),
                segment: segments[2].to_string(),
            })?;
        let kind = segments[3].parse::<EventKind>()?;
        Ok(Self { machine_id, kind })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOPIC_ROOT}/{TOPIC_MACHINE}/{}/{}", self.machine_id, self.kind)
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

/// MQTT filter matching with `+` (one level) and `#` (remaining levels).
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}
