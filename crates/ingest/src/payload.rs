//! Inbound wire shapes. More lenient than the outbound events: `machine_id` and
//! `timestamp` may be missing and are filled in by the router, and a missing part
//! count reads as 0.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use oee_core::events::is_zero_timestamp;
use oee_core::{MachineId, MachineStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub machine_id: Option<MachineId>,
    pub status: MachineStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductionPayload {
    #[serde(default)]
    pub machine_id: Option<MachineId>,
    #[serde(default)]
    pub parts_produced: i32,
    #[serde(default)]
    pub parts_scrapped: i32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// The payload timestamp, or `received_at` when it is absent or zero-valued.
pub fn effective_timestamp(ts: Option<DateTime<Utc>>, received_at: DateTime<Utc>) -> DateTime<Utc> {
    match ts {
        Some(ts) if !is_zero_timestamp(&ts) => ts,
        _ => received_at,
    }
}
