//! Session manager configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{
    CLOSED_SESSION_CAPACITY, DEFAULT_EVENT_TYPE, DEFAULT_SWEEP_INTERVAL_MS, DEFAULT_TTI_MS,
    DEFAULT_TTL_MS,
};

/// Tunables for [`SessionManager`](crate::SessionManager) and the providers it drives.
///
/// All durations are milliseconds; `0` disables the corresponding limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Time-to-live applied when a request does not specify one.
    pub default_ttl_ms: u64,
    /// Time-to-idle applied when a request does not specify one.
    pub default_tti_ms: u64,
    /// Upper bound for time-to-live requested by non-administrators.
    pub max_user_ttl_ms: u64,
    /// Upper bound for time-to-idle requested by non-administrators.
    pub max_user_tti_ms: u64,
    /// Number of closed sessions the in-memory provider keeps queryable.
    pub closed_cache_capacity: usize,
    /// Number of expired session uuids remembered to report timeouts.
    pub expired_memory_capacity: usize,
    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,
    /// Identity of this node, recorded on every session it registers.
    pub node_uuid: String,
    /// Event type used when a principal does not name one.
    pub default_event_type: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            default_tti_ms: DEFAULT_TTI_MS,
            max_user_ttl_ms: 0,
            max_user_tti_ms: 0,
            closed_cache_capacity: CLOSED_SESSION_CAPACITY,
            expired_memory_capacity: CLOSED_SESSION_CAPACITY,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            node_uuid: uuid::Uuid::new_v4().to_string(),
            default_event_type: DEFAULT_EVENT_TYPE.to_string(),
        }
    }
}

impl SessionSettings {
    /// Clamp a requested time-to-live to the configured user maximum.
    pub fn clamp_ttl(&self, requested: u64) -> u64 {
        clamp(requested, self.max_user_ttl_ms)
    }

    /// Clamp a requested time-to-idle to the configured user maximum.
    pub fn clamp_tti(&self, requested: u64) -> u64 {
        clamp(requested, self.max_user_tti_ms)
    }
}

fn clamp(requested: u64, max: u64) -> u64 {
    match (requested, max) {
        (_, 0) => requested,
        (0, max) => max,
        (requested, max) => requested.min(max),
    }
}
