//! The durable description of a login session.

use serde::{Deserialize, Serialize};

use crate::constants::{INTERNAL_AGENT, ROOT_USER_ID};

/// Why a session passed its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expiry {
    /// `started + time_to_live` has passed.
    TimeToLive,
    /// No use within `time_to_idle`.
    TimeToIdle,
}

/// One login, as persisted by a [`SessionProvider`](crate::SessionProvider).
///
/// Ids are assigned by the provider that first persists the record. In-memory
/// providers use negative ids and durable providers positive ones, so a record
/// never changes meaning when several providers are chained.
///
/// A record with `closed` set is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Option<i64>,
    pub uuid: String,
    pub owner_id: Option<i64>,
    /// Set when an administrator created the session on the owner's behalf.
    pub sudoer_id: Option<i64>,
    /// Uuid of the node that registered the session.
    pub node: Option<String>,
    /// Epoch milliseconds.
    pub started: u64,
    /// Epoch milliseconds.
    pub closed: Option<u64>,
    /// Milliseconds, `0` for unlimited.
    pub time_to_live: u64,
    /// Milliseconds, `0` for unlimited.
    pub time_to_idle: u64,
    pub default_event_type: String,
    pub user_agent: Option<String>,
    pub user_ip: Option<String>,
}

impl SessionRecord {
    /// A fresh, unpersisted record with a new uuid.
    pub fn new(started: u64, default_event_type: impl Into<String>) -> Self {
        Self::with_uuid(uuid::Uuid::new_v4().to_string(), started, default_event_type)
    }

    /// A fresh, unpersisted record with the given uuid.
    pub fn with_uuid(
        uuid: impl Into<String>,
        started: u64,
        default_event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            uuid: uuid.into(),
            owner_id: None,
            sudoer_id: None,
            node: None,
            started,
            closed: None,
            time_to_live: 0,
            time_to_idle: 0,
            default_event_type: default_event_type.into(),
            user_agent: None,
            user_ip: None,
        }
    }

    pub fn with_timeouts(mut self, time_to_live: u64, time_to_idle: u64) -> Self {
        self.time_to_live = time_to_live;
        self.time_to_idle = time_to_idle;
        self
    }

    pub fn with_agent(mut self, agent: Option<String>) -> Self {
        self.user_agent = agent;
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.user_ip = ip;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Root-owned sessions that never expire are internal.
    pub fn is_internal(&self) -> bool {
        self.owner_id == Some(ROOT_USER_ID)
            && self.time_to_live == 0
            && self.time_to_idle == 0
            && self.user_agent.as_deref() == Some(INTERNAL_AGENT)
    }

    /// The instant the session's time-to-live runs out, if limited.
    pub fn ttl_deadline(&self) -> Option<u64> {
        (self.time_to_live > 0).then(|| self.started.saturating_add(self.time_to_live))
    }

    /// The instant the session goes idle given its last use, if limited.
    ///
    /// A session that was never used counts from `started`.
    pub fn idle_deadline(&self, last_access: Option<u64>) -> Option<u64> {
        (self.time_to_idle > 0).then(|| {
            last_access
                .unwrap_or(self.started)
                .max(self.started)
                .saturating_add(self.time_to_idle)
        })
    }

    /// Whether the session is past a deadline at `now`.
    ///
    /// Time-to-live is reported in preference to idleness.
    pub fn expiry(&self, now: u64, last_access: Option<u64>) -> Option<Expiry> {
        if self.ttl_deadline().is_some_and(|deadline| now >= deadline) {
            return Some(Expiry::TimeToLive);
        }
        if self
            .idle_deadline(last_access)
            .is_some_and(|deadline| now >= deadline)
        {
            return Some(Expiry::TimeToIdle);
        }
        None
    }
}
