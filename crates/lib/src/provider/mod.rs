//! Session persistence strategies.
//!
//! This module provides the core [`SessionProvider`] trait and its implementations:
//!
//! - [`InMemoryProvider`]: process-local storage with a bounded closed-session cache
//! - [`SqlxProvider`](sql::SqlxProvider): SQLite or PostgreSQL storage (features `sqlite`, `postgres`)
//! - [`CompositeProvider`]: an ordered chain of providers with ownership-aware routing
//!
//! Providers never hold cache state. The manager calls them without any cache
//! lock held, so a slow backing store only delays the caller that needs it.

mod composite;
pub mod errors;
mod in_memory;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

use std::any::Any;

use async_trait::async_trait;

use crate::Result;
use crate::constants::{INTERNAL_AGENT, INTERNAL_EVENT_TYPE, ROOT_USER_ID};
use crate::session::SessionRecord;

pub use composite::{CompositeProvider, ProviderSlot};
pub use errors::ProviderError;
pub use in_memory::InMemoryProvider;

/// Persistence contract for session records.
///
/// Ids are assigned by the provider that first stores a record: in-memory
/// providers count down from `-1`, durable providers count up from `1`, so
/// records from different providers never share an id.
///
/// All implementations must be `Send` and `Sync` to allow sharing across
/// tasks, and implement `Any` to allow downcasting.
#[async_trait]
pub trait SessionProvider: Send + Sync + Any {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Store `record` for `user_id`, acting on behalf of `sudoer_id` if set.
    ///
    /// Assigns an id if the record has none and stamps owner, sudoer and this
    /// provider's node. Storing a uuid that is already present updates it in
    /// place and keeps its id.
    ///
    /// # Errors
    /// [`ProviderError::SessionClosed`] if the uuid belongs to a closed session.
    async fn execute_update(
        &self,
        record: SessionRecord,
        user_id: i64,
        sudoer_id: Option<i64>,
    ) -> Result<SessionRecord>;

    /// Mark the session closed.
    ///
    /// Unknown and already closed uuids are logged and ignored. Returns whether
    /// this call closed the session.
    async fn execute_close_session(&self, uuid: &str) -> Result<bool>;

    /// Store a root-owned, non-expiring session for use by the system itself.
    ///
    /// `seed` supplies descriptive fields; identity, ownership and timeouts are
    /// overwritten (see [`internal_record`]).
    async fn execute_internal_session(&self, uuid: &str, seed: SessionRecord)
    -> Result<SessionRecord>;

    /// Reserve a fresh id in this provider's numbering space.
    async fn execute_next_session_id(&self) -> Result<i64>;

    async fn find_session_by_id(&self, id: i64) -> Result<Option<SessionRecord>>;

    async fn find_session_by_uuid(&self, uuid: &str) -> Result<Option<SessionRecord>>;

    /// Look up only the id. Used by [`CompositeProvider`] to find the owner of a uuid.
    async fn find_session_id_by_uuid(&self, uuid: &str) -> Result<Option<i64>>;

    /// Every session that has not been closed.
    async fn list_open_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Returns a reference to the provider instance as a dynamic `Any` type.
    ///
    /// This allows for downcasting to a concrete provider type if necessary.
    fn as_any(&self) -> &dyn Any;
}

/// Shape `seed` into an internal session record for `uuid`.
///
/// Internal sessions are owned by root, never expire and carry the internal
/// agent, so [`SessionRecord::is_internal`] holds for the result.
pub fn internal_record(uuid: &str, seed: SessionRecord) -> SessionRecord {
    let default_event_type = if seed.default_event_type.is_empty() {
        INTERNAL_EVENT_TYPE.to_string()
    } else {
        seed.default_event_type
    };
    SessionRecord {
        id: None,
        uuid: uuid.to_string(),
        owner_id: Some(ROOT_USER_ID),
        sudoer_id: None,
        node: seed.node,
        started: seed.started,
        closed: None,
        time_to_live: 0,
        time_to_idle: 0,
        default_event_type,
        user_agent: Some(INTERNAL_AGENT.to_string()),
        user_ip: seed.user_ip,
    }
}
