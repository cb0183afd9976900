//! Cache-resident security snapshots and their shared reference count.

use std::fmt;
use std::sync::{Arc, Mutex};

use super::SessionRecord;
use crate::Result;
use crate::provider::ProviderError;
use crate::security::{AdminPrivilege, Permissions, Principal, SecurityDetails};

/// Number of outstanding attachments to one session.
///
/// Clones share the same counter, so a `Count` handed from one context version
/// to the next keeps its value. The counter never drops below zero. Once a
/// close has been claimed the counter refuses new attachments.
#[derive(Clone)]
pub struct Count {
    uuid: Arc<str>,
    state: Arc<Mutex<CountState>>,
}

#[derive(Debug, Default)]
struct CountState {
    value: i32,
    closing: bool,
}

/// Result of dropping one reference with [`Count::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other references remain.
    Remaining(i32),
    /// This call took the count to zero and owns the close.
    Claimed,
    /// Another caller already owns the close.
    AlreadyClosing,
}

impl Count {
    /// A fresh counter at zero.
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: Arc::from(uuid),
            state: Arc::new(Mutex::new(CountState::default())),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn get(&self) -> i32 {
        self.state.lock().unwrap().value
    }

    /// Add one attachment and return the new value.
    ///
    /// Returns `None` once the session is closing.
    pub fn increment(&self) -> Option<i32> {
        let mut state = self.state.lock().unwrap();
        if state.closing {
            return None;
        }
        state.value = state.value.saturating_add(1);
        Some(state.value)
    }

    /// Drop one attachment and return the new value, clamped at zero.
    pub fn decrement(&self) -> i32 {
        let mut state = self.state.lock().unwrap();
        state.value = (state.value - 1).max(0);
        state.value
    }

    /// Drop one attachment on behalf of a close.
    ///
    /// Exactly one caller gets [`Release::Claimed`] for a given counter.
    pub fn release(&self) -> Release {
        let mut state = self.state.lock().unwrap();
        if state.closing {
            return Release::AlreadyClosing;
        }
        state.value = (state.value - 1).max(0);
        if state.value > 0 {
            return Release::Remaining(state.value);
        }
        state.closing = true;
        Release::Claimed
    }

    /// Claim the close regardless of outstanding attachments.
    ///
    /// Returns `false` if it was already claimed.
    pub fn mark_closing(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        !std::mem::replace(&mut state.closing, true)
    }

    /// Give up a claimed close, for when the provider refused it.
    pub(crate) fn abort_close(&self) {
        self.state.lock().unwrap().closing = false;
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().unwrap().closing
    }

    /// Whether `other` is the same underlying counter.
    pub fn shares_with(&self, other: &Count) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Count")
            .field("uuid", &self.uuid)
            .field("value", &self.get())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Security snapshot of one session version.
///
/// A context is never edited once built, apart from its share id. When the
/// record or the resolved security details change, a new context replaces it
/// in the cache and inherits the [`Count`] and share id of the old one.
pub struct SessionContext {
    id: i64,
    record: SessionRecord,
    details: SecurityDetails,
    count: Count,
    share_id: Mutex<Option<i64>>,
}

impl SessionContext {
    /// Build a context for a persisted record.
    ///
    /// Fails with [`ProviderError::InvalidRecord`] if the record has no id or
    /// `count` belongs to another uuid.
    pub fn new(record: SessionRecord, details: SecurityDetails, count: Count) -> Result<Self> {
        let id = record.id.ok_or_else(|| ProviderError::InvalidRecord {
            reason: format!("session {} has no id", record.uuid),
        })?;
        if count.uuid() != record.uuid {
            return Err(ProviderError::InvalidRecord {
                reason: format!(
                    "count for {} attached to session {}",
                    count.uuid(),
                    record.uuid
                ),
            }
            .into());
        }
        Ok(Self {
            id,
            record,
            details,
            count,
            share_id: Mutex::new(None),
        })
    }

    /// A new version with a different record, keeping count and share id.
    pub fn with_record(&self, record: SessionRecord) -> Result<Self> {
        let next = Self::new(record, self.details.clone(), self.count.clone())?;
        next.set_share_id(self.share_id());
        Ok(next)
    }

    /// A new version with different security details, keeping count and share id.
    pub fn with_details(&self, details: SecurityDetails) -> Self {
        Self {
            id: self.id,
            record: self.record.clone(),
            details,
            count: self.count.clone(),
            share_id: Mutex::new(self.share_id()),
        }
    }

    /// A new version with this context's data but `other`'s count and share id.
    pub(crate) fn inheriting(&self, other: &SessionContext) -> Self {
        Self {
            id: self.id,
            record: self.record.clone(),
            details: self.details.clone(),
            count: other.count.clone(),
            share_id: Mutex::new(other.share_id()),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn uuid(&self) -> &str {
        &self.record.uuid
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn details(&self) -> &SecurityDetails {
        &self.details
    }

    pub fn count(&self) -> &Count {
        &self.count
    }

    /// The principal this session acts as.
    pub fn principal(&self) -> Principal {
        self.details.principal()
    }

    pub fn owner_id(&self) -> i64 {
        self.details.user_id
    }

    pub fn group_id(&self) -> i64 {
        self.details.group_id
    }

    pub fn leader_of(&self) -> &[i64] {
        &self.details.leader_of
    }

    pub fn member_of(&self) -> &[i64] {
        &self.details.member_of
    }

    pub fn roles(&self) -> &[String] {
        &self.details.roles
    }

    pub fn has_privilege(&self, privilege: AdminPrivilege) -> bool {
        self.details.has_privilege(privilege)
    }

    pub fn permissions(&self) -> &Permissions {
        &self.details.permissions
    }

    pub fn share_id(&self) -> Option<i64> {
        *self.share_id.lock().unwrap()
    }

    pub fn set_share_id(&self, share_id: Option<i64>) {
        *self.share_id.lock().unwrap() = share_id;
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("uuid", &self.record.uuid)
            .field("principal", &self.details.principal().to_string())
            .field("count", &self.count.get())
            .field("share_id", &self.share_id())
            .finish()
    }
}
