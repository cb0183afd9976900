//! Ordered chain of providers.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ProviderError, SessionProvider, internal_record};
use crate::Result;
use crate::constants::ROOT_USER_ID;
use crate::session::SessionRecord;

/// One member of a [`CompositeProvider`].
#[derive(Clone)]
pub struct ProviderSlot {
    pub provider: Arc<dyn SessionProvider>,
    /// Whether new sessions may be created here.
    pub writable: bool,
}

impl ProviderSlot {
    pub fn writable(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            writable: true,
        }
    }

    pub fn read_only(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            writable: false,
        }
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("provider", &self.provider.name())
            .field("writable", &self.writable)
            .finish()
    }
}

/// Providers consulted in priority order.
///
/// Lookups return the first hit. Changes to an existing session go to the
/// provider that already holds its uuid, so a session is never duplicated
/// across members. New sessions and fresh ids come from the first writable
/// member.
#[derive(Debug)]
pub struct CompositeProvider {
    slots: Vec<ProviderSlot>,
    primary: usize,
}

impl CompositeProvider {
    /// Build a chain from `slots`, highest priority first.
    ///
    /// # Errors
    /// [`ProviderError::NoWritableProvider`] if no slot is writable.
    pub fn new(slots: Vec<ProviderSlot>) -> Result<Self> {
        let primary = slots
            .iter()
            .position(|slot| slot.writable)
            .ok_or(ProviderError::NoWritableProvider)?;
        Ok(Self { slots, primary })
    }

    pub fn slots(&self) -> &[ProviderSlot] {
        &self.slots
    }

    /// The provider that receives new sessions.
    pub fn primary(&self) -> &Arc<dyn SessionProvider> {
        &self.slots[self.primary].provider
    }

    /// The provider already holding `uuid`, if any.
    async fn owner_of(&self, uuid: &str) -> Result<Option<&Arc<dyn SessionProvider>>> {
        for slot in &self.slots {
            if slot.provider.find_session_id_by_uuid(uuid).await?.is_some() {
                return Ok(Some(&slot.provider));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl SessionProvider for CompositeProvider {
    fn name(&self) -> &str {
        "composite"
    }

    async fn execute_update(
        &self,
        record: SessionRecord,
        user_id: i64,
        sudoer_id: Option<i64>,
    ) -> Result<SessionRecord> {
        let target = match self.owner_of(&record.uuid).await? {
            Some(owner) => owner,
            None => self.primary(),
        };
        debug!(uuid = %record.uuid, provider = target.name(), "Routing session update");
        target.execute_update(record, user_id, sudoer_id).await
    }

    async fn execute_close_session(&self, uuid: &str) -> Result<bool> {
        match self.owner_of(uuid).await? {
            Some(owner) => owner.execute_close_session(uuid).await,
            None => {
                warn!(uuid = %uuid, "Ignoring close of session unknown to every provider");
                Ok(false)
            }
        }
    }

    async fn execute_internal_session(
        &self,
        uuid: &str,
        seed: SessionRecord,
    ) -> Result<SessionRecord> {
        match self.owner_of(uuid).await? {
            Some(owner) => {
                owner
                    .execute_update(internal_record(uuid, seed), ROOT_USER_ID, None)
                    .await
            }
            None => self.primary().execute_internal_session(uuid, seed).await,
        }
    }

    async fn execute_next_session_id(&self) -> Result<i64> {
        self.primary().execute_next_session_id().await
    }

    async fn find_session_by_id(&self, id: i64) -> Result<Option<SessionRecord>> {
        for slot in &self.slots {
            if let Some(record) = slot.provider.find_session_by_id(id).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn find_session_by_uuid(&self, uuid: &str) -> Result<Option<SessionRecord>> {
        for slot in &self.slots {
            if let Some(record) = slot.provider.find_session_by_uuid(uuid).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn find_session_id_by_uuid(&self, uuid: &str) -> Result<Option<i64>> {
        for slot in &self.slots {
            if let Some(id) = slot.provider.find_session_id_by_uuid(uuid).await? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    async fn list_open_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut records = Vec::new();
        for slot in &self.slots {
            records.extend(slot.provider.list_open_sessions().await?);
        }
        records.sort_by_key(|record| record.started);
        Ok(records)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
