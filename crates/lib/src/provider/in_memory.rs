//! Process-local session storage.

use std::any::Any;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use lru::LruCache;
use tracing::{debug, warn};

use super::{ProviderError, SessionProvider, internal_record};
use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionSettings;
use crate::constants::{CLOSED_SESSION_CAPACITY, ROOT_USER_ID};
use crate::session::SessionRecord;

/// Sessions held in process memory.
///
/// Open sessions are kept until closed. Closed sessions move to a bounded
/// least-recently-used cache so they stay queryable for a while without
/// unbounded growth.
///
/// Moving a session from open to closed inserts into `closed` before removing
/// from `open`, and readers probe `open` before `closed`, so a lookup never
/// misses a session that is mid-transition. Lock order is always `open`
/// then `closed`.
pub struct InMemoryProvider {
    node: String,
    open: RwLock<HashMap<String, SessionRecord>>,
    closed: Mutex<LruCache<String, SessionRecord>>,
    next_id: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("node", &self.node)
            .field("open", &self.open.read().unwrap().len())
            .field("closed", &self.closed.lock().unwrap().len())
            .finish()
    }
}

impl InMemoryProvider {
    /// A provider for `node` keeping up to 512 closed sessions.
    pub fn new(node: impl Into<String>) -> Self {
        Self::with_capacity(node, CLOSED_SESSION_CAPACITY)
    }

    /// A provider keeping up to `closed_capacity` closed sessions (at least one).
    pub fn with_capacity(node: impl Into<String>, closed_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(closed_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            node: node.into(),
            open: RwLock::new(HashMap::new()),
            closed: Mutex::new(LruCache::new(capacity)),
            next_id: AtomicI64::new(0),
            clock: Arc::new(SystemClock),
        }
    }

    /// A provider for `settings.node_uuid` keeping `settings.closed_cache_capacity`
    /// closed sessions.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::with_capacity(settings.node_uuid.clone(), settings.closed_cache_capacity)
    }

    /// Use `clock` to stamp closing times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn open_count(&self) -> usize {
        self.open.read().unwrap().len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.lock().unwrap().len()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_sub(1, Ordering::SeqCst) - 1
    }

    fn lookup(&self, uuid: &str) -> Option<SessionRecord> {
        if let Some(record) = self.open.read().unwrap().get(uuid) {
            return Some(record.clone());
        }
        self.closed.lock().unwrap().get(uuid).cloned()
    }
}

#[async_trait]
impl SessionProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn execute_update(
        &self,
        mut record: SessionRecord,
        user_id: i64,
        sudoer_id: Option<i64>,
    ) -> Result<SessionRecord> {
        if record.is_closed() {
            return Err(ProviderError::InvalidRecord {
                reason: format!("session {} is marked closed", record.uuid),
            }
            .into());
        }

        let mut open = self.open.write().unwrap();
        if self.closed.lock().unwrap().contains(&record.uuid) {
            return Err(ProviderError::SessionClosed { uuid: record.uuid }.into());
        }

        record.id = match open.get(&record.uuid) {
            Some(existing) => existing.id,
            None => Some(record.id.unwrap_or_else(|| self.next_id())),
        };
        record.owner_id = Some(user_id);
        record.sudoer_id = sudoer_id;
        record.node = Some(self.node.clone());

        debug!(uuid = %record.uuid, id = ?record.id, "Registered in-memory session");
        open.insert(record.uuid.clone(), record.clone());
        Ok(record)
    }

    async fn execute_close_session(&self, uuid: &str) -> Result<bool> {
        let mut open = self.open.write().unwrap();
        let Some(record) = open.get(uuid) else {
            if self.closed.lock().unwrap().contains(uuid) {
                warn!(uuid = %uuid, "Ignoring close of already closed session");
            } else {
                warn!(uuid = %uuid, "Ignoring close of unknown session");
            }
            return Ok(false);
        };

        let mut record = record.clone();
        record.closed = Some(self.clock.now_millis());
        // Put before remove.
        self.closed.lock().unwrap().put(uuid.to_string(), record);
        open.remove(uuid);

        debug!(uuid = %uuid, "Closed in-memory session");
        Ok(true)
    }

    async fn execute_internal_session(
        &self,
        uuid: &str,
        seed: SessionRecord,
    ) -> Result<SessionRecord> {
        self.execute_update(internal_record(uuid, seed), ROOT_USER_ID, None)
            .await
    }

    async fn execute_next_session_id(&self) -> Result<i64> {
        Ok(self.next_id())
    }

    async fn find_session_by_id(&self, id: i64) -> Result<Option<SessionRecord>> {
        let open = self
            .open
            .read()
            .unwrap()
            .values()
            .find(|record| record.id == Some(id))
            .cloned();
        if open.is_some() {
            return Ok(open);
        }
        Ok(self
            .closed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, record)| record)
            .find(|record| record.id == Some(id))
            .cloned())
    }

    async fn find_session_by_uuid(&self, uuid: &str) -> Result<Option<SessionRecord>> {
        Ok(self.lookup(uuid))
    }

    async fn find_session_id_by_uuid(&self, uuid: &str) -> Result<Option<i64>> {
        Ok(self.lookup(uuid).and_then(|record| record.id))
    }

    async fn list_open_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<_> = self.open.read().unwrap().values().cloned().collect();
        records.sort_by_key(|record| record.started);
        Ok(records)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
