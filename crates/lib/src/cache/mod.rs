//! Dual-indexed session cache.
//!
//! Every cached [`SessionContext`] is reachable both by its numeric id and by
//! its uuid. Both indexes live behind one `RwLock` so a context is never
//! visible under one key and missing under the other. Readers run
//! concurrently; `put`, `remove` and `clear` are exclusive.
//!
//! Last-access times are stored per entry in an atomic, so `touch` only needs
//! the read lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::session::SessionContext;

/// Stored in `last_access` until the first touch.
const NEVER_TOUCHED: u64 = u64::MAX;

/// Lookup key for the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey<'a> {
    Id(i64),
    Uuid(&'a str),
}

impl From<i64> for SessionKey<'_> {
    fn from(id: i64) -> Self {
        SessionKey::Id(id)
    }
}

impl<'a> From<&'a str> for SessionKey<'a> {
    fn from(uuid: &'a str) -> Self {
        SessionKey::Uuid(uuid)
    }
}

impl<'a> From<&'a String> for SessionKey<'a> {
    fn from(uuid: &'a String) -> Self {
        SessionKey::Uuid(uuid.as_str())
    }
}

/// Result of [`SessionCache::timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTime {
    /// No context under that key.
    NotCached,
    /// Cached, but never touched.
    Never,
    /// Last touched at these epoch milliseconds.
    At(u64),
}

impl AccessTime {
    /// The access instant, if there is one.
    pub fn millis(self) -> Option<u64> {
        match self {
            AccessTime::At(millis) => Some(millis),
            _ => None,
        }
    }
}

struct CacheEntry {
    context: Arc<SessionContext>,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn access_time(&self) -> AccessTime {
        match self.last_access.load(Ordering::Acquire) {
            NEVER_TOUCHED => AccessTime::Never,
            millis => AccessTime::At(millis),
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<i64, Arc<CacheEntry>>,
    by_uuid: HashMap<String, Arc<CacheEntry>>,
}

impl Indexes {
    fn lookup(&self, key: SessionKey<'_>) -> Option<&Arc<CacheEntry>> {
        match key {
            SessionKey::Id(id) => self.by_id.get(&id),
            SessionKey::Uuid(uuid) => self.by_uuid.get(uuid),
        }
    }

    /// Panics if the indexes disagree. A mismatch is a bug in this module.
    fn assert_parity(&self, operation: &str) {
        assert_eq!(
            self.by_id.len(),
            self.by_uuid.len(),
            "session cache indexes diverged during {operation}"
        );
    }
}

/// Concurrent store of session contexts keyed by id and uuid.
pub struct SessionCache {
    indexes: RwLock<Indexes>,
    clock: Arc<dyn Clock>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("len", &self.len())
            .finish()
    }
}

impl SessionCache {
    /// An empty cache using the system clock for access times.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            clock,
        }
    }

    /// Insert or replace a context under both indexes.
    ///
    /// Replacing a context with the same uuid keeps its last-access time. If
    /// the replacement carries a different id, the old id is dropped. Returns
    /// the replaced context.
    pub fn put(&self, context: Arc<SessionContext>) -> Option<Arc<SessionContext>> {
        let mut indexes = self.indexes.write().unwrap();
        indexes.assert_parity("put");

        let id = context.id();
        let uuid = context.uuid().to_string();

        let previous = indexes.by_uuid.remove(&uuid);
        if let Some(previous) = &previous {
            indexes.by_id.remove(&previous.context.id());
        }
        // An id reused under another uuid evicts that uuid too.
        if let Some(clash) = indexes.by_id.remove(&id) {
            indexes.by_uuid.remove(clash.context.uuid());
        }

        let last_access = previous
            .as_ref()
            .map(|entry| entry.last_access.load(Ordering::Acquire))
            .unwrap_or(NEVER_TOUCHED);
        let entry = Arc::new(CacheEntry {
            context,
            last_access: AtomicU64::new(last_access),
        });
        indexes.by_id.insert(id, Arc::clone(&entry));
        indexes.by_uuid.insert(uuid, entry);

        indexes.assert_parity("put");
        debug!(id, replaced = previous.is_some(), "Cached session context");
        previous.map(|entry| Arc::clone(&entry.context))
    }

    pub fn get<'a>(&self, key: impl Into<SessionKey<'a>>) -> Option<Arc<SessionContext>> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .lookup(key.into())
            .map(|entry| Arc::clone(&entry.context))
    }

    pub fn contains<'a>(&self, key: impl Into<SessionKey<'a>>) -> bool {
        self.indexes.read().unwrap().lookup(key.into()).is_some()
    }

    /// Remove a context from both indexes and return it.
    pub fn remove<'a>(&self, key: impl Into<SessionKey<'a>>) -> Option<Arc<SessionContext>> {
        let key = key.into();
        let mut indexes = self.indexes.write().unwrap();
        indexes.assert_parity("remove");

        let entry = match key {
            SessionKey::Id(id) => indexes.by_id.remove(&id),
            SessionKey::Uuid(uuid) => indexes.by_uuid.remove(uuid),
        };
        if let Some(entry) = &entry {
            indexes.by_id.remove(&entry.context.id());
            indexes.by_uuid.remove(entry.context.uuid());
        }

        indexes.assert_parity("remove");
        if let Some(entry) = &entry {
            debug!(id = entry.context.id(), "Evicted session context");
        }
        entry.map(|entry| Arc::clone(&entry.context))
    }

    /// Drop every context. Returns how many were cached.
    pub fn clear(&self) -> usize {
        let mut indexes = self.indexes.write().unwrap();
        indexes.assert_parity("clear");
        let count = indexes.by_uuid.len();
        indexes.by_id.clear();
        indexes.by_uuid.clear();
        debug!(count, "Cleared session cache");
        count
    }

    /// Record a use of the session at the current clock time.
    ///
    /// Returns `false` if nothing is cached under `key`.
    pub fn touch<'a>(&self, key: impl Into<SessionKey<'a>>) -> bool {
        let now = self.clock.now_millis();
        let indexes = self.indexes.read().unwrap();
        match indexes.lookup(key.into()) {
            Some(entry) => {
                // `NEVER_TOUCHED` is reserved.
                entry
                    .last_access
                    .store(now.min(NEVER_TOUCHED - 1), Ordering::Release);
                trace!(id = entry.context.id(), now, "Touched session");
                true
            }
            None => false,
        }
    }

    pub fn timestamp<'a>(&self, key: impl Into<SessionKey<'a>>) -> AccessTime {
        let indexes = self.indexes.read().unwrap();
        indexes
            .lookup(key.into())
            .map(|entry| entry.access_time())
            .unwrap_or(AccessTime::NotCached)
    }

    /// Apply `visitor` to a snapshot of all cached contexts.
    ///
    /// The lock is released before the first call, so the visitor may use the
    /// cache freely, including removing the context it was handed.
    pub fn each(&self, mut visitor: impl FnMut(&Arc<SessionContext>)) {
        for context in self.snapshot() {
            visitor(&context);
        }
    }

    /// All cached contexts at this instant, in no particular order.
    pub fn snapshot(&self) -> Vec<Arc<SessionContext>> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .by_uuid
            .values()
            .map(|entry| Arc::clone(&entry.context))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indexes.read().unwrap().by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sizes of the id and uuid indexes, for parity checks.
    pub fn index_sizes(&self) -> (usize, usize) {
        let indexes = self.indexes.read().unwrap();
        (indexes.by_id.len(), indexes.by_uuid.len())
    }
}
