//! Session lifecycle orchestration.
//!
//! [`SessionManager`] ties the [`SessionCache`], a [`SessionProvider`] and a
//! [`SecurityResolver`] together. Sessions move through
//!
//! ```text
//! REQUESTED -> ACTIVE -> (IDLE-EXPIRED | TTL-EXPIRED | EXPLICITLY-CLOSED) -> CLOSED
//! ```
//!
//! and a closed uuid is never reactivated.
//!
//! Provider and resolver calls are awaited without any cache lock held. After
//! each await the manager looks the session up again by uuid instead of
//! trusting a context fetched before it.

mod environment;
mod errors;
mod sweep;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::Result;
use crate::cache::SessionCache;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionSettings;
use crate::constants::INTERNAL_EVENT_TYPE;
use crate::provider::SessionProvider;
use crate::security::{Principal, SecurityDetails, SecurityError, SecurityResolver};
use crate::session::{Count, Expiry, Release, SessionContext, SessionRecord};

use environment::{Environments, Slot};

pub use errors::{CloseOutcome, SessionError};
pub use sweep::{SweepCommand, SweepReport, Sweeper, SweeperHandle};

/// Everything needed to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationRequest {
    pub principal: Principal,
    pub agent: Option<String>,
    pub ip: Option<String>,
    /// Groups the session leads in addition to those the resolver reports.
    pub groups_led: Vec<i64>,
    /// Milliseconds; `None` uses the configured default.
    pub time_to_live: Option<u64>,
    /// Milliseconds; `None` uses the configured default.
    pub time_to_idle: Option<u64>,
    /// The administrator creating the session on the principal's behalf.
    pub sudoer: Option<i64>,
}

impl CreationRequest {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            agent: None,
            ip: None,
            groups_led: Vec::new(),
            time_to_live: None,
            time_to_idle: None,
            sudoer: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_timeouts(mut self, time_to_live: u64, time_to_idle: u64) -> Self {
        self.time_to_live = Some(time_to_live);
        self.time_to_idle = Some(time_to_idle);
        self
    }

    pub fn with_sudoer(mut self, sudoer: i64) -> Self {
        self.sudoer = Some(sudoer);
        self
    }

    pub fn leading(mut self, group_id: i64) -> Self {
        self.groups_led.push(group_id);
        self
    }
}

/// Permission to replace a cached context without re-validation.
///
/// Only this crate can create one. Code outside it can obtain one through
/// [`SessionManager::capability_for`] when acting from an internal session.
#[derive(Debug)]
pub struct InternalCapability {
    _private: (),
}

impl InternalCapability {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// Orchestrates creation, lookup, reference counting and closing of sessions.
///
/// One manager is shared by every worker, usually as `Arc<SessionManager>`.
pub struct SessionManager {
    cache: SessionCache,
    provider: Arc<dyn SessionProvider>,
    resolver: Arc<dyn SecurityResolver>,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    environments: Environments,
    /// Uuids recently expired, so later lookups report a timeout.
    expired: Mutex<LruCache<String, ()>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("provider", &self.provider.name())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        resolver: Arc<dyn SecurityResolver>,
        settings: SessionSettings,
    ) -> Self {
        Self::build(provider, resolver, settings, Arc::new(SystemClock))
    }

    /// A manager whose timeouts follow `clock`.
    #[cfg(any(test, feature = "testing"))]
    pub fn with_clock(
        provider: Arc<dyn SessionProvider>,
        resolver: Arc<dyn SecurityResolver>,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::build(provider, resolver, settings, clock)
    }

    fn build(
        provider: Arc<dyn SessionProvider>,
        resolver: Arc<dyn SecurityResolver>,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(settings.expired_memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: SessionCache::with_clock(clock.clone()),
            provider,
            resolver,
            settings,
            clock,
            environments: Environments::default(),
            expired: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Open a new session.
    ///
    /// Every call produces a new uuid; concurrent logins for the same
    /// principal are not merged.
    pub async fn create(&self, request: CreationRequest) -> Result<Arc<SessionContext>> {
        let principal = &request.principal;
        let mut details = self.resolve(principal).await?;
        keep_led(&mut details, &request.groups_led);

        let mut time_to_live = request.time_to_live.unwrap_or(self.settings.default_ttl_ms);
        let mut time_to_idle = request.time_to_idle.unwrap_or(self.settings.default_tti_ms);
        if !details.is_admin() {
            time_to_live = self.settings.clamp_ttl(time_to_live);
            time_to_idle = self.settings.clamp_tti(time_to_idle);
        }

        let event_type = principal
            .event_type()
            .unwrap_or(self.settings.default_event_type.as_str())
            .to_string();
        let record = SessionRecord::new(self.clock.now_millis(), event_type)
            .with_timeouts(time_to_live, time_to_idle)
            .with_agent(request.agent.clone())
            .with_ip(request.ip.clone());
        let uuid = record.uuid.clone();

        let stored = self
            .provider
            .execute_update(record, details.user_id, request.sudoer)
            .await
            .map_err(|e| provider_failure("create", &uuid, e))?;

        let context = Arc::new(SessionContext::new(stored, details, Count::new(&uuid))?);
        self.cache.put(Arc::clone(&context));
        info!(uuid = %uuid, principal = %principal, "Created session");
        Ok(context)
    }

    /// Open a root-owned session that never expires, for use by the system itself.
    pub async fn create_internal(&self) -> Result<Arc<SessionContext>> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let seed = SessionRecord::with_uuid(&uuid, self.clock.now_millis(), INTERNAL_EVENT_TYPE);
        let stored = self
            .provider
            .execute_internal_session(&uuid, seed)
            .await
            .map_err(|e| provider_failure("create_internal", &uuid, e))?;

        let details = SecurityDetails::root(INTERNAL_EVENT_TYPE);
        let context = Arc::new(SessionContext::new(stored, details, Count::new(&uuid))?);
        self.cache.put(Arc::clone(&context));
        info!(uuid = %uuid, "Created internal session");
        Ok(context)
    }

    /// Replace a cached session with `proposed` after re-validating it.
    ///
    /// The principal of `proposed` is resolved again, so group changes are
    /// checked against current membership. The owner cannot change. Count
    /// and share id carry over from the cached version.
    pub async fn update(&self, proposed: SessionContext) -> Result<Arc<SessionContext>> {
        let uuid = proposed.uuid().to_string();
        let current = self.lookup(&uuid, false, "update").await?;
        if proposed.id() != current.id() {
            return Err(SessionError::SecurityViolation {
                reason: format!("session {uuid} cannot change its id"),
            }
            .into());
        }

        let mut details = self.resolve(&proposed.principal()).await?;
        // Groups led by grant survive only if the session already had them.
        let granted: Vec<i64> = proposed
            .leader_of()
            .iter()
            .copied()
            .filter(|group| current.leader_of().contains(group))
            .collect();
        keep_led(&mut details, &granted);
        if details.user_id != current.owner_id() {
            return Err(SessionError::SecurityViolation {
                reason: format!("session {uuid} cannot change its owner"),
            }
            .into());
        }

        let mut record = proposed.record().clone();
        if !details.is_admin() {
            record.time_to_live = self.settings.clamp_ttl(record.time_to_live);
            record.time_to_idle = self.settings.clamp_tti(record.time_to_idle);
        }
        self.store(record, details, "update").await
    }

    /// Replace a cached session with `proposed` without validation.
    pub async fn update_trusted(
        &self,
        proposed: SessionContext,
        _capability: &InternalCapability,
    ) -> Result<Arc<SessionContext>> {
        let uuid = proposed.uuid().to_string();
        self.lookup(&uuid, false, "update").await?;
        debug!(uuid = %uuid, "Applying trusted session update");
        self.store(proposed.record().clone(), proposed.details().clone(), "update")
            .await
    }

    /// A capability for code running under an internal session.
    ///
    /// Returns `None` unless `context` is the cached version of an internal session.
    pub fn capability_for(&self, context: &SessionContext) -> Option<InternalCapability> {
        let cached = self.cache.get(context.uuid())?;
        (cached.record().is_internal() && cached.id() == context.id())
            .then(InternalCapability::new)
    }

    /// Persist `record` and cache a new version inheriting the current count and share id.
    async fn store(
        &self,
        record: SessionRecord,
        details: SecurityDetails,
        operation: &'static str,
    ) -> Result<Arc<SessionContext>> {
        let uuid = record.uuid.clone();
        let sudoer = record.sudoer_id;
        let stored = self
            .provider
            .execute_update(record, details.user_id, sudoer)
            .await
            .map_err(|e| provider_failure(operation, &uuid, e))?;

        // The session may have closed while the provider was busy.
        let current = self
            .cache
            .get(uuid.as_str())
            .filter(|context| !context.count().is_closing())
            .ok_or_else(|| SessionError::SessionRemoved { uuid: uuid.clone() })?;
        let next = Arc::new(SessionContext::new(stored, details, current.count().clone())?);
        next.set_share_id(current.share_id());
        self.cache.put(Arc::clone(&next));
        debug!(uuid = %uuid, operation, "Replaced session context");
        Ok(next)
    }

    /// Add a reference to the session. Returns the new count.
    pub async fn attach(&self, uuid: &str) -> Result<i32> {
        let context = self.lookup(uuid, true, "attach").await?;
        // A close claimed since the lookup wins.
        let count = context
            .count()
            .increment()
            .ok_or_else(|| SessionError::SessionRemoved {
                uuid: uuid.to_string(),
            })?;
        debug!(uuid = %uuid, count, "Attached to session");
        Ok(count)
    }

    /// Drop a reference without closing. Returns the new count.
    pub async fn detach(&self, uuid: &str) -> Result<i32> {
        let context = self.lookup(uuid, false, "detach").await?;
        let count = context.count().decrement();
        debug!(uuid = %uuid, count, "Detached from session");
        Ok(count)
    }

    pub async fn reference_count(&self, uuid: &str) -> Result<i32> {
        let context = self.lookup(uuid, false, "reference_count").await?;
        Ok(context.count().get())
    }

    /// Drop a reference and close the session once none remain.
    ///
    /// The caller that takes the count to zero claims the close before any
    /// provider I/O, so concurrent closers see [`CloseOutcome::AlreadyClosed`]
    /// and concurrent attaches fail. A session that is stored but not cached
    /// is closed outright.
    pub async fn close(&self, uuid: &str) -> Result<CloseOutcome> {
        let Some(context) = self.cache.get(uuid) else {
            return self.close_uncached(uuid).await;
        };

        match context.count().release() {
            Release::Remaining(remaining) => {
                debug!(uuid = %uuid, remaining, "Session still referenced");
                return Ok(CloseOutcome::StillReferenced(remaining));
            }
            Release::AlreadyClosing => {
                debug!(uuid = %uuid, "Session already closing");
                return Ok(CloseOutcome::AlreadyClosed);
            }
            Release::Claimed => {}
        }

        if let Err(e) = self.provider.execute_close_session(uuid).await {
            context.count().abort_close();
            return Err(provider_failure("close", uuid, e));
        }
        self.cache.remove(uuid);
        self.environments.clear(uuid);
        info!(uuid = %uuid, "Closed session");
        Ok(CloseOutcome::Removed)
    }

    async fn close_uncached(&self, uuid: &str) -> Result<CloseOutcome> {
        let record = self
            .provider
            .find_session_by_uuid(uuid)
            .await
            .map_err(|e| provider_failure("close", uuid, e))?;
        match record {
            None => Ok(CloseOutcome::NotFound),
            Some(record) if record.is_closed() => Ok(CloseOutcome::AlreadyClosed),
            Some(_) => {
                self.provider
                    .execute_close_session(uuid)
                    .await
                    .map_err(|e| provider_failure("close", uuid, e))?;
                self.environments.clear(uuid);
                info!(uuid = %uuid, "Closed uncached session");
                Ok(CloseOutcome::Removed)
            }
        }
    }

    /// The live context for `uuid`.
    ///
    /// # Errors
    /// [`SessionError::SessionTimedOut`] if the session expired,
    /// [`SessionError::SessionRemoved`] if it never existed or was closed.
    pub async fn find(&self, uuid: &str) -> Result<Arc<SessionContext>> {
        self.lookup(uuid, true, "find").await
    }

    /// Rebuild the context from the provider and the resolver, bypassing the cache.
    ///
    /// Picks up changed group membership or privileges. Count and share id
    /// carry over.
    pub async fn reload(&self, uuid: &str) -> Result<Arc<SessionContext>> {
        let current = self.lookup(uuid, false, "reload").await?;

        let record = self
            .provider
            .find_session_by_uuid(uuid)
            .await
            .map_err(|e| provider_failure("reload", uuid, e))?;
        let record = match record {
            Some(record) if !record.is_closed() => record,
            _ => {
                self.cache.remove(uuid);
                self.environments.clear(uuid);
                return Err(SessionError::SessionRemoved {
                    uuid: uuid.to_string(),
                }
                .into());
            }
        };

        let mut details = self.resolve(&current.principal()).await?;
        keep_led(&mut details, current.leader_of());

        let current = self
            .cache
            .get(uuid)
            .filter(|context| !context.count().is_closing())
            .ok_or_else(|| SessionError::SessionRemoved {
                uuid: uuid.to_string(),
            })?;
        let next = Arc::new(SessionContext::new(record, details, current.count().clone())?);
        next.set_share_id(current.share_id());
        self.cache.put(Arc::clone(&next));
        debug!(uuid = %uuid, "Reloaded session");
        Ok(next)
    }

    /// Cached sessions owned by `owner_id`, oldest first.
    pub fn open_sessions(&self, owner_id: i64) -> Vec<Arc<SessionContext>> {
        let mut sessions: Vec<_> = self
            .cache
            .snapshot()
            .into_iter()
            .filter(|context| context.owner_id() == owner_id)
            .collect();
        sessions.sort_by(|a, b| {
            (a.record().started, a.uuid()).cmp(&(b.record().started, b.uuid()))
        });
        sessions
    }

    pub async fn share_id(&self, uuid: &str) -> Result<Option<i64>> {
        Ok(self.lookup(uuid, false, "share_id").await?.share_id())
    }

    pub async fn set_share_id(&self, uuid: &str, share_id: Option<i64>) -> Result<()> {
        self.lookup(uuid, true, "set_share_id")
            .await?
            .set_share_id(share_id);
        Ok(())
    }

    pub async fn input(&self, uuid: &str, key: &str) -> Result<Option<Value>> {
        self.lookup(uuid, true, "input").await?;
        Ok(self.environments.get(uuid, Slot::Input, key))
    }

    pub async fn output(&self, uuid: &str, key: &str) -> Result<Option<Value>> {
        self.lookup(uuid, true, "output").await?;
        Ok(self.environments.get(uuid, Slot::Output, key))
    }

    /// Store an input value, or remove it when `value` is `None`. Returns the previous value.
    pub async fn set_input(
        &self,
        uuid: &str,
        key: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>> {
        self.lookup(uuid, true, "set_input").await?;
        Ok(self.environments.set(uuid, Slot::Input, key, value))
    }

    /// Store an output value, or remove it when `value` is `None`. Returns the previous value.
    pub async fn set_output(
        &self,
        uuid: &str,
        key: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>> {
        self.lookup(uuid, true, "set_output").await?;
        Ok(self.environments.set(uuid, Slot::Output, key, value))
    }

    pub async fn input_keys(&self, uuid: &str) -> Result<Vec<String>> {
        self.lookup(uuid, true, "input_keys").await?;
        Ok(self.environments.keys(uuid, Slot::Input))
    }

    pub async fn output_keys(&self, uuid: &str) -> Result<Vec<String>> {
        self.lookup(uuid, true, "output_keys").await?;
        Ok(self.environments.keys(uuid, Slot::Output))
    }

    pub async fn inputs(&self, uuid: &str) -> Result<BTreeMap<String, Value>> {
        self.lookup(uuid, true, "inputs").await?;
        Ok(self.environments.all(uuid, Slot::Input))
    }

    pub async fn outputs(&self, uuid: &str) -> Result<BTreeMap<String, Value>> {
        self.lookup(uuid, true, "outputs").await?;
        Ok(self.environments.all(uuid, Slot::Output))
    }

    /// Drop every cached session and environment without closing them.
    ///
    /// Stored sessions stay open in the provider. Returns how many were cached.
    pub fn clear(&self) -> usize {
        self.environments.clear_all();
        let count = self.cache.clear();
        info!(count, "Cleared session manager");
        count
    }

    /// Cache lookup with lazy expiry and miss classification.
    async fn lookup(
        &self,
        uuid: &str,
        touch: bool,
        operation: &'static str,
    ) -> Result<Arc<SessionContext>> {
        let Some(context) = self.cache.get(uuid) else {
            return Err(self.classify_miss(uuid, operation).await);
        };
        if context.count().is_closing() {
            return Err(SessionError::SessionRemoved {
                uuid: uuid.to_string(),
            }
            .into());
        }

        let last_access = self.cache.timestamp(uuid).millis();
        if let Some(reason) = context.record().expiry(self.clock.now_millis(), last_access) {
            self.expire(uuid, reason).await?;
            return Err(SessionError::SessionTimedOut {
                uuid: uuid.to_string(),
            }
            .into());
        }

        if touch {
            self.cache.touch(uuid);
        }
        Ok(context)
    }

    /// Decide whether a uuid missing from the cache timed out or was removed.
    async fn classify_miss(&self, uuid: &str, operation: &'static str) -> crate::Error {
        if self.was_expired(uuid) {
            return SessionError::SessionTimedOut {
                uuid: uuid.to_string(),
            }
            .into();
        }

        match self.provider.find_session_by_uuid(uuid).await {
            Err(e) => provider_failure(operation, uuid, e),
            Ok(Some(record)) if !record.is_closed() => {
                // Stored and open but not cached here. Access times are local
                // to the process that served the session, so only an elapsed
                // time-to-live closes the stored record.
                if record.expiry(self.clock.now_millis(), None) == Some(Expiry::TimeToLive) {
                    self.remember_expired(uuid);
                    if let Err(e) = self.provider.execute_close_session(uuid).await {
                        return provider_failure(operation, uuid, e);
                    }
                    info!(uuid = %uuid, "Closed uncached session past its time to live");
                } else {
                    debug!(uuid = %uuid, "Stored session is not cached here");
                }
                SessionError::SessionTimedOut {
                    uuid: uuid.to_string(),
                }
                .into()
            }
            Ok(_) => SessionError::SessionRemoved {
                uuid: uuid.to_string(),
            }
            .into(),
        }
    }

    /// Force-close an expired session regardless of its reference count.
    async fn expire(&self, uuid: &str, reason: Expiry) -> Result<()> {
        self.remember_expired(uuid);
        if let Some(context) = self.cache.get(uuid) {
            context.count().mark_closing();
        }
        self.cache.remove(uuid);
        self.environments.clear(uuid);
        info!(uuid = %uuid, ?reason, "Session expired");
        self.provider
            .execute_close_session(uuid)
            .await
            .map_err(|e| provider_failure("expire", uuid, e))?;
        Ok(())
    }

    fn remember_expired(&self, uuid: &str) {
        self.expired.lock().unwrap().put(uuid.to_string(), ());
    }

    fn was_expired(&self, uuid: &str) -> bool {
        self.expired.lock().unwrap().contains(uuid)
    }

    pub(crate) async fn resolve(&self, principal: &Principal) -> Result<SecurityDetails> {
        self.resolver
            .resolve(principal)
            .await
            .map_err(|e| resolve_failure(principal, e))
    }
}

fn keep_led(details: &mut SecurityDetails, groups: &[i64]) {
    for group in groups {
        if !details.leader_of.contains(group) {
            details.leader_of.push(*group);
        }
    }
}

/// Map resolver errors onto the session taxonomy.
fn resolve_failure(principal: &Principal, err: crate::Error) -> crate::Error {
    match err {
        crate::Error::Security(SecurityError::NotAMember { .. }) => {
            SessionError::SecurityViolation {
                reason: err.to_string(),
            }
            .into()
        }
        crate::Error::Security(ref security)
            if security.is_not_found() || security.is_authentication_error() =>
        {
            SessionError::AuthenticationFailure {
                user_name: principal.user_name().to_string(),
                reason: security.to_string(),
            }
            .into()
        }
        other => other,
    }
}

/// Wrap a provider error once, at the manager boundary.
///
/// Writes to a closed session surface as [`SessionError::SessionRemoved`].
fn provider_failure(operation: &'static str, uuid: &str, source: crate::Error) -> crate::Error {
    if let crate::Error::Provider(ref provider) = source
        && provider.is_closed()
    {
        return SessionError::SessionRemoved {
            uuid: uuid.to_string(),
        }
        .into();
    }
    error!(operation, uuid = %uuid, error = %source, "Session provider failed");
    SessionError::ProviderFailure {
        operation,
        uuid: uuid.to_string(),
        source: Box::new(source),
    }
    .into()
}
