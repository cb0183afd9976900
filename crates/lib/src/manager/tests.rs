use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

use super::*;
use crate::FixedClock;
use crate::constants::SYSTEM_GROUP_ID;
use crate::provider::{InMemoryProvider, SessionProvider};
use crate::security::{Directory, DirectoryUser, Permissions};

const START: u64 = 1_704_067_200_000;

struct Fixture {
    clock: Arc<FixedClock>,
    directory: Arc<Directory>,
    provider: Arc<InMemoryProvider>,
    manager: SessionManager,
}

fn fixture_with(settings: SessionSettings) -> Fixture {
    let clock = Arc::new(FixedClock::new(START));
    let directory = Arc::new(Directory::with_root());
    directory.add_group(10, "lab", Permissions::new("rwr---"));
    directory.add_group(11, "other", Permissions::private());
    directory.add_user(DirectoryUser::new(100, "alice", 10).leader(10));
    directory.add_user(DirectoryUser::new(101, "bob", 10));
    directory.add_user(DirectoryUser::new(102, "admin", 10).member(SYSTEM_GROUP_ID));

    let provider = Arc::new(InMemoryProvider::new("node-a").with_clock(clock.clone()));
    let manager = SessionManager::with_clock(
        provider.clone(),
        directory.clone(),
        settings,
        clock.clone(),
    );
    Fixture {
        clock,
        directory,
        provider,
        manager,
    }
}

fn fixture() -> Fixture {
    fixture_with(SessionSettings {
        default_ttl_ms: 0,
        default_tti_ms: 1_000,
        ..SessionSettings::default()
    })
}

fn alice() -> CreationRequest {
    CreationRequest::new(Principal::new("alice"))
}

#[tokio::test]
async fn test_create_caches_and_persists() {
    let f = fixture();
    let ctx = f.manager.create(alice().with_agent("cli")).await.unwrap();

    assert_eq!(ctx.owner_id(), 100);
    assert_eq!(ctx.record().time_to_idle, 1_000);
    assert_eq!(ctx.record().user_agent.as_deref(), Some("cli"));
    assert_eq!(ctx.count().get(), 0);
    assert!(f.manager.cache().contains(ctx.uuid()));
    assert_eq!(f.provider.open_count(), 1);
}

#[tokio::test]
async fn test_create_twice_gives_distinct_sessions() {
    let f = fixture();
    let a = f.manager.create(alice()).await.unwrap();
    let b = f.manager.create(alice()).await.unwrap();
    assert_ne!(a.uuid(), b.uuid());
    assert_ne!(a.id(), b.id());
    assert_eq!(f.manager.open_sessions(100).len(), 2);
}

#[tokio::test]
async fn test_create_rejects_unknown_user_and_foreign_group() {
    let f = fixture();
    let err = f
        .manager
        .create(CreationRequest::new(Principal::new("mallory")))
        .await
        .unwrap_err();
    assert!(err.is_authentication_error());

    let err = f
        .manager
        .create(CreationRequest::new(Principal::new("bob").with_group("other")))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
    assert!(f.manager.cache().is_empty());
}

#[tokio::test]
async fn test_user_timeouts_are_clamped() {
    let f = fixture_with(SessionSettings {
        max_user_ttl_ms: 5_000,
        max_user_tti_ms: 2_000,
        ..SessionSettings::default()
    });

    let ctx = f
        .manager
        .create(alice().with_timeouts(0, 60_000))
        .await
        .unwrap();
    assert_eq!(ctx.record().time_to_live, 5_000);
    assert_eq!(ctx.record().time_to_idle, 2_000);

    let admin = f
        .manager
        .create(CreationRequest::new(Principal::new("admin")).with_timeouts(0, 60_000))
        .await
        .unwrap();
    assert_eq!(admin.record().time_to_live, 0);
    assert_eq!(admin.record().time_to_idle, 60_000);
}

#[tokio::test]
async fn test_reference_counting_closes_at_zero() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid().to_string();

    assert_eq!(f.manager.attach(&uuid).await.unwrap(), 1);
    assert_eq!(f.manager.attach(&uuid).await.unwrap(), 2);
    assert_eq!(
        f.manager.close(&uuid).await.unwrap(),
        CloseOutcome::StillReferenced(1)
    );
    assert_eq!(f.manager.reference_count(&uuid).await.unwrap(), 1);

    assert_eq!(f.manager.close(&uuid).await.unwrap(), CloseOutcome::Removed);
    assert!(!f.manager.cache().contains(uuid.as_str()));
    assert_eq!(f.provider.closed_count(), 1);

    let err = f.manager.find(&uuid).await.unwrap_err();
    assert!(err.is_session_removed());
    assert_eq!(
        f.manager.close(&uuid).await.unwrap(),
        CloseOutcome::AlreadyClosed
    );
}

#[tokio::test]
async fn test_close_unknown_is_not_found() {
    let f = fixture();
    assert_eq!(
        f.manager.close("no-such-session").await.unwrap(),
        CloseOutcome::NotFound
    );
    let err = f.manager.find("no-such-session").await.unwrap_err();
    assert!(err.is_session_removed());
}

#[tokio::test]
async fn test_detach_never_closes() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    assert_eq!(f.manager.detach(ctx.uuid()).await.unwrap(), 0);
    assert_eq!(f.manager.detach(ctx.uuid()).await.unwrap(), 0);
    assert!(f.manager.find(ctx.uuid()).await.is_ok());
}

#[tokio::test]
async fn test_idle_expiry_reports_timeout() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid().to_string();

    f.clock.advance(900);
    f.manager.find(&uuid).await.unwrap();
    // The find above refreshed the idle window.
    f.clock.advance(900);
    f.manager.find(&uuid).await.unwrap();

    f.clock.advance(1_001);
    let err = f.manager.find(&uuid).await.unwrap_err();
    assert!(err.is_session_timed_out());

    // Later lookups still say timed out, not removed.
    let err = f.manager.find(&uuid).await.unwrap_err();
    assert!(err.is_session_timed_out());
    assert_eq!(f.provider.closed_count(), 1);
}

#[tokio::test]
async fn test_ttl_overrides_reference_count() {
    let f = fixture();
    let ctx = f
        .manager
        .create(alice().with_timeouts(5_000, 0))
        .await
        .unwrap();
    let uuid = ctx.uuid().to_string();
    f.manager.attach(&uuid).await.unwrap();
    f.manager.attach(&uuid).await.unwrap();

    f.clock.advance(5_000);
    let err = f.manager.attach(&uuid).await.unwrap_err();
    assert!(err.is_session_timed_out());
    assert!(!f.manager.cache().contains(uuid.as_str()));
}

#[tokio::test]
async fn test_evicted_session_reports_timeout() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid().to_string();

    assert_eq!(f.manager.clear(), 1);
    let err = f.manager.find(&uuid).await.unwrap_err();
    assert!(err.is_session_timed_out());
    // No time-to-live, so the stored record stays open.
    assert_eq!(f.provider.open_count(), 1);
}

#[tokio::test]
async fn test_restarted_manager_closes_only_past_time_to_live() {
    let f = fixture_with(SessionSettings {
        default_ttl_ms: 10_000,
        default_tti_ms: 1_000,
        ..SessionSettings::default()
    });
    let live = f.manager.create(alice()).await.unwrap();
    let stale = f
        .manager
        .create(alice().with_timeouts(2_000, 0))
        .await
        .unwrap();
    f.clock.advance(5_000);

    let restarted = SessionManager::with_clock(
        f.provider.clone(),
        f.directory.clone(),
        f.manager.settings().clone(),
        f.clock.clone(),
    );

    let err = restarted.find(live.uuid()).await.unwrap_err();
    assert!(err.is_session_timed_out());
    let stored = f
        .provider
        .find_session_by_uuid(live.uuid())
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_closed());

    let err = restarted.find(stale.uuid()).await.unwrap_err();
    assert!(err.is_session_timed_out());
    let stored = f
        .provider
        .find_session_by_uuid(stale.uuid())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_closed());
}

#[tokio::test]
async fn test_update_keeps_count_and_share_id() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    f.manager.attach(ctx.uuid()).await.unwrap();
    f.manager.set_share_id(ctx.uuid(), Some(7)).await.unwrap();

    let mut record = ctx.record().clone();
    record.user_ip = Some("10.0.0.1".to_string());
    let updated = f
        .manager
        .update(ctx.with_record(record).unwrap())
        .await
        .unwrap();

    assert_eq!(updated.record().user_ip.as_deref(), Some("10.0.0.1"));
    assert!(updated.count().shares_with(ctx.count()));
    assert_eq!(updated.count().get(), 1);
    assert_eq!(updated.share_id(), Some(7));
    assert_eq!(updated.id(), ctx.id());
}

#[tokio::test]
async fn test_update_cannot_change_owner() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    let mut details = ctx.details().clone();
    details.user_name = "bob".to_string();

    let err = f
        .manager
        .update(ctx.with_details(details))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
    assert_eq!(f.manager.find(ctx.uuid()).await.unwrap().owner_id(), 100);
}

#[tokio::test]
async fn test_update_cannot_grant_leadership() {
    let f = fixture();
    let ctx = f
        .manager
        .create(CreationRequest::new(Principal::new("bob")))
        .await
        .unwrap();
    let mut details = ctx.details().clone();
    details.leader_of.push(10);

    let updated = f.manager.update(ctx.with_details(details)).await.unwrap();
    assert!(!updated.leader_of().contains(&10));
}

#[tokio::test]
async fn test_update_of_closed_session_is_removed() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    f.manager.close(ctx.uuid()).await.unwrap();

    let err = f
        .manager
        .update(ctx.with_details(ctx.details().clone()))
        .await
        .unwrap_err();
    assert!(err.is_session_removed());
}

#[tokio::test]
async fn test_trusted_update_requires_internal_session() {
    let f = fixture();
    let user = f.manager.create(alice()).await.unwrap();
    assert!(f.manager.capability_for(&user).is_none());

    let internal = f.manager.create_internal().await.unwrap();
    assert!(internal.record().is_internal());
    let capability = f.manager.capability_for(&internal).unwrap();

    let mut details = user.details().clone();
    details.roles.push("auditor".to_string());
    let updated = f
        .manager
        .update_trusted(user.with_details(details), &capability)
        .await
        .unwrap();
    assert!(updated.roles().contains(&"auditor".to_string()));
}

#[tokio::test]
async fn test_internal_session_never_expires() {
    let f = fixture();
    let internal = f.manager.create_internal().await.unwrap();
    f.clock.advance(365 * 24 * 60 * 60 * 1000);
    assert!(f.manager.find(internal.uuid()).await.is_ok());
    assert_eq!(f.manager.sweep().await.expired.len(), 0);
}

#[tokio::test]
async fn test_reload_picks_up_directory_changes() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    f.manager.attach(ctx.uuid()).await.unwrap();

    f.directory
        .update_user("alice", |user| user.roles.push("reviewer".to_string()));
    let reloaded = f.manager.reload(ctx.uuid()).await.unwrap();

    assert!(reloaded.roles().contains(&"reviewer".to_string()));
    assert_eq!(reloaded.count().get(), 1);
}

#[tokio::test]
async fn test_environment_lives_with_session() {
    let f = fixture();
    let ctx = f.manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid().to_string();

    f.manager
        .set_input(&uuid, "query", Some(json!({"q": 1})))
        .await
        .unwrap();
    f.manager
        .set_output(&uuid, "rows", Some(json!(3)))
        .await
        .unwrap();
    assert_eq!(
        f.manager.input(&uuid, "query").await.unwrap(),
        Some(json!({"q": 1}))
    );
    assert_eq!(f.manager.output_keys(&uuid).await.unwrap(), vec!["rows"]);

    f.manager.close(&uuid).await.unwrap();
    assert!(f.manager.input(&uuid, "query").await.is_err());
    assert!(f.manager.environments.all(&uuid, Slot::Input).is_empty());
}

#[tokio::test]
async fn test_sweep_expires_only_due_sessions() {
    let f = fixture();
    let idle = f.manager.create(alice()).await.unwrap();
    let fresh = f
        .manager
        .create(alice().with_timeouts(0, 10_000))
        .await
        .unwrap();

    f.clock.advance(2_000);
    let report = f.manager.sweep().await;
    assert_eq!(report.examined, 2);
    assert_eq!(
        report.expired,
        vec![(idle.uuid().to_string(), Expiry::TimeToIdle)]
    );
    assert_eq!(report.failures, 0);

    assert!(f.manager.find(idle.uuid()).await.unwrap_err().is_session_timed_out());
    assert!(f.manager.find(fresh.uuid()).await.is_ok());
}

#[tokio::test]
async fn test_open_sessions_filters_by_owner() {
    let f = fixture();
    f.manager.create(alice()).await.unwrap();
    f.clock.advance(1);
    f.manager.create(alice()).await.unwrap();
    f.manager
        .create(CreationRequest::new(Principal::new("bob")))
        .await
        .unwrap();

    let mine = f.manager.open_sessions(100);
    assert_eq!(mine.len(), 2);
    assert!(mine[0].record().started < mine[1].record().started);
    assert_eq!(f.manager.open_sessions(101).len(), 1);
    assert!(f.manager.open_sessions(999).is_empty());
}

#[tokio::test]
async fn test_sweeper_runs_and_stops() {
    let f = fixture_with(SessionSettings {
        default_tti_ms: 1_000,
        sweep_interval_ms: 60_000,
        ..SessionSettings::default()
    });
    let manager = Arc::new(f.manager);
    let ctx = manager.create(alice()).await.unwrap();

    let handle = Sweeper::start(&manager);
    f.clock.advance(2_000);
    let report = handle.sweep_now().await.unwrap();
    assert_eq!(report.expired.len(), 1);
    assert!(!manager.cache().contains(ctx.uuid()));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_sweeper_stops_with_manager() {
    let f = fixture();
    let manager = Arc::new(f.manager);
    let handle = Sweeper::start(&manager);
    drop(manager);

    // The next command finds the manager gone and ends the task.
    assert!(handle.sweep_now().await.is_err());
    handle.shutdown().await;
}

/// Holds each provider close until the test releases it.
struct GatedProvider {
    inner: InMemoryProvider,
    entered: Notify,
    gate: Semaphore,
}

impl GatedProvider {
    fn new() -> Self {
        Self {
            inner: InMemoryProvider::new("node-a"),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl SessionProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn execute_update(
        &self,
        record: SessionRecord,
        user_id: i64,
        sudoer_id: Option<i64>,
    ) -> Result<SessionRecord> {
        self.inner.execute_update(record, user_id, sudoer_id).await
    }

    async fn execute_close_session(&self, uuid: &str) -> Result<bool> {
        self.entered.notify_one();
        self.gate.acquire().await.unwrap().forget();
        self.inner.execute_close_session(uuid).await
    }

    async fn execute_internal_session(
        &self,
        uuid: &str,
        seed: SessionRecord,
    ) -> Result<SessionRecord> {
        self.inner.execute_internal_session(uuid, seed).await
    }

    async fn execute_next_session_id(&self) -> Result<i64> {
        self.inner.execute_next_session_id().await
    }

    async fn find_session_by_id(&self, id: i64) -> Result<Option<SessionRecord>> {
        self.inner.find_session_by_id(id).await
    }

    async fn find_session_by_uuid(&self, uuid: &str) -> Result<Option<SessionRecord>> {
        self.inner.find_session_by_uuid(uuid).await
    }

    async fn find_session_id_by_uuid(&self, uuid: &str) -> Result<Option<i64>> {
        self.inner.find_session_id_by_uuid(uuid).await
    }

    async fn list_open_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.inner.list_open_sessions().await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[tokio::test]
async fn test_close_in_flight_blocks_second_close_and_attach() {
    let provider = Arc::new(GatedProvider::new());
    let manager = Arc::new(SessionManager::new(
        provider.clone(),
        fixture().directory,
        SessionSettings::default(),
    ));
    let ctx = manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid().to_string();

    let first = tokio::spawn({
        let manager = manager.clone();
        let uuid = uuid.clone();
        async move { manager.close(&uuid).await }
    });
    provider.entered.notified().await;

    // The first close owns the session while the provider is busy.
    assert_eq!(
        manager.close(&uuid).await.unwrap(),
        CloseOutcome::AlreadyClosed
    );
    assert!(manager.attach(&uuid).await.unwrap_err().is_session_removed());
    assert!(manager.find(&uuid).await.unwrap_err().is_session_removed());

    provider.gate.add_permits(1);
    assert_eq!(first.await.unwrap().unwrap(), CloseOutcome::Removed);
    assert!(!manager.cache().contains(uuid.as_str()));
    assert_eq!(
        manager.close(&uuid).await.unwrap(),
        CloseOutcome::AlreadyClosed
    );
}

#[tokio::test]
async fn test_attach_before_claim_keeps_session_open() {
    let provider = Arc::new(GatedProvider::new());
    let manager = SessionManager::new(
        provider.clone(),
        fixture().directory,
        SessionSettings::default(),
    );
    let ctx = manager.create(alice()).await.unwrap();

    assert_eq!(manager.attach(ctx.uuid()).await.unwrap(), 1);
    assert_eq!(manager.attach(ctx.uuid()).await.unwrap(), 2);
    assert_eq!(
        manager.close(ctx.uuid()).await.unwrap(),
        CloseOutcome::StillReferenced(1)
    );
    // No provider close was attempted, so nothing waits on the gate.
    assert!(manager.find(ctx.uuid()).await.is_ok());
    assert_eq!(provider.inner.open_count(), 1);
}
