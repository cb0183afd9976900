//! Session lifecycle tests against the configured test provider.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tether::{
    CloseOutcome, Principal, SessionManager, SessionProvider, SessionRecord,
    manager::{CreationRequest, Sweeper},
    session::Expiry,
};

use crate::helpers::{START, test_directory, test_manager, test_provider, test_settings};

fn alice() -> CreationRequest {
    CreationRequest::new(Principal::new("alice")).with_agent("it")
}

#[tokio::test]
async fn test_attach_twice_close_then_detach_stays_open() {
    let (_clock, manager) = test_manager().await;
    let ctx = manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid();

    manager.attach(uuid).await.unwrap();
    manager.attach(uuid).await.unwrap();
    assert_eq!(
        manager.close(uuid).await.unwrap(),
        CloseOutcome::StillReferenced(1)
    );
    assert_eq!(manager.detach(uuid).await.unwrap(), 0);

    let found = manager.find(uuid).await.unwrap();
    assert!(!found.record().is_closed());
    assert!(manager
        .provider()
        .find_session_by_uuid(uuid)
        .await
        .unwrap()
        .is_some_and(|record| !record.is_closed()));
}

#[tokio::test]
async fn test_second_close_is_distinguishable() {
    let (_clock, manager) = test_manager().await;
    let ctx = manager.create(alice()).await.unwrap();

    let first = manager.close(ctx.uuid()).await.unwrap();
    let second = manager.close(ctx.uuid()).await.unwrap();
    assert_eq!(first, CloseOutcome::Removed);
    assert_eq!(second, CloseOutcome::AlreadyClosed);
    assert_ne!(first.code(), second.code());

    let stored = manager
        .provider()
        .find_session_by_uuid(ctx.uuid())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_closed());
}

#[tokio::test]
async fn test_ttl_sweep_then_find_times_out() {
    let (clock, manager) = test_manager().await;
    let ctx = manager
        .create(alice().with_timeouts(10_000, 0))
        .await
        .unwrap();
    manager.attach(ctx.uuid()).await.unwrap();

    clock.advance(9_999);
    assert!(manager.sweep().await.expired.is_empty());

    clock.advance(1);
    let report = manager.sweep().await;
    assert_eq!(
        report.expired,
        vec![(ctx.uuid().to_string(), Expiry::TimeToLive)]
    );

    let err = manager.find(ctx.uuid()).await.unwrap_err();
    assert!(err.is_session_timed_out());
    assert!(!err.is_session_removed());
}

#[tokio::test]
async fn test_environment_cleared_on_expiry() {
    let (clock, manager) = test_manager().await;
    let ctx = manager.create(alice()).await.unwrap();
    manager
        .set_output(ctx.uuid(), "result", Some(json!({"rows": 2})))
        .await
        .unwrap();

    clock.advance(1_000);
    manager.sweep().await;

    let fresh = manager.create(alice()).await.unwrap();
    assert!(manager.outputs(fresh.uuid()).await.unwrap().is_empty());
    assert!(manager.output(ctx.uuid(), "result").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attach_and_close() {
    let (_clock, manager) = test_manager().await;
    let ctx = manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid().to_string();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            let uuid = uuid.clone();
            tokio::spawn(async move { manager.attach(&uuid).await.unwrap() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(manager.reference_count(&uuid).await.unwrap(), 16);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            let uuid = uuid.clone();
            tokio::spawn(async move { manager.close(&uuid).await.unwrap() })
        })
        .collect();
    let mut removed = 0;
    for task in tasks {
        if task.await.unwrap().is_removed() {
            removed += 1;
        }
    }
    assert_eq!(removed, 1);
    assert!(manager.find(&uuid).await.unwrap_err().is_session_removed());
}

#[tokio::test]
async fn test_sweeper_expires_in_background() {
    let (clock, manager) = test_manager().await;
    let ctx = manager.create(alice()).await.unwrap();
    let handle = Sweeper::start(&manager);

    clock.advance(1_500);
    let report = handle.sweep_now().await.unwrap();
    assert_eq!(report.expired.len(), 1);
    assert!(manager.find(ctx.uuid()).await.unwrap_err().is_session_timed_out());

    handle.shutdown().await;
}

/// Delays every close the way a remote store would.
struct SlowCloseProvider {
    inner: Arc<dyn SessionProvider>,
    delay: Duration,
}

#[async_trait]
impl SessionProvider for SlowCloseProvider {
    fn name(&self) -> &str {
        "slow-close"
    }

    async fn execute_update(
        &self,
        record: SessionRecord,
        user_id: i64,
        sudoer_id: Option<i64>,
    ) -> tether::Result<SessionRecord> {
        self.inner.execute_update(record, user_id, sudoer_id).await
    }

    async fn execute_close_session(&self, uuid: &str) -> tether::Result<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.execute_close_session(uuid).await
    }

    async fn execute_internal_session(
        &self,
        uuid: &str,
        seed: SessionRecord,
    ) -> tether::Result<SessionRecord> {
        self.inner.execute_internal_session(uuid, seed).await
    }

    async fn execute_next_session_id(&self) -> tether::Result<i64> {
        self.inner.execute_next_session_id().await
    }

    async fn find_session_by_id(&self, id: i64) -> tether::Result<Option<SessionRecord>> {
        self.inner.find_session_by_id(id).await
    }

    async fn find_session_by_uuid(&self, uuid: &str) -> tether::Result<Option<SessionRecord>> {
        self.inner.find_session_by_uuid(uuid).await
    }

    async fn find_session_id_by_uuid(&self, uuid: &str) -> tether::Result<Option<i64>> {
        self.inner.find_session_id_by_uuid(uuid).await
    }

    async fn list_open_sessions(&self) -> tether::Result<Vec<SessionRecord>> {
        self.inner.list_open_sessions().await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

async fn slow_close_manager() -> Arc<SessionManager> {
    let clock = Arc::new(tether::FixedClock::new(START));
    let provider = SlowCloseProvider {
        inner: test_provider(clock.clone()).await,
        delay: Duration::from_millis(50),
    };
    Arc::new(SessionManager::with_clock(
        Arc::new(provider),
        test_directory(),
        test_settings(),
        clock,
    ))
}

#[tokio::test]
async fn test_concurrent_double_close_with_slow_provider() {
    let manager = slow_close_manager().await;
    let ctx = manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid();

    let (first, second) = tokio::join!(manager.close(uuid), manager.close(uuid));
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|outcome| outcome.code());
    assert_eq!(
        outcomes,
        vec![CloseOutcome::AlreadyClosed, CloseOutcome::Removed]
    );
    assert!(manager.find(uuid).await.unwrap_err().is_session_removed());
}

#[tokio::test]
async fn test_attach_during_slow_close_is_refused() {
    let manager = slow_close_manager().await;
    let ctx = manager.create(alice()).await.unwrap();
    let uuid = ctx.uuid().to_string();

    let closing = tokio::spawn({
        let manager = manager.clone();
        let uuid = uuid.clone();
        async move { manager.close(&uuid).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = manager.attach(&uuid).await.unwrap_err();
    assert!(err.is_session_removed());
    assert_eq!(closing.await.unwrap().unwrap(), CloseOutcome::Removed);
    assert!(manager.find(&uuid).await.unwrap_err().is_session_removed());
}
