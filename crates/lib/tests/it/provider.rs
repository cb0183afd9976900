//! Tests for the session providers and their composition.

use std::sync::Arc;

use tether::{
    FixedClock, SessionProvider, SessionRecord,
    provider::{CompositeProvider, InMemoryProvider, ProviderSlot},
};

use crate::helpers::{NODE, START, test_provider};

fn record(started: u64) -> SessionRecord {
    SessionRecord::new(started, "User").with_timeouts(0, 1_000)
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let provider = test_provider(Arc::new(FixedClock::new(START))).await;

    let first = provider.execute_update(record(START), 100, None).await.unwrap();
    let second = provider
        .execute_update(first.clone(), 100, None)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first, second);
    assert_eq!(provider.list_open_sessions().await.unwrap().len(), 1);
    assert_eq!(
        provider.find_session_id_by_uuid(&first.uuid).await.unwrap(),
        first.id
    );
}

#[tokio::test]
async fn test_update_stamps_owner_and_node() {
    let provider = test_provider(Arc::new(FixedClock::new(START))).await;
    let stored = provider
        .execute_update(record(START), 101, Some(100))
        .await
        .unwrap();

    let found = provider
        .find_session_by_id(stored.id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.owner_id, Some(101));
    assert_eq!(found.sudoer_id, Some(100));
    assert_eq!(found.node.as_deref(), Some(NODE));
}

#[tokio::test]
async fn test_closed_is_terminal() {
    let clock = Arc::new(FixedClock::new(START));
    let provider = test_provider(clock.clone()).await;
    let stored = provider.execute_update(record(START), 100, None).await.unwrap();

    clock.advance(500);
    assert!(provider.execute_close_session(&stored.uuid).await.unwrap());
    assert!(!provider.execute_close_session(&stored.uuid).await.unwrap());
    assert!(!provider.execute_close_session("never-existed").await.unwrap());

    let found = provider
        .find_session_by_uuid(&stored.uuid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.closed, Some(START + 500));

    // A closed uuid is never reactivated.
    let err = provider
        .execute_update(stored.clone(), 100, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tether::Error::Provider(ref e) if e.is_closed()
    ));
    assert!(provider.list_open_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_internal_sessions_belong_to_root() {
    let provider = test_provider(Arc::new(FixedClock::new(START))).await;
    let stored = provider
        .execute_internal_session("system-1", record(START))
        .await
        .unwrap();
    assert!(stored.is_internal());
    assert_eq!(stored.uuid, "system-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_never_hides_session_from_readers() {
    let provider = Arc::new(InMemoryProvider::new(NODE));
    let mut uuids = Vec::new();
    for i in 0..200 {
        let stored = provider.execute_update(record(i), 100, None).await.unwrap();
        uuids.push(stored.uuid);
    }
    let uuids = Arc::new(uuids);

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let provider = provider.clone();
            let uuids = uuids.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    for uuid in uuids.iter() {
                        let found = provider.find_session_by_uuid(uuid).await.unwrap();
                        assert!(found.is_some(), "{uuid} vanished while closing");
                    }
                }
            })
        })
        .collect();

    for uuid in uuids.iter() {
        provider.execute_close_session(uuid).await.unwrap();
        tokio::task::yield_now().await;
    }
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(provider.open_count(), 0);
    assert_eq!(provider.closed_count(), 200);
}

#[tokio::test]
async fn test_closed_sessions_are_bounded() {
    let provider = InMemoryProvider::with_capacity(NODE, 2);
    let mut uuids = Vec::new();
    for i in 0..3 {
        let stored = provider.execute_update(record(i), 100, None).await.unwrap();
        provider.execute_close_session(&stored.uuid).await.unwrap();
        uuids.push(stored.uuid);
    }

    assert_eq!(provider.closed_count(), 2);
    assert!(provider.find_session_by_uuid(&uuids[0]).await.unwrap().is_none());
    assert!(provider.find_session_by_uuid(&uuids[2]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_composite_routes_to_owner() {
    let primary = Arc::new(InMemoryProvider::new("primary"));
    let secondary = Arc::new(InMemoryProvider::new("secondary"));
    let composite = CompositeProvider::new(vec![
        ProviderSlot::writable(primary.clone()),
        ProviderSlot::writable(secondary.clone()),
    ])
    .unwrap();

    let foreign = secondary.execute_update(record(1), 100, None).await.unwrap();
    let native = composite.execute_update(record(2), 100, None).await.unwrap();
    assert_eq!(native.node.as_deref(), Some("primary"));

    // Updating the foreign session leaves it with its owner.
    let updated = composite
        .execute_update(foreign.clone(), 101, None)
        .await
        .unwrap();
    assert_eq!(updated.node.as_deref(), Some("secondary"));
    assert_eq!(secondary.open_count(), 1);
    assert_eq!(primary.open_count(), 1);

    assert!(composite.execute_close_session(&foreign.uuid).await.unwrap());
    assert_eq!(secondary.closed_count(), 1);

    let open = composite.list_open_sessions().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].uuid, native.uuid);
}

#[tokio::test]
async fn test_composite_requires_a_writable_slot() {
    let err = CompositeProvider::new(vec![ProviderSlot::read_only(Arc::new(
        InMemoryProvider::new(NODE),
    ))])
    .unwrap_err();
    assert!(matches!(
        err,
        tether::Error::Provider(ref e) if e.is_configuration_error()
    ));
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use tether::provider::sql::SqlxProvider;

    #[tokio::test]
    async fn test_ids_are_disjoint_across_providers() {
        let memory = Arc::new(InMemoryProvider::new(NODE));
        let durable = Arc::new(SqlxProvider::sqlite_in_memory(NODE).await.unwrap());
        let composite = CompositeProvider::new(vec![
            ProviderSlot::writable(memory.clone()),
            ProviderSlot::writable(durable.clone()),
        ])
        .unwrap();

        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(composite.execute_update(record(i), 100, None).await.unwrap().id.unwrap());
            ids.push(durable.execute_update(record(i), 100, None).await.unwrap().id.unwrap());
            ids.push(composite.execute_next_session_id().await.unwrap());
            ids.push(durable.execute_next_session_id().await.unwrap());
        }

        let negatives = ids.iter().filter(|id| **id < 0).count();
        let positives = ids.iter().filter(|id| **id > 0).count();
        assert_eq!(negatives, 20);
        assert_eq!(positives, 20);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 40);
    }

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        let stored = {
            let provider = SqlxProvider::open_sqlite(&path, NODE).await.unwrap();
            let stored = provider.execute_update(record(START), 100, None).await.unwrap();
            provider.close().await;
            stored
        };

        let provider = SqlxProvider::open_sqlite(&path, NODE).await.unwrap();
        let found = provider
            .find_session_by_uuid(&stored.uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, stored);

        // The sequence continues instead of restarting.
        let next = provider.execute_update(record(START), 100, None).await.unwrap();
        assert!(next.id.unwrap() > stored.id.unwrap());
    }
}
