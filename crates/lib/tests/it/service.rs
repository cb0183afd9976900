//! End-to-end tests of the client-facing session service.

use std::sync::Arc;

use tether::{Principal, SessionService, service::Caller};

use crate::helpers::{test_manager, test_passwords};

async fn service() -> SessionService {
    let (_clock, manager) = test_manager().await;
    SessionService::new(manager, test_passwords())
}

async fn login(service: &SessionService, user: &str) -> Caller {
    let ctx = service
        .create_session(Principal::new(user), "secret", Some("it".to_string()), None)
        .await
        .unwrap();
    Caller::session(ctx.uuid())
}

#[tokio::test]
async fn test_login_logout_cycle() {
    let service = service().await;
    let caller = login(&service, "bob").await;
    let uuid = caller.uuid().unwrap();

    let ctx = service.get_session(uuid).await.unwrap();
    assert_eq!(ctx.details().user_name, "bob");
    assert_eq!(service.get_reference_count(uuid).await.unwrap(), 0);

    assert_eq!(service.close_session(uuid).await.unwrap(), -1);
    let err = service.get_session(uuid).await.unwrap_err();
    assert!(err.is_session_removed());
    assert!(
        service
            .create_user_session(&caller, None, None, None)
            .await
            .unwrap_err()
            .is_session_removed()
    );
}

#[tokio::test]
async fn test_group_leader_opens_session_for_member() {
    let service = service().await;
    let alice = login(&service, "alice").await;

    let bobs = service
        .create_session_with_timeouts(&alice, Principal::new("bob"), 60_000, 5_000)
        .await
        .unwrap();
    assert_eq!(bobs.details().user_name, "bob");
    assert_eq!(bobs.record().sudoer_id, Some(100));
    assert_eq!(bobs.record().time_to_live, 60_000);

    // Bob sees the session among his own.
    let bob = Caller::session(bobs.uuid());
    let mine = service.get_my_open_sessions(&bob).await.unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn test_detach_then_close() {
    let service = service().await;
    let caller = login(&service, "carol").await;
    let uuid = caller.uuid().unwrap();

    service.manager().attach(uuid).await.unwrap();
    assert_eq!(service.detach_session(uuid).await.unwrap(), 0);
    assert!(service.get_session(uuid).await.is_ok());
    assert_eq!(service.close_session(uuid).await.unwrap(), -1);
}

#[tokio::test]
async fn test_service_is_shareable_across_tasks() {
    let service = Arc::new(service().await);
    let tasks: Vec<_> = ["alice", "bob", "carol"]
        .into_iter()
        .map(|user| {
            let service = service.clone();
            tokio::spawn(async move { login(&service, user).await })
        })
        .collect();

    let mut uuids = Vec::new();
    for task in tasks {
        uuids.push(task.await.unwrap().uuid().unwrap().to_string());
    }
    uuids.sort();
    uuids.dedup();
    assert_eq!(uuids.len(), 3);
}
