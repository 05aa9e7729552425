//! Integration tests for subscriptions, request churn and pulls.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tasksync_core::{RecordKind, Revision, UserId};
use tasksync_protocol::{CreateRequest, PullRequest, UpdateRequest, WireChange};
use tasksync_server::{ConnectionState, Listener, ListenerError, ServerConfig, SyncServer};

const GRACE: Duration = Duration::from_millis(600);
const DEBOUNCE: Duration = Duration::from_millis(200);

fn server(dir: &tempfile::TempDir) -> SyncServer {
    SyncServer::new(
        ServerConfig::new(dir.path())
            .with_drain_grace(GRACE)
            .with_store_debounce(DEBOUNCE),
    )
}

fn alice() -> UserId {
    UserId::parse("alice").unwrap()
}

fn recorder() -> (Arc<Mutex<Vec<Revision>>>, Listener) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&log);
    let listener: Listener = Arc::new(move |rev: Revision| -> Result<(), ListenerError> {
        shared.lock().push(rev);
        Ok(())
    });
    (log, listener)
}

#[tokio::test]
async fn subscriber_is_notified_once_per_burst() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&dir);
    let user = alice();
    let (log, listener) = recorder();
    let session = server.subscribe(&user, listener).await.unwrap();

    for key in ["T1", "T2", "T3"] {
        server
            .handle_create(
                &user,
                CreateRequest::new(RecordKind::Task, key).with_attribute("done", json!(false)),
            )
            .await
            .unwrap();
    }
    tokio::time::sleep(DEBOUNCE * 3).await;
    assert_eq!(*log.lock(), [Revision::new(3)]);

    // The notified revision is a valid baseline: nothing is newer.
    let pulled = server
        .handle_pull(&user, PullRequest::new(Revision::new(3)))
        .await
        .unwrap();
    assert!(pulled.changes.is_empty());

    server.unsubscribe(session).unwrap();
}

#[tokio::test]
async fn every_session_of_a_user_is_notified() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&dir);
    let user = alice();
    let (first_log, first) = recorder();
    let (second_log, second) = recorder();
    let a = server.subscribe(&user, first).await.unwrap();
    let b = server.subscribe(&user, second).await.unwrap();

    server
        .handle_create(&user, CreateRequest::new(RecordKind::Sprint, "S1"))
        .await
        .unwrap();
    tokio::time::sleep(DEBOUNCE * 3).await;

    assert_eq!(*first_log.lock(), [Revision::new(1)]);
    assert_eq!(*second_log.lock(), [Revision::new(1)]);
    server.unsubscribe(a).unwrap();
    server.unsubscribe(b).unwrap();
}

#[tokio::test]
async fn resubscribe_within_grace_keeps_store_and_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&dir);
    let user = alice();

    let (_, listener) = recorder();
    let first = server.subscribe(&user, listener).await.unwrap();
    server.unsubscribe(first).unwrap();
    assert_eq!(server.connections().state(&user), ConnectionState::Draining);

    let (log, listener) = recorder();
    let second = server.subscribe(&user, listener).await.unwrap();
    assert_eq!(server.connections().state(&user), ConnectionState::Open);

    tokio::time::sleep(GRACE * 2).await;
    server
        .handle_create(&user, CreateRequest::new(RecordKind::Todo, "D1"))
        .await
        .unwrap();
    tokio::time::sleep(DEBOUNCE * 3).await;

    assert_eq!(*log.lock(), [Revision::new(1)]);
    let stats = server.connections().stats();
    assert_eq!(stats.opens, 1);
    assert_eq!(stats.closes, 0);
    server.unsubscribe(second).unwrap();
}

#[tokio::test]
async fn store_reopens_after_drain_with_recovered_revision() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&dir);
    let user = alice();

    server
        .handle_create(&user, CreateRequest::new(RecordKind::Task, "T1"))
        .await
        .unwrap();
    tokio::time::sleep(GRACE * 2).await;
    assert_eq!(server.connections().state(&user), ConnectionState::Closed);

    let updated = server
        .handle_update(
            &user,
            UpdateRequest::new(RecordKind::Task, "T1", Revision::new(1))
                .with_modification("done", json!(true)),
        )
        .await
        .unwrap();
    assert_eq!(updated.revision, Some(2));
    assert_eq!(server.connections().stats().opens, 2);
}

#[tokio::test]
async fn pull_after_update_matches_wire_format() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&dir);
    let user = alice();

    server
        .handle_create(
            &user,
            CreateRequest::new(RecordKind::Task, "T1")
                .with_attribute("description", json!("buy milk"))
                .with_attribute("tags", json!(["home"])),
        )
        .await
        .unwrap();
    server
        .handle_update(
            &user,
            UpdateRequest::new(RecordKind::Task, "T1", Revision::new(1))
                .with_modification("done", json!(true)),
        )
        .await
        .unwrap();

    let pulled = server
        .handle_pull(&user, PullRequest::new(Revision::new(1)))
        .await
        .unwrap();
    assert_eq!(pulled.revision, 2);
    assert_eq!(
        serde_json::to_value(&pulled.changes).unwrap(),
        json!([{"type": "Update", "kind": "task", "key": "T1", "rev": 2, "mods": {"done": true}}])
    );

    let fresh = server
        .handle_pull(&user, PullRequest::new(Revision::ZERO))
        .await
        .unwrap();
    match &fresh.changes[0] {
        WireChange::Create { obj, rev, .. } => {
            assert_eq!(*rev, 2);
            assert_eq!(obj["description"], json!("buy milk"));
            assert_eq!(obj["done"], json!(true));
            assert_eq!(obj["tags"], json!({"home": true}));
        }
        other => panic!("expected create, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_update_reports_dropped_field() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&dir);
    let user = alice();

    server
        .handle_create(&user, CreateRequest::new(RecordKind::Task, "T1"))
        .await
        .unwrap();
    server
        .handle_update(
            &user,
            UpdateRequest::new(RecordKind::Task, "T1", Revision::new(1))
                .with_modification("description", json!("mine")),
        )
        .await
        .unwrap();

    let stale = server
        .handle_update(
            &user,
            UpdateRequest::new(RecordKind::Task, "T1", Revision::new(1))
                .with_modification("description", json!("theirs")),
        )
        .await
        .unwrap();
    assert_eq!(stale.revision, None);
    assert_eq!(stale.dropped, ["description"]);
    assert_eq!(stale.record.attributes["description"], json!("mine"));
}
