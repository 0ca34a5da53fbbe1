// ABOUTME: Bridge hub record lifecycle and offline-operation behavior

use std::sync::Arc;

use tmuxdeck::auth::verify_secret;
use tmuxdeck::bridge::protocol::AdapterOp;
use tmuxdeck::bridge::BridgeHub;
use tmuxdeck::debug_ring::DebugRing;
use tmuxdeck::models::PaneTarget;
use tmuxdeck::store::StateStore;
use tmuxdeck::tmux::TmuxError;

fn make_hub() -> (Arc<BridgeHub>, Arc<StateStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let ring = Arc::new(DebugRing::new());
    (
        Arc::new(BridgeHub::new(store.clone(), ring)),
        store,
        dir,
    )
}

#[tokio::test]
async fn creation_returns_cleartext_token_exactly_once() {
    let (hub, store, _dir) = make_hub();
    let (record, token) = hub.create("raspberry").unwrap();

    assert!(record.enabled);
    assert!(verify_secret(&token, &record.token_hash));

    // Nothing recoverable from persisted state: only the hash is stored.
    let persisted = store.load_bridges();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].token_hash, record.token_hash);
    let raw = std::fs::read_to_string(store.data_dir().join("bridges.json")).unwrap();
    assert!(!raw.contains(&token));
}

#[tokio::test]
async fn records_survive_reload() {
    let (hub, store, _dir) = make_hub();
    let (record, _token) = hub.create("pi").unwrap();

    let ring = Arc::new(DebugRing::new());
    let reloaded = BridgeHub::new(store, ring);
    let listed = reloaded.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0.id, record.id);
    // No live connection after a restart.
    assert!(!listed[0].1);
}

#[tokio::test]
async fn delete_removes_record() {
    let (hub, store, _dir) = make_hub();
    let (record, _) = hub.create("pi").unwrap();
    hub.delete(&record.id).unwrap();
    assert!(hub.list().is_empty());
    assert!(store.load_bridges().is_empty());
    assert!(hub.delete(&record.id).is_err());
}

#[tokio::test]
async fn disabled_records_are_persisted() {
    let (hub, store, _dir) = make_hub();
    let (record, _) = hub.create("pi").unwrap();
    hub.set_enabled(&record.id, false).unwrap();
    assert!(!store.load_bridges()[0].enabled);
    hub.set_enabled(&record.id, true).unwrap();
    assert!(store.load_bridges()[0].enabled);
}

#[tokio::test]
async fn ops_against_offline_bridge_fail_as_source_unavailable() {
    let (hub, _store, _dir) = make_hub();
    let (record, _) = hub.create("pi").unwrap();

    let err = hub
        .call_op(&record.id, AdapterOp::ListSessions)
        .await
        .unwrap_err();
    assert!(matches!(err, TmuxError::SourceUnavailable(_)));

    let target = PaneTarget::new(format!("bridge:{}", record.id), "main", 0);
    let err = hub.open_stream(&record.id, &target).await.unwrap_err();
    assert!(matches!(err, TmuxError::SourceUnavailable(_)));
}

#[tokio::test]
async fn snapshot_is_none_for_unconnected_bridge() {
    let (hub, _store, _dir) = make_hub();
    let (record, _) = hub.create("pi").unwrap();
    assert!(hub.session_snapshot(&record.id).is_none());
    assert!(!hub.connected(&record.id));
}
