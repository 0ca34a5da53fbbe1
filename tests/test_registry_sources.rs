// ABOUTME: Source resolution and merged-view behavior of the container registry

use std::path::PathBuf;
use std::sync::Arc;

use tmuxdeck::bridge::BridgeHub;
use tmuxdeck::debug_ring::DebugRing;
use tmuxdeck::docker::DockerEngine;
use tmuxdeck::error::ApiError;
use tmuxdeck::notify::NotificationRouter;
use tmuxdeck::registry::ContainerRegistry;
use tmuxdeck::store::StateStore;
use tmuxdeck::tmux::{TmuxAdapter, TmuxSource};

fn make_registry(host_socket: Option<PathBuf>) -> (Arc<ContainerRegistry>, Arc<BridgeHub>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let ring = Arc::new(DebugRing::new());
    let docker = Arc::new(DockerEngine::connect(
        Some("/nonexistent/docker.sock"),
        "tmuxdeck-",
    ));
    let hub = Arc::new(BridgeHub::new(store.clone(), ring.clone()));
    let adapter = TmuxAdapter::new(docker.clone(), hub.clone());
    let router = Arc::new(NotificationRouter::new(store.clone(), ring, None));
    let registry = Arc::new(ContainerRegistry::new(
        docker,
        adapter,
        hub.clone(),
        store,
        router,
        host_socket,
    ));
    (registry, hub, dir)
}

#[tokio::test]
async fn local_resolves_to_default_socket() {
    let (registry, _hub, _dir) = make_registry(None);
    let source = registry.resolve_source("local").unwrap();
    assert_eq!(source, TmuxSource::LocalProcess { socket_path: None });
}

#[tokio::test]
async fn host_requires_a_configured_socket() {
    let (registry, _hub, _dir) = make_registry(None);
    assert!(matches!(
        registry.resolve_source("host"),
        Err(ApiError::TargetMissing(_))
    ));

    let socket = PathBuf::from("/tmp/host-tmux.sock");
    let (registry, _hub, _dir) = make_registry(Some(socket.clone()));
    let source = registry.resolve_source("host").unwrap();
    assert_eq!(
        source,
        TmuxSource::LocalProcess {
            socket_path: Some(socket)
        }
    );
}

#[tokio::test]
async fn bridge_ids_resolve_only_for_known_records() {
    let (registry, hub, _dir) = make_registry(None);
    assert!(matches!(
        registry.resolve_source("bridge:ghost"),
        Err(ApiError::TargetMissing(_))
    ));

    let (record, _token) = hub.create("pi").unwrap();
    let source = registry.resolve_source(&format!("bridge:{}", record.id)).unwrap();
    assert_eq!(
        source,
        TmuxSource::Bridge {
            bridge_id: record.id
        }
    );
}

#[tokio::test]
async fn unknown_container_ids_are_missing_targets() {
    let (registry, _hub, _dir) = make_registry(None);
    assert!(matches!(
        registry.resolve_source("deadbeef"),
        Err(ApiError::TargetMissing(_))
    ));
}

#[tokio::test]
async fn merged_list_survives_engine_outage() {
    // The docker socket points nowhere, but the poll must still produce the
    // synthesized entries and record the engine error for clients.
    let (registry, hub, _dir) = make_registry(Some(PathBuf::from("/tmp/host.sock")));
    let (record, _token) = hub.create("pi").unwrap();

    registry.poll().await;

    let list = registry.list();
    let ids: Vec<_> = list.containers.iter().map(|c| c.id.as_str()).collect();
    assert!(ids.contains(&"host"));
    assert!(ids.contains(&"local"));
    let bridge_id = format!("bridge:{}", record.id);
    assert!(ids.contains(&bridge_id.as_str()));
    assert!(list.docker_error.is_some());
}

#[tokio::test]
async fn concurrent_polls_share_one_refresh() {
    let (registry, _hub, _dir) = make_registry(None);
    // All three await the same in-flight pass and none deadlocks.
    tokio::join!(registry.poll(), registry.poll(), registry.poll());
    assert!(registry.list().containers.iter().any(|c| c.id == "local"));
}
