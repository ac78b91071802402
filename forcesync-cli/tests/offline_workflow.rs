//! Workflows the CLI drives: a force created while connected stays usable
//! from the local data directory when the service is gone.

use forcesync_core::config::SyncConfig;
use forcesync_core::model::{ForceHandle, GameSystem};
use forcesync_core::replication::SaveOutcome;
use forcesync_core::store::{FileForceStore, ForceStore};
use forcesync_core::test_utils::{FakeServer, DEFAULT_TEST_TIMEOUT};
use forcesync_core::transport::NetworkMonitor;
use forcesync_core::ForceSyncEngine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.server.endpoint = "memory://sync".to_string();
    config.reconnect.jitter = 0.0;
    config.replication.save_debounce = Duration::from_millis(100);
    config.rpc.call_timeout = Duration::from_millis(500);
    config.rpc.ready_timeout = Duration::from_millis(200);
    config
}

async fn engine(server: &FakeServer, dir: &TempDir) -> ForceSyncEngine {
    let store = Arc::new(FileForceStore::open(dir.path()).await.unwrap());
    let engine = ForceSyncEngine::new(config(), server.connector(), store, NetworkMonitor::default());
    engine.start();
    engine
}

#[tokio::test]
async fn test_created_force_survives_restart_offline() {
    let dir = TempDir::new().unwrap();

    let server = FakeServer::start();
    server.set_responder(|msg| {
        if msg["action"] == "saveForce" {
            vec![FakeServer::reply_to(msg, json!({}))]
        } else {
            vec![]
        }
    });
    let online = engine(&server, &dir).await;
    assert!(online.wait_ready(DEFAULT_TEST_TIMEOUT).await);

    let system = GameSystem::AlphaStrike;
    let mut force = system.new_force("Strike Star");
    let group = force.add_group("Main");
    force.add_unit(&group, system.new_unit("Commando COM-2D")).unwrap();
    let handle = ForceHandle::new(force);
    assert_eq!(online.save_force(&handle).await.unwrap().wait().await, SaveOutcome::Replicated);
    let id = handle.instance_id().await.unwrap();
    online.teardown().await;

    // Second run: the service refuses every connection
    let unreachable = FakeServer::start();
    unreachable.connector().set_refuse(true);
    let offline = engine(&unreachable, &dir).await;
    assert!(!offline.wait_ready(Duration::from_millis(300)).await);

    let listed = offline.list_forces().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].instance_id, id);
    assert!(listed[0].local && !listed[0].remote);

    let loaded = offline.load_force(&id).await.unwrap().unwrap();
    assert_eq!(loaded.lock().await.name(), "Strike Star");
    assert_eq!(loaded.lock().await.unit_count(), 1);

    // Edits made offline stay local
    loaded.lock().await.set_name("Strike Star (field edit)");
    let outcome = offline.save_force(&loaded).await.unwrap().wait().await;
    assert_eq!(outcome, SaveOutcome::LocalOnly);

    let store = FileForceStore::open(dir.path()).await.unwrap();
    assert_eq!(store.get_force(&id).await.unwrap().unwrap().name, "Strike Star (field edit)");
    offline.teardown().await;
}

#[tokio::test]
async fn test_delete_removes_local_file() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::start();
    let engine = engine(&server, &dir).await;
    assert!(engine.wait_ready(DEFAULT_TEST_TIMEOUT).await);

    let handle = ForceHandle::new(GameSystem::Classic.new_force("Scrap"));
    engine.save_force(&handle).await.unwrap();
    let id = handle.instance_id().await.unwrap();

    assert!(engine.delete_force(&id).await.unwrap());
    assert!(engine.list_forces().await.unwrap().is_empty());
    let deleted = server.wait_for_messages("delForce", 1, DEFAULT_TEST_TIMEOUT).await;
    assert_eq!(deleted.len(), 1);
    engine.teardown().await;
}
