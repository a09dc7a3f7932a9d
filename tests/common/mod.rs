#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use insight_sync::application::ports::ConnectivityProbe;
use insight_sync::domain::entities::EntityPayload;
use insight_sync::domain::value_objects::{EntityKind, UserId};
use insight_sync::infrastructure::network::ManualConnectivity;
use insight_sync::infrastructure::remote::InMemoryRemote;
use insight_sync::{AppConfig, SyncRuntime};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const TEST_USER: &str = "user-456";

pub struct TestContext {
    pub runtime: SyncRuntime,
    pub remote: Arc<InMemoryRemote>,
    pub network: Arc<ManualConnectivity>,
    pub dir: TempDir,
}

pub fn user() -> UserId {
    UserId::new(TEST_USER.into()).expect("user id")
}

pub fn test_config(db_path: &Path, realtime: bool) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = format!("sqlite:{}?mode=rwc", db_path.display());
    config.sync.auto_sync = false;
    config.realtime.enabled = realtime;
    config
}

pub async fn open_runtime(
    db_path: &Path,
    realtime: bool,
    network: Arc<ManualConnectivity>,
) -> SyncRuntime {
    let connectivity: Arc<dyn ConnectivityProbe> = network;
    SyncRuntime::new(test_config(db_path, realtime), connectivity)
        .await
        .expect("runtime")
}

/// A signed-in runtime over a fresh database file.
pub async fn setup(online: bool, realtime: bool) -> TestContext {
    insight_sync::init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let network = Arc::new(ManualConnectivity::new(online));
    let runtime = open_runtime(&dir.path().join("sync.db"), realtime, network.clone()).await;
    let remote = Arc::new(InMemoryRemote::new());
    runtime
        .initialize(remote.clone(), user())
        .await
        .expect("initialize");

    TestContext {
        runtime,
        remote,
        network,
        dir,
    }
}

pub fn payload(kind: EntityKind, fields: Value) -> EntityPayload {
    let map = fields.as_object().cloned().unwrap_or_default();
    EntityPayload::from_remote_row(kind, &map).expect("payload")
}

pub fn goal(title: &str) -> EntityPayload {
    payload(EntityKind::Goals, json!({ "title": title }))
}

pub fn entry(title: &str) -> EntityPayload {
    payload(
        EntityKind::Entries,
        json!({ "title": title, "body_markdown": format!("# {title}") }),
    )
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
