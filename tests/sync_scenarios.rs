mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{entry, eventually, goal, open_runtime, setup, user};
use insight_sync::application::ports::{LocalStore, RemoteStore};
use insight_sync::application::services::{
    AppliedChange, DrainOutcome, SubscriptionState, SyncOutcome,
};
use insight_sync::domain::entities::{ChangeEvent, ChangeEventType, EntityPayload};
use insight_sync::domain::value_objects::{EntityKind, RemoteId, SyncQueueStatus, SyncStatus};
use insight_sync::infrastructure::network::ManualConnectivity;
use insight_sync::infrastructure::remote::InMemoryRemote;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

fn title_of(payload: &EntityPayload) -> &str {
    match payload {
        EntityPayload::Goal(goal) => &goal.title,
        EntityPayload::Entry(entry) => &entry.title,
        _ => "",
    }
}

async fn next_change(receiver: &mut mpsc::UnboundedReceiver<AppliedChange>) -> AppliedChange {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for a realtime change")
        .expect("listener dropped")
}

#[tokio::test]
async fn created_record_is_linked_after_reconnect() {
    let ctx = setup(false, true).await;
    let record = ctx.runtime.create_record(goal("Run a marathon")).await.unwrap();

    let counts = ctx.runtime.offline.get_queue_counts().await.unwrap();
    assert_eq!(counts.pending, 1);
    assert_eq!(ctx.remote.call_counts().inserts, 0);

    ctx.network.set_online(true);

    let runtime = &ctx.runtime;
    let local_id = &record.local_id;
    let linked = eventually(move || async move {
        runtime
            .local_store
            .find_by_local_id(EntityKind::Goals, local_id)
            .await
            .unwrap()
            .is_some_and(|stored| {
                stored.remote_id.is_some() && stored.sync_status == SyncStatus::Synced
            })
    })
    .await;
    assert!(linked, "record was not linked to a remote row");

    let completed = eventually(move || async move {
        runtime.offline.get_queue_counts().await.unwrap().completed == 1
    })
    .await;
    assert!(completed);

    // The echo of our own insert must not create a second local row.
    let echoed = eventually(move || async move {
        runtime.metrics.snapshot().realtime_apply.successes >= 1
    })
    .await;
    assert!(echoed);
    let goals = ctx.runtime.list_records(EntityKind::Goals).await.unwrap();
    assert_eq!(goals.len(), 1);
    assert_eq!(ctx.remote.row_count(EntityKind::Goals).await, 1);

    ctx.runtime.close().await;
}

#[tokio::test]
async fn newer_remote_edit_overwrites_pending_local_edit() {
    let ctx = setup(false, false).await;
    let record = ctx.runtime.create_record(goal("v0")).await.unwrap();
    assert!(ctx.runtime.engine.sync().await.is_success());

    let remote_id = ctx
        .runtime
        .local_store
        .find_by_local_id(EntityKind::Goals, &record.local_id)
        .await
        .unwrap()
        .and_then(|stored| stored.remote_id)
        .expect("pushed record has a remote id");

    // Device B edits offline; device A edits the same row remotely afterwards.
    ctx.runtime
        .update_record(&record.local_id, goal("B edit"))
        .await
        .unwrap();
    let mut fields = Map::new();
    fields.insert("title".into(), Value::String("A edit".into()));
    ctx.remote
        .update(EntityKind::Goals, &user(), &remote_id, fields)
        .await
        .unwrap();

    ctx.remote.fail_next_writes(1);
    let SyncOutcome::Completed(report) = ctx.runtime.engine.sync().await else {
        panic!("sync should complete even when a push fails");
    };
    assert_eq!(report.push_failures, 1);

    let stored = ctx
        .runtime
        .local_store
        .find_by_local_id(EntityKind::Goals, &record.local_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(title_of(&stored.payload), "A edit");
    assert_eq!(stored.sync_status, SyncStatus::Synced);

    // The stale item still goes out once retried and overwrites A's edit remotely.
    assert_eq!(ctx.runtime.offline.retry_all_failed().await.unwrap(), 1);
    assert!(ctx.runtime.engine.sync().await.is_success());
    let remote_row = ctx.remote.row(EntityKind::Goals, &remote_id).await.unwrap();
    assert_eq!(remote_row.fields.get("title"), Some(&json!("B edit")));

    ctx.runtime.close().await;
}

#[tokio::test]
async fn realtime_tombstone_for_unknown_record_writes_nothing() {
    let ctx = setup(true, true).await;
    let (sender, mut changes) = mpsc::unbounded_channel();
    ctx.runtime
        .realtime
        .on_changes(Arc::new(move |change: &AppliedChange| {
            let _ = sender.send(change.clone());
        }))
        .await;

    ctx.remote
        .emit(
            &user(),
            ChangeEvent {
                table: EntityKind::Entries,
                event_type: ChangeEventType::Update,
                new: Some(json!({
                    "id": "entry-unknown",
                    "user_id": common::TEST_USER,
                    "title": "gone",
                    "updated_at": "2024-03-01T10:00:00Z",
                    "deleted_at": "2024-03-01T10:00:00Z"
                })),
                old: None,
            },
        )
        .await;
    ctx.remote
        .emit(
            &user(),
            ChangeEvent {
                table: EntityKind::Entries,
                event_type: ChangeEventType::Insert,
                new: Some(json!({
                    "id": "entry-live",
                    "user_id": common::TEST_USER,
                    "title": "live",
                    "updated_at": "2024-03-01T10:00:01Z"
                })),
                old: None,
            },
        )
        .await;

    let change = next_change(&mut changes).await;
    assert_eq!(change.remote_id.map(|id| id.to_string()), Some("entry-live".into()));

    let unknown = RemoteId::new("entry-unknown".into()).unwrap();
    assert!(ctx
        .runtime
        .local_store
        .find_by_remote_id(EntityKind::Entries, &unknown)
        .await
        .unwrap()
        .is_none());
    assert_eq!(ctx.runtime.list_records(EntityKind::Entries).await.unwrap().len(), 1);

    ctx.runtime.close().await;
}

#[tokio::test]
async fn pull_and_realtime_deliveries_converge() {
    let ctx = setup(false, true).await;
    let row = json!({
        "id": "goal-123",
        "user_id": common::TEST_USER,
        "title": "Shared goal",
        "archived": false,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-02T00:00:00Z"
    });
    ctx.remote.seed(EntityKind::Goals, row.clone()).await.unwrap();

    assert!(ctx.runtime.engine.sync().await.is_success());
    let remote_id = RemoteId::new("goal-123".into()).unwrap();
    let after_pull = ctx
        .runtime
        .local_store
        .find_by_remote_id(EntityKind::Goals, &remote_id)
        .await
        .unwrap()
        .unwrap();

    ctx.remote
        .emit(
            &user(),
            ChangeEvent {
                table: EntityKind::Goals,
                event_type: ChangeEventType::Update,
                new: Some(row),
                old: None,
            },
        )
        .await;
    let runtime = &ctx.runtime;
    let applied = eventually(move || async move {
        runtime.metrics.snapshot().realtime_apply.successes >= 1
    })
    .await;
    assert!(applied);

    let after_realtime = ctx
        .runtime
        .local_store
        .find_by_remote_id(EntityKind::Goals, &remote_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_pull, after_realtime);

    ctx.runtime.close().await;
}

#[tokio::test]
async fn offline_mutations_accumulate_and_collapse_per_record() {
    let ctx = setup(false, false).await;
    let first = ctx.runtime.create_record(goal("one")).await.unwrap();
    ctx.runtime.create_record(goal("two")).await.unwrap();
    ctx.runtime
        .update_record(&first.local_id, goal("one, edited"))
        .await
        .unwrap();

    let counts = ctx.runtime.offline.get_queue_counts().await.unwrap();
    assert_eq!(counts.pending, 2);
    assert_eq!(ctx.runtime.offline.process_queue().await, DrainOutcome::Offline);

    let active = ctx
        .runtime
        .queue
        .find_active(EntityKind::Goals, &first.local_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.payload.get("title"), Some(&json!("one, edited")));
    assert_eq!(active.status, SyncQueueStatus::Pending);

    let calls = ctx.remote.call_counts();
    assert_eq!(calls.inserts + calls.updates + calls.deletes, 0);

    ctx.runtime.close().await;
}

#[tokio::test]
async fn deletes_follow_soft_and_hard_semantics_remotely() {
    let ctx = setup(false, false).await;
    let note = ctx.runtime.create_record(entry("note")).await.unwrap();
    let plan = ctx.runtime.create_record(goal("plan")).await.unwrap();
    assert!(ctx.runtime.engine.sync().await.is_success());

    let note_remote = ctx
        .runtime
        .local_store
        .find_by_local_id(EntityKind::Entries, &note.local_id)
        .await
        .unwrap()
        .and_then(|record| record.remote_id)
        .unwrap();
    let plan_remote = ctx
        .runtime
        .local_store
        .find_by_local_id(EntityKind::Goals, &plan.local_id)
        .await
        .unwrap()
        .and_then(|record| record.remote_id)
        .unwrap();

    ctx.runtime
        .delete_record(EntityKind::Entries, &note.local_id)
        .await
        .unwrap();
    ctx.runtime
        .delete_record(EntityKind::Goals, &plan.local_id)
        .await
        .unwrap();
    assert!(ctx.runtime.engine.sync().await.is_success());

    let tombstoned = ctx.remote.row(EntityKind::Entries, &note_remote).await.unwrap();
    assert!(tombstoned.is_tombstone());
    assert!(ctx.remote.row(EntityKind::Goals, &plan_remote).await.is_none());

    let local_note = ctx
        .runtime
        .local_store
        .find_by_local_id(EntityKind::Entries, &note.local_id)
        .await
        .unwrap()
        .unwrap();
    assert!(local_note.is_deleted());
    assert_eq!(local_note.sync_status, SyncStatus::Synced);

    ctx.runtime.close().await;
}

#[tokio::test]
async fn reset_and_sync_rebuilds_from_remote() {
    let ctx = setup(false, false).await;
    ctx.runtime.create_record(goal("keep me")).await.unwrap();
    assert!(ctx.runtime.engine.sync().await.is_success());
    ctx.runtime.create_record(goal("never pushed")).await.unwrap();

    let outcome = ctx.runtime.engine.reset_and_sync().await;
    assert!(outcome.is_success(), "{outcome:?}");

    let goals = ctx.runtime.list_records(EntityKind::Goals).await.unwrap();
    assert_eq!(goals.len(), 1);
    assert_eq!(title_of(&goals[0].payload), "keep me");
    assert_eq!(
        ctx.runtime.offline.get_queue_counts().await.unwrap().outstanding(),
        0
    );

    ctx.runtime.close().await;
}

#[tokio::test]
async fn queue_and_watermark_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sync.db");
    let remote = Arc::new(InMemoryRemote::new());

    let network = Arc::new(ManualConnectivity::new(false));
    let runtime = open_runtime(&db_path, false, network.clone()).await;
    runtime.initialize(remote.clone(), user()).await.unwrap();
    runtime.create_record(goal("first")).await.unwrap();
    runtime.create_record(goal("second")).await.unwrap();
    runtime.close().await;

    let runtime = open_runtime(&db_path, false, network.clone()).await;
    runtime.initialize(remote.clone(), user()).await.unwrap();
    assert_eq!(runtime.offline.get_queue_counts().await.unwrap().pending, 2);
    assert_eq!(runtime.engine.get_state().await.pending_changes, 2);

    let SyncOutcome::Completed(report) = runtime.engine.sync().await else {
        panic!("sync after restart failed");
    };
    assert_eq!(report.pushed, 2);
    let watermark = runtime.engine.get_state().await.last_sync_at;
    assert!(watermark.is_some());
    runtime.close().await;

    let runtime = open_runtime(&db_path, false, network).await;
    runtime.initialize(remote.clone(), user()).await.unwrap();
    let state = runtime.engine.get_state().await;
    assert_eq!(state.last_sync_at, watermark);
    assert_eq!(state.pending_changes, 0);
    assert_eq!(remote.row_count(EntityKind::Goals).await, 2);
    runtime.close().await;
}

#[tokio::test]
async fn runtime_state_aggregates_every_component() {
    let ctx = setup(false, true).await;
    ctx.runtime.create_record(goal("tracked")).await.unwrap();
    ctx.remote.fail_next_writes(1);
    assert!(ctx.runtime.engine.sync().await.is_success());

    let state = ctx.runtime.get_state().await.unwrap();
    assert_eq!(state.queue.failed, 1);
    assert_eq!(state.sync.pending_changes, 1);
    assert!(state.sync.last_sync_at.is_some());
    assert_eq!(state.metrics.push.failures, 1);
    assert_eq!(state.realtime.len(), EntityKind::ALL.len());
    assert!(state
        .realtime
        .values()
        .all(|channel| *channel != SubscriptionState::Uninitialized));

    ctx.runtime.shutdown().await;
    let stopped = ctx.runtime.get_state().await.unwrap();
    assert!(stopped
        .realtime
        .values()
        .all(|channel| *channel == SubscriptionState::Stopped));
    ctx.runtime.close().await;
}
