use crate::application::ports::LocalStore;
use crate::domain::entities::{
    plan_remote_delete, plan_remote_upsert, ChangeEvent, ChangeEventType, RemoteRow,
    RemoteSnapshot, TombstonePlan, UpsertPlan,
};
use crate::domain::value_objects::lenient::timestamp_from_value;
use crate::domain::value_objects::timestamp::now_millis;
use crate::domain::value_objects::{EntityKind, UserId};
use crate::shared::error::AppError;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Tombstoned,
    Removed,
    Unchanged,
    SkippedStale,
    Ignored,
}

impl ApplyOutcome {
    /// Local rows written by this outcome.
    pub fn writes(&self) -> u32 {
        match self {
            ApplyOutcome::Inserted
            | ApplyOutcome::Updated
            | ApplyOutcome::Tombstoned
            | ApplyOutcome::Removed => 1,
            ApplyOutcome::Unchanged | ApplyOutcome::SkippedStale | ApplyOutcome::Ignored => 0,
        }
    }
}

/// Materializes remote state into the local store. Pull and realtime both go through here,
/// so a row delivered twice by either path lands on the same local state.
pub struct RemoteChangeApplier {
    store: Arc<dyn LocalStore>,
    links: Mutex<()>,
}

impl RemoteChangeApplier {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            links: Mutex::new(()),
        }
    }

    /// Held while a pushed insert is linked to its new remote id, so an echo of that insert
    /// cannot be applied before the local record carries the id.
    pub async fn lock_links(&self) -> MutexGuard<'_, ()> {
        self.links.lock().await
    }

    pub async fn apply_row(
        &self,
        kind: EntityKind,
        row: &RemoteRow,
        user_id: &UserId,
    ) -> Result<ApplyOutcome, AppError> {
        let _links = self.lock_links().await;
        self.apply_row_locked(kind, row, user_id).await
    }

    pub async fn apply_event(
        &self,
        event: &ChangeEvent,
        user_id: &UserId,
    ) -> Result<ApplyOutcome, AppError> {
        let _links = self.lock_links().await;

        match event.event_type {
            ChangeEventType::Insert | ChangeEventType::Update => {
                let row = event
                    .new_row()
                    .ok_or_else(|| {
                        AppError::InvalidInput(format!(
                            "{:?} event on {} carries no row",
                            event.event_type, event.table
                        ))
                    })?
                    .map_err(AppError::DeserializationError)?;
                self.apply_row_locked(event.table, &row, user_id).await
            }
            ChangeEventType::Delete => self.apply_delete(event).await,
        }
    }

    async fn apply_row_locked(
        &self,
        kind: EntityKind,
        row: &RemoteRow,
        user_id: &UserId,
    ) -> Result<ApplyOutcome, AppError> {
        let snapshot = RemoteSnapshot::from_row(kind, row, user_id)
            .map_err(AppError::DeserializationError)?;
        let existing = self.store.find_by_remote_id(kind, &snapshot.remote_id).await?;

        if row.is_tombstone() && existing.is_none() {
            return Ok(ApplyOutcome::Ignored);
        }

        let outcome = match plan_remote_upsert(existing.as_ref(), &snapshot) {
            UpsertPlan::Unchanged => return Ok(ApplyOutcome::Unchanged),
            UpsertPlan::Stale => return Ok(ApplyOutcome::SkippedStale),
            UpsertPlan::Insert => ApplyOutcome::Inserted,
            UpsertPlan::Overwrite => {
                let newly_deleted = existing
                    .as_ref()
                    .is_some_and(|record| !record.is_deleted());
                if row.is_tombstone() && newly_deleted {
                    ApplyOutcome::Tombstoned
                } else {
                    ApplyOutcome::Updated
                }
            }
        };

        let record = snapshot.materialize(existing.as_ref(), now_millis());
        self.store.upsert_by_remote_id(&record).await?;

        tracing::debug!(
            table = %kind,
            remote_id = %snapshot.remote_id,
            outcome = ?outcome,
            "remote row applied"
        );
        Ok(outcome)
    }

    async fn apply_delete(&self, event: &ChangeEvent) -> Result<ApplyOutcome, AppError> {
        let kind = event.table;
        let remote_id = event.remote_id().ok_or_else(|| {
            AppError::InvalidInput(format!("DELETE event on {kind} carries no id"))
        })?;
        let existing = self.store.find_by_remote_id(kind, &remote_id).await?;

        match plan_remote_delete(existing.as_ref(), !kind.soft_deletes()) {
            TombstonePlan::Ignore => Ok(ApplyOutcome::Ignored),
            TombstonePlan::AlreadyApplied => Ok(ApplyOutcome::Unchanged),
            TombstonePlan::Remove => {
                self.store.remove_by_remote_id(kind, &remote_id).await?;
                Ok(ApplyOutcome::Removed)
            }
            TombstonePlan::Mark => {
                let now = now_millis();
                let deleted_at = event
                    .old
                    .as_ref()
                    .and_then(|old| timestamp_from_value(old.get("deleted_at")))
                    .or_else(|| existing.as_ref().and_then(|record| record.deleted_at))
                    .unwrap_or(now);
                self.store
                    .mark_remote_deleted(kind, &remote_id, deleted_at, now)
                    .await?;
                Ok(ApplyOutcome::Tombstoned)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::LocalRecord;
    use crate::domain::value_objects::{RemoteId, SyncStatus};
    use crate::infrastructure::database::ConnectionPool;
    use crate::infrastructure::offline::SqliteLocalStore;
    use serde_json::{json, Value};

    async fn setup() -> (Arc<SqliteLocalStore>, RemoteChangeApplier) {
        let pool = ConnectionPool::from_memory().await.unwrap();
        pool.migrate().await.unwrap();
        let store = Arc::new(SqliteLocalStore::new(pool.get_pool().clone()));
        let applier = RemoteChangeApplier::new(store.clone());
        (store, applier)
    }

    fn user() -> UserId {
        UserId::new("user-456".into()).unwrap()
    }

    fn row(value: Value) -> RemoteRow {
        RemoteRow::from_value(value).unwrap()
    }

    fn goal_row(title: &str, updated_at: &str) -> Value {
        json!({
            "id": "goal-123",
            "user_id": "user-456",
            "title": title,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": updated_at
        })
    }

    async fn stored(store: &SqliteLocalStore, kind: EntityKind, id: &str) -> Option<LocalRecord> {
        store
            .find_by_remote_id(kind, &RemoteId::new(id.into()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn same_row_twice_is_a_no_op() {
        let (store, applier) = setup().await;
        let incoming = row(goal_row("Run", "2024-01-02T00:00:00Z"));

        let first = applier
            .apply_row(EntityKind::Goals, &incoming, &user())
            .await
            .unwrap();
        let after_first = stored(&store, EntityKind::Goals, "goal-123").await;
        let second = applier
            .apply_row(EntityKind::Goals, &incoming, &user())
            .await
            .unwrap();
        let after_second = stored(&store, EntityKind::Goals, "goal-123").await;

        assert_eq!(first, ApplyOutcome::Inserted);
        assert_eq!(second, ApplyOutcome::Unchanged);
        assert_eq!(second.writes(), 0);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn pull_then_realtime_converge() {
        let (store, applier) = setup().await;
        let value = goal_row("Run", "2024-01-02T00:00:00Z");

        applier
            .apply_row(EntityKind::Goals, &row(value.clone()), &user())
            .await
            .unwrap();
        let via_pull = stored(&store, EntityKind::Goals, "goal-123").await;

        let event = ChangeEvent {
            table: EntityKind::Goals,
            event_type: ChangeEventType::Update,
            new: Some(value),
            old: None,
        };
        let outcome = applier.apply_event(&event, &user()).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(stored(&store, EntityKind::Goals, "goal-123").await, via_pull);
    }

    #[tokio::test]
    async fn older_row_does_not_replace_newer_one() {
        let (store, applier) = setup().await;
        applier
            .apply_row(
                EntityKind::Goals,
                &row(goal_row("New", "2024-01-03T00:00:00Z")),
                &user(),
            )
            .await
            .unwrap();
        let outcome = applier
            .apply_row(
                EntityKind::Goals,
                &row(goal_row("Old", "2024-01-02T00:00:00Z")),
                &user(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::SkippedStale);
        let record = stored(&store, EntityKind::Goals, "goal-123").await.unwrap();
        let crate::domain::entities::EntityPayload::Goal(goal) = record.payload else {
            panic!("expected goal");
        };
        assert_eq!(goal.title, "New");
    }

    #[tokio::test]
    async fn tombstone_for_unknown_record_writes_nothing() {
        let (store, applier) = setup().await;
        let event = ChangeEvent {
            table: EntityKind::Entries,
            event_type: ChangeEventType::Update,
            new: Some(json!({
                "id": "entry-1",
                "user_id": "user-456",
                "title": "gone",
                "updated_at": "2024-01-02T00:00:00Z",
                "deleted_at": "2024-01-02T00:00:00Z"
            })),
            old: None,
        };

        let outcome = applier.apply_event(&event, &user()).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(outcome.writes(), 0);
        assert!(stored(&store, EntityKind::Entries, "entry-1").await.is_none());
    }

    #[tokio::test]
    async fn tombstone_marks_existing_entry() {
        let (store, applier) = setup().await;
        let live = json!({
            "id": "entry-1",
            "user_id": "user-456",
            "title": "note",
            "updated_at": "2024-01-02T00:00:00Z"
        });
        applier
            .apply_row(EntityKind::Entries, &row(live), &user())
            .await
            .unwrap();

        let dead = json!({
            "id": "entry-1",
            "user_id": "user-456",
            "title": "note",
            "updated_at": "2024-01-03T00:00:00Z",
            "deleted_at": "2024-01-03T00:00:00Z"
        });
        let outcome = applier
            .apply_row(EntityKind::Entries, &row(dead), &user())
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Tombstoned);
        let record = stored(&store, EntityKind::Entries, "entry-1").await.unwrap();
        assert!(record.is_deleted());
        assert_eq!(record.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn delete_events_follow_soft_and_hard_rules() {
        let (store, applier) = setup().await;
        applier
            .apply_row(
                EntityKind::Entries,
                &row(json!({"id": "entry-1", "user_id": "user-456", "updated_at": "2024-01-02T00:00:00Z"})),
                &user(),
            )
            .await
            .unwrap();
        applier
            .apply_row(
                EntityKind::Goals,
                &row(goal_row("Run", "2024-01-02T00:00:00Z")),
                &user(),
            )
            .await
            .unwrap();

        let soft = ChangeEvent {
            table: EntityKind::Entries,
            event_type: ChangeEventType::Delete,
            new: None,
            old: Some(json!({"id": "entry-1", "deleted_at": "2024-01-04T00:00:00Z"})),
        };
        assert_eq!(
            applier.apply_event(&soft, &user()).await.unwrap(),
            ApplyOutcome::Tombstoned
        );
        assert_eq!(
            applier.apply_event(&soft, &user()).await.unwrap(),
            ApplyOutcome::Unchanged
        );
        assert!(stored(&store, EntityKind::Entries, "entry-1")
            .await
            .unwrap()
            .is_deleted());

        let hard = ChangeEvent {
            table: EntityKind::Goals,
            event_type: ChangeEventType::Delete,
            new: None,
            old: Some(json!({"id": "goal-123"})),
        };
        assert_eq!(
            applier.apply_event(&hard, &user()).await.unwrap(),
            ApplyOutcome::Removed
        );
        assert!(stored(&store, EntityKind::Goals, "goal-123").await.is_none());
        assert_eq!(
            applier.apply_event(&hard, &user()).await.unwrap(),
            ApplyOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn malformed_event_is_an_error() {
        let (_store, applier) = setup().await;
        let event = ChangeEvent {
            table: EntityKind::Goals,
            event_type: ChangeEventType::Insert,
            new: Some(json!({"title": "no id"})),
            old: None,
        };
        assert!(matches!(
            applier.apply_event(&event, &user()).await,
            Err(AppError::DeserializationError(_))
        ));
    }
}
