use super::mappers::local_record_from_row;
use super::rows::LocalRecordRow;
use crate::application::ports::LocalStore;
use crate::domain::entities::{EntityPayload, LocalRecord};
use crate::domain::value_objects::timestamp::{from_millis, to_millis};
use crate::domain::value_objects::{EntityKind, LocalId, RemoteId, SyncStatus, UserId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

const RECORD_COLUMNS: &str = "id, remote_id, user_id, data, sync_status, last_synced_at, \
     remote_updated_at, created_at, updated_at, deleted_at";

pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        kind: EntityKind,
        column: &str,
        value: &str,
    ) -> Result<Option<LocalRecord>, AppError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE {column} = ?1 LIMIT 1",
            kind.table_name()
        );
        let row = sqlx::query_as::<_, LocalRecordRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| local_record_from_row(kind, row)).transpose()
    }

    async fn require(&self, kind: EntityKind, local_id: &LocalId) -> Result<LocalRecord, AppError> {
        self.find_by_local_id(kind, local_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{kind} record {local_id}")))
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn insert(&self, record: &LocalRecord) -> Result<(), AppError> {
        let sql = format!(
            r#"
            INSERT INTO {} ({RECORD_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            record.kind().table_name()
        );
        sqlx::query(&sql)
            .bind(record.local_id.as_str())
            .bind(record.remote_id.as_ref().map(|id| id.as_str().to_string()))
            .bind(record.user_id.as_str())
            .bind(record.payload.to_json_string())
            .bind(record.sync_status.as_str())
            .bind(record.last_synced_at.map(to_millis))
            .bind(record.remote_updated_at.map(to_millis))
            .bind(to_millis(record.created_at))
            .bind(to_millis(record.updated_at))
            .bind(record.deleted_at.map(to_millis))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_payload(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
        payload: &EntityPayload,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, AppError> {
        if payload.kind() != kind {
            return Err(AppError::InvalidInput(format!(
                "{} payload cannot be stored in {kind}",
                payload.kind()
            )));
        }

        let sql = format!(
            r#"
            UPDATE {}
            SET data = ?1, sync_status = 'pending', updated_at = ?2
            WHERE id = ?3
            "#,
            kind.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(payload.to_json_string())
            .bind(to_millis(updated_at))
            .bind(local_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{kind} record {local_id}")));
        }
        self.require(kind, local_id).await
    }

    async fn mark_deleted(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
        deleted_at: DateTime<Utc>,
    ) -> Result<LocalRecord, AppError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET deleted_at = ?1, updated_at = ?1, sync_status = 'pending'
            WHERE id = ?2
            "#,
            kind.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(to_millis(deleted_at))
            .bind(local_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{kind} record {local_id}")));
        }
        self.require(kind, local_id).await
    }

    async fn remove(&self, kind: EntityKind, local_id: &LocalId) -> Result<bool, AppError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table_name());
        let result = sqlx::query(&sql)
            .bind(local_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_local_id(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
    ) -> Result<Option<LocalRecord>, AppError> {
        self.fetch_one_where(kind, "id", local_id.as_str()).await
    }

    async fn find_by_remote_id(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
    ) -> Result<Option<LocalRecord>, AppError> {
        self.fetch_one_where(kind, "remote_id", remote_id.as_str())
            .await
    }

    async fn list(&self, kind: EntityKind, user_id: &UserId) -> Result<Vec<LocalRecord>, AppError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE user_id = ?1 ORDER BY created_at ASC, id ASC",
            kind.table_name()
        );
        let rows = sqlx::query_as::<_, LocalRecordRow>(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| local_record_from_row(kind, row))
            .collect()
    }

    async fn upsert_by_remote_id(&self, record: &LocalRecord) -> Result<(), AppError> {
        let remote_id = record.remote_id.as_ref().ok_or_else(|| {
            AppError::InvalidInput(format!(
                "{} record {} has no remote id",
                record.kind(),
                record.local_id
            ))
        })?;

        let sql = format!(
            r#"
            INSERT INTO {} ({RECORD_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(remote_id) WHERE remote_id IS NOT NULL DO UPDATE SET
                user_id = excluded.user_id,
                data = excluded.data,
                sync_status = excluded.sync_status,
                last_synced_at = excluded.last_synced_at,
                remote_updated_at = excluded.remote_updated_at,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at
            "#,
            record.kind().table_name()
        );
        sqlx::query(&sql)
            .bind(record.local_id.as_str())
            .bind(remote_id.as_str())
            .bind(record.user_id.as_str())
            .bind(record.payload.to_json_string())
            .bind(record.sync_status.as_str())
            .bind(record.last_synced_at.map(to_millis))
            .bind(record.remote_updated_at.map(to_millis))
            .bind(to_millis(record.created_at))
            .bind(to_millis(record.updated_at))
            .bind(record.deleted_at.map(to_millis))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_pushed(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
        remote_id: &RemoteId,
        remote_updated_at: Option<DateTime<Utc>>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET remote_id = ?1,
                sync_status = 'synced',
                last_synced_at = ?2,
                remote_updated_at = COALESCE(?3, remote_updated_at)
            WHERE id = ?4
            "#,
            kind.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(remote_id.as_str())
            .bind(to_millis(synced_at))
            .bind(remote_updated_at.map(to_millis))
            .bind(local_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{kind} record {local_id}")));
        }
        Ok(())
    }

    async fn mark_remote_deleted(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
        deleted_at: DateTime<Utc>,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET deleted_at = ?1, sync_status = 'synced', last_synced_at = ?2
            WHERE remote_id = ?3
            "#,
            kind.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(to_millis(deleted_at))
            .bind(to_millis(synced_at))
            .bind(remote_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_by_remote_id(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
    ) -> Result<bool, AppError> {
        let sql = format!("DELETE FROM {} WHERE remote_id = ?1", kind.table_name());
        let result = sqlx::query(&sql)
            .bind(remote_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(
        &self,
        kind: EntityKind,
        status: SyncStatus,
    ) -> Result<u64, AppError> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE sync_status = ?1",
            kind.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")?.max(0) as u64)
    }

    async fn wipe(&self) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for kind in EntityKind::ALL {
            let sql = format!("DELETE FROM {}", kind.table_name());
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM sync_watermarks")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::warn!("local store wiped");
        Ok(())
    }

    async fn load_watermark(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, AppError> {
        let row = sqlx::query(r#"SELECT last_sync_at FROM sync_watermarks WHERE user_id = ?1"#)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        row.try_get::<Option<i64>, _>("last_sync_at")?
            .map(|ms| from_millis(ms).map_err(AppError::DeserializationError))
            .transpose()
    }

    async fn save_watermark(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sync_watermarks (user_id, last_sync_at, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                last_sync_at = excluded.last_sync_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id.as_str())
        .bind(to_millis(at))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_watermark(&self, user_id: &UserId) -> Result<(), AppError> {
        sqlx::query(r#"DELETE FROM sync_watermarks WHERE user_id = ?1"#)
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Goal, RemoteSnapshot};
    use crate::domain::value_objects::timestamp::from_millis;
    use crate::infrastructure::database::ConnectionPool;
    use serde_json::Map;

    async fn setup_store() -> SqliteLocalStore {
        let pool = ConnectionPool::from_memory().await.unwrap();
        pool.migrate().await.unwrap();
        SqliteLocalStore::new(pool.get_pool().clone())
    }

    fn user() -> UserId {
        UserId::new("user-1".into()).unwrap()
    }

    fn goal(title: &str) -> EntityPayload {
        EntityPayload::Goal(Goal {
            title: title.into(),
            description: Some("weekly".into()),
            target_date: None,
            archived: false,
            metadata: Map::new(),
        })
    }

    #[tokio::test]
    async fn insert_then_find_round_trips_record() {
        let store = setup_store().await;
        let record = LocalRecord::new_local(user(), goal("Run"), from_millis(1_000).unwrap());
        store.insert(&record).await.unwrap();

        let loaded = store
            .find_by_local_id(EntityKind::Goals, &record.local_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, record);
        assert_eq!(store.list(EntityKind::Goals, &user()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_payload_marks_pending() {
        let store = setup_store().await;
        let mut record = LocalRecord::new_local(user(), goal("Run"), from_millis(1_000).unwrap());
        record.sync_status = SyncStatus::Synced;
        store.insert(&record).await.unwrap();

        let updated = store
            .update_payload(
                EntityKind::Goals,
                &record.local_id,
                &goal("Swim"),
                from_millis(2_000).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(updated.payload, goal("Swim"));
        assert_eq!(updated.sync_status, SyncStatus::Pending);
        assert_eq!(updated.updated_at, from_millis(2_000).unwrap());

        let missing = store
            .update_payload(
                EntityKind::Goals,
                &LocalId::generate(),
                &goal("x"),
                from_millis(2_000).unwrap(),
            )
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn upsert_by_remote_id_keeps_local_identity() {
        let store = setup_store().await;
        let snapshot = RemoteSnapshot {
            remote_id: RemoteId::new("remote-1".into()).unwrap(),
            user_id: user(),
            payload: goal("Run"),
            created_at: Some(from_millis(500).unwrap()),
            updated_at: Some(from_millis(1_000).unwrap()),
            deleted_at: None,
        };
        let first = snapshot.materialize(None, from_millis(1_500).unwrap());
        store.upsert_by_remote_id(&first).await.unwrap();

        // A second materialization with a fresh local id must still land on the same row.
        let mut newer = snapshot.clone();
        newer.payload = goal("Swim");
        newer.updated_at = Some(from_millis(2_000).unwrap());
        let second = newer.materialize(None, from_millis(2_500).unwrap());
        store.upsert_by_remote_id(&second).await.unwrap();

        let stored = store
            .find_by_remote_id(EntityKind::Goals, &snapshot.remote_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.local_id, first.local_id);
        assert_eq!(stored.payload, goal("Swim"));
        assert_eq!(stored.remote_updated_at, Some(from_millis(2_000).unwrap()));
        assert_eq!(store.list(EntityKind::Goals, &user()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_pushed_writes_remote_id() {
        let store = setup_store().await;
        let record = LocalRecord::new_local(user(), goal("Run"), from_millis(1_000).unwrap());
        store.insert(&record).await.unwrap();

        let remote_id = RemoteId::new("remote-9".into()).unwrap();
        store
            .mark_pushed(
                EntityKind::Goals,
                &record.local_id,
                &remote_id,
                Some(from_millis(1_100).unwrap()),
                from_millis(1_200).unwrap(),
            )
            .await
            .unwrap();

        let stored = store
            .find_by_remote_id(EntityKind::Goals, &remote_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.local_id, record.local_id);
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.last_synced_at, Some(from_millis(1_200).unwrap()));
        assert_eq!(stored.remote_updated_at, Some(from_millis(1_100).unwrap()));
        assert_eq!(
            store
                .count_by_status(EntityKind::Goals, SyncStatus::Synced)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn watermarks_are_per_user_and_wiped() {
        let store = setup_store().await;
        let other = UserId::new("user-2".into()).unwrap();
        store
            .save_watermark(&user(), from_millis(10_000).unwrap())
            .await
            .unwrap();
        store
            .save_watermark(&user(), from_millis(20_000).unwrap())
            .await
            .unwrap();

        assert_eq!(
            store.load_watermark(&user()).await.unwrap(),
            Some(from_millis(20_000).unwrap())
        );
        assert_eq!(store.load_watermark(&other).await.unwrap(), None);

        store
            .insert(&LocalRecord::new_local(
                user(),
                goal("Run"),
                from_millis(1_000).unwrap(),
            ))
            .await
            .unwrap();
        store.wipe().await.unwrap();
        assert_eq!(store.load_watermark(&user()).await.unwrap(), None);
        assert!(store.list(EntityKind::Goals, &user()).await.unwrap().is_empty());
    }
}
