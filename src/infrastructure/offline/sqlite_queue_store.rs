use super::mappers::queue_item_from_row;
use super::rows::{StatusCountRow, SyncQueueItemRow};
use crate::application::ports::{QueueCounts, SyncQueueStore};
use crate::domain::entities::{Absorbed, EnqueueOutcome, SyncQueueItem, SyncQueueItemDraft};
use crate::domain::value_objects::timestamp::to_millis;
use crate::domain::value_objects::{EntityKind, LocalId, QueueItemId, SyncQueueStatus};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

const QUEUE_COLUMNS: &str = "id, table_name, record_id, operation, payload, status, \
     retry_count, last_error, next_retry_at, version, created_at, updated_at";

pub struct SqliteSyncQueueStore {
    pool: SqlitePool,
}

impl SqliteSyncQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn rewrite(
        tx: &mut Transaction<'_, Sqlite>,
        expected_version: i64,
        item: &SyncQueueItem,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET operation = ?1, payload = ?2, status = ?3, retry_count = ?4,
                last_error = ?5, next_retry_at = ?6, version = ?7, updated_at = ?8
            WHERE id = ?9 AND version = ?10
            "#,
        )
        .bind(item.operation.as_str())
        .bind(item.payload.to_json_string())
        .bind(item.status.as_str())
        .bind(i64::from(item.retry_count))
        .bind(item.last_error.as_deref())
        .bind(item.next_retry_at.map(to_millis))
        .bind(item.version)
        .bind(to_millis(item.updated_at))
        .bind(item.id.value())
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(format!(
                "queue item {} changed during enqueue",
                item.id
            )));
        }
        Ok(())
    }

    fn map_rows(rows: Vec<SyncQueueItemRow>) -> Result<Vec<SyncQueueItem>, AppError> {
        rows.into_iter().map(queue_item_from_row).collect()
    }
}

fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

#[async_trait]
impl SyncQueueStore for SqliteSyncQueueStore {
    async fn enqueue(
        &self,
        draft: SyncQueueItemDraft,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM sync_queue
            WHERE table_name = ?1 AND record_id = ?2 AND status IN ('pending', 'in_progress')
            LIMIT 1
            "#
        );
        let active = sqlx::query_as::<_, SyncQueueItemRow>(&sql)
            .bind(draft.table.table_name())
            .bind(draft.record_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match active {
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO sync_queue (
                        table_name, record_id, operation, payload, status,
                        retry_count, version, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, 0, ?5, ?5)
                    "#,
                )
                .bind(draft.table.table_name())
                .bind(draft.record_id.as_str())
                .bind(draft.operation.as_str())
                .bind(draft.payload.to_json_string())
                .bind(to_millis(now))
                .execute(&mut *tx)
                .await?;
                let id = QueueItemId::try_from(result.last_insert_rowid())
                    .map_err(AppError::Database)?;
                EnqueueOutcome::Created(id)
            }
            Some(row) => {
                let existing = queue_item_from_row(row)?;
                match existing.absorb(draft, now) {
                    Absorbed::Superseded(next) => {
                        Self::rewrite(&mut tx, existing.version, &next).await?;
                        EnqueueOutcome::Superseded(next.id)
                    }
                    Absorbed::Merged(next) => {
                        Self::rewrite(&mut tx, existing.version, &next).await?;
                        EnqueueOutcome::Merged(next.id)
                    }
                    Absorbed::Ignored => EnqueueOutcome::Ignored(existing.id),
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<SyncQueueItem>, AppError> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1");
        let row = sqlx::query_as::<_, SyncQueueItemRow>(&sql)
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?;
        row.map(queue_item_from_row).transpose()
    }

    async fn find_active(
        &self,
        table: EntityKind,
        record_id: &LocalId,
    ) -> Result<Option<SyncQueueItem>, AppError> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM sync_queue
            WHERE table_name = ?1 AND record_id = ?2 AND status IN ('pending', 'in_progress')
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, SyncQueueItemRow>(&sql)
            .bind(table.table_name())
            .bind(record_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(queue_item_from_row).transpose()
    }

    async fn dequeue_by_record(
        &self,
        table: EntityKind,
        record_id: &LocalId,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(r#"DELETE FROM sync_queue WHERE table_name = ?1 AND record_id = ?2"#)
            .bind(table.table_name())
            .bind(record_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_pending(&self, limit: Option<u32>) -> Result<Vec<SyncQueueItem>, AppError> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM sync_queue
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT ?1
            "#
        );
        let rows = sqlx::query_as::<_, SyncQueueItemRow>(&sql)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Self::map_rows(rows)
    }

    async fn list_by_status(
        &self,
        status: SyncQueueStatus,
    ) -> Result<Vec<SyncQueueItem>, AppError> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM sync_queue
            WHERE status = ?1
            ORDER BY created_at ASC, id ASC
            "#
        );
        let rows = sqlx::query_as::<_, SyncQueueItemRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Self::map_rows(rows)
    }

    async fn list_failed_ready(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        limit: Option<u32>,
    ) -> Result<Vec<SyncQueueItem>, AppError> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM sync_queue
            WHERE status = 'failed'
              AND retry_count < ?1
              AND (next_retry_at IS NULL OR next_retry_at <= ?2)
            ORDER BY created_at ASC, id ASC
            LIMIT ?3
            "#
        );
        let rows = sqlx::query_as::<_, SyncQueueItemRow>(&sql)
            .bind(i64::from(max_retries))
            .bind(to_millis(now))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Self::map_rows(rows)
    }

    async fn compare_and_set(
        &self,
        expected_version: i64,
        next: &SyncQueueItem,
    ) -> Result<bool, AppError> {
        // Only status bookkeeping moves here; operation and payload belong to enqueue.
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = ?1, retry_count = ?2, last_error = ?3, next_retry_at = ?4,
                version = ?5, updated_at = ?6
            WHERE id = ?7 AND version = ?8
            "#,
        )
        .bind(next.status.as_str())
        .bind(i64::from(next.retry_count))
        .bind(next.last_error.as_deref())
        .bind(next.next_retry_at.map(to_millis))
        .bind(next.version)
        .bind(to_millis(next.updated_at))
        .bind(next.id.value())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn counts(&self) -> Result<QueueCounts, AppError> {
        let rows = sqlx::query_as::<_, StatusCountRow>(
            r#"SELECT status, COUNT(*) AS count FROM sync_queue GROUP BY status"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let count = row.count.max(0) as u64;
            match SyncQueueStatus::from(row.status.as_str()) {
                SyncQueueStatus::Pending => counts.pending = count,
                SyncQueueStatus::InProgress => counts.in_progress = count,
                SyncQueueStatus::Failed => counts.failed = count,
                SyncQueueStatus::Completed => counts.completed = count,
                SyncQueueStatus::Unknown(status) => {
                    tracing::warn!(status = %status, count, "unknown queue status");
                }
            }
        }
        Ok(counts)
    }

    async fn delete_completed(&self) -> Result<u64, AppError> {
        let result = sqlx::query(r#"DELETE FROM sync_queue WHERE status = 'completed'"#)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_exhausted(&self, max_retries: u32) -> Result<u64, AppError> {
        let result =
            sqlx::query(r#"DELETE FROM sync_queue WHERE status = 'failed' AND retry_count >= ?1"#)
                .bind(i64::from(max_retries))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn clear_all(&self) -> Result<u64, AppError> {
        let result = sqlx::query(r#"DELETE FROM sync_queue"#)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
