use super::rows::{LocalRecordRow, SyncQueueItemRow};
use crate::domain::entities::{EntityPayload, LocalRecord, SyncQueueItem};
use crate::domain::value_objects::timestamp::from_millis;
use crate::domain::value_objects::{
    EntityKind, LocalId, QueueItemId, QueuePayload, RemoteId, SyncOperation, SyncQueueStatus,
    SyncStatus, UserId,
};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};

fn timestamp(value: i64) -> Result<DateTime<Utc>, AppError> {
    from_millis(value).map_err(AppError::DeserializationError)
}

fn optional_timestamp(value: Option<i64>) -> Result<Option<DateTime<Utc>>, AppError> {
    value.map(timestamp).transpose()
}

pub fn local_record_from_row(kind: EntityKind, row: LocalRecordRow) -> Result<LocalRecord, AppError> {
    let payload =
        EntityPayload::from_stored(kind, &row.data).map_err(AppError::DeserializationError)?;
    let remote_id = row
        .remote_id
        .map(|id| RemoteId::new(id).map_err(AppError::ValidationError))
        .transpose()?;

    Ok(LocalRecord {
        local_id: LocalId::new(row.id).map_err(AppError::ValidationError)?,
        remote_id,
        user_id: UserId::new(row.user_id).map_err(AppError::ValidationError)?,
        payload,
        sync_status: SyncStatus::from(row.sync_status.as_str()),
        last_synced_at: optional_timestamp(row.last_synced_at)?,
        remote_updated_at: optional_timestamp(row.remote_updated_at)?,
        created_at: timestamp(row.created_at)?,
        updated_at: timestamp(row.updated_at)?,
        deleted_at: optional_timestamp(row.deleted_at)?,
    })
}

pub fn queue_item_from_row(row: SyncQueueItemRow) -> Result<SyncQueueItem, AppError> {
    Ok(SyncQueueItem {
        id: QueueItemId::try_from(row.id).map_err(AppError::ValidationError)?,
        table: EntityKind::try_from(row.table_name.as_str()).map_err(AppError::ValidationError)?,
        record_id: LocalId::new(row.record_id).map_err(AppError::ValidationError)?,
        operation: SyncOperation::try_from(row.operation.as_str())
            .map_err(AppError::ValidationError)?,
        payload: QueuePayload::from_json_str_lossy(&row.payload),
        status: SyncQueueStatus::from(row.status.as_str()),
        retry_count: u32::try_from(row.retry_count.max(0)).unwrap_or(u32::MAX),
        last_error: row.last_error,
        next_retry_at: optional_timestamp(row.next_retry_at)?,
        version: row.version,
        created_at: timestamp(row.created_at)?,
        updated_at: timestamp(row.updated_at)?,
    })
}
