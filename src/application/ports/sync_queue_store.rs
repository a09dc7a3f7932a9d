use crate::domain::entities::{EnqueueOutcome, SyncQueueItem, SyncQueueItemDraft};
use crate::domain::value_objects::{EntityKind, LocalId, QueueItemId, SyncQueueStatus};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub failed: u64,
    pub completed: u64,
}

impl QueueCounts {
    /// Work that has not been confirmed by the remote yet.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.in_progress + self.failed
    }
}

/// Durable storage for queue items. Knows nothing about the network.
#[async_trait]
pub trait SyncQueueStore: Send + Sync {
    /// Inserts the draft or folds it into the active item of the same record, atomically.
    async fn enqueue(
        &self,
        draft: SyncQueueItemDraft,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, AppError>;

    async fn get(&self, id: QueueItemId) -> Result<Option<SyncQueueItem>, AppError>;

    async fn find_active(
        &self,
        table: EntityKind,
        record_id: &LocalId,
    ) -> Result<Option<SyncQueueItem>, AppError>;

    /// Removes every item of a record regardless of status.
    async fn dequeue_by_record(&self, table: EntityKind, record_id: &LocalId)
        -> Result<u64, AppError>;

    /// Pending items ordered by creation time.
    async fn list_pending(&self, limit: Option<u32>) -> Result<Vec<SyncQueueItem>, AppError>;

    async fn list_by_status(
        &self,
        status: SyncQueueStatus,
    ) -> Result<Vec<SyncQueueItem>, AppError>;

    /// Failed items below `max_retries` whose `next_retry_at` is null or not after `now`.
    async fn list_failed_ready(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        limit: Option<u32>,
    ) -> Result<Vec<SyncQueueItem>, AppError>;

    /// Writes the status fields and version of `next` only if the stored version is still
    /// `expected_version`. Operation and payload are left alone. Returns whether it wrote.
    async fn compare_and_set(
        &self,
        expected_version: i64,
        next: &SyncQueueItem,
    ) -> Result<bool, AppError>;

    async fn counts(&self) -> Result<QueueCounts, AppError>;

    async fn delete_completed(&self) -> Result<u64, AppError>;

    async fn delete_exhausted(&self, max_retries: u32) -> Result<u64, AppError>;

    async fn clear_all(&self) -> Result<u64, AppError>;
}
