use crate::application::ports::{QueueCounts, SyncQueueStore};
use crate::domain::entities::{
    transition, EnqueueOutcome, QueueTransition, RetryPolicy, SyncQueueItem, SyncQueueItemDraft,
};
use crate::domain::value_objects::timestamp::now_millis;
use crate::domain::value_objects::{EntityKind, LocalId, SyncQueueStatus};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const CLAIM_ATTEMPTS: usize = 3;

/// Result of running one claimed item through the push primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemResult {
    Completed,
    Failed,
    /// Another drain claimed the item first, or it changed while in flight.
    Skipped,
}

/// Ordered log of local mutations waiting for the remote.
pub struct SyncQueue {
    store: Arc<dyn SyncQueueStore>,
    policy: RetryPolicy,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn SyncQueueStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn enqueue(&self, draft: SyncQueueItemDraft) -> Result<EnqueueOutcome, AppError> {
        self.store.enqueue(draft, now_millis()).await
    }

    pub async fn dequeue_by_record(
        &self,
        table: EntityKind,
        record_id: &LocalId,
    ) -> Result<u64, AppError> {
        self.store.dequeue_by_record(table, record_id).await
    }

    pub async fn find_active(
        &self,
        table: EntityKind,
        record_id: &LocalId,
    ) -> Result<Option<SyncQueueItem>, AppError> {
        self.store.find_active(table, record_id).await
    }

    pub async fn list_pending(&self, limit: Option<u32>) -> Result<Vec<SyncQueueItem>, AppError> {
        self.store.list_pending(limit).await
    }

    pub async fn list_failed_ready_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<SyncQueueItem>, AppError> {
        self.store
            .list_failed_ready(now, self.policy.max_retries, limit)
            .await
    }

    pub async fn failed_items(&self) -> Result<Vec<SyncQueueItem>, AppError> {
        self.store.list_by_status(SyncQueueStatus::Failed).await
    }

    /// Claims the stored row rather than `item`, so mutations merged in after the item was
    /// listed are pushed too. `None` when the item is gone or no longer pending.
    pub async fn mark_in_progress(
        &self,
        item: &SyncQueueItem,
    ) -> Result<Option<SyncQueueItem>, AppError> {
        for _ in 0..CLAIM_ATTEMPTS {
            let Some(current) = self.store.get(item.id).await? else {
                return Ok(None);
            };
            if current.status != SyncQueueStatus::Pending {
                return Ok(None);
            }
            if let Some(claimed) = self.apply(&current, QueueTransition::Claim).await? {
                return Ok(Some(claimed));
            }
        }
        tracing::debug!(id = %item.id, "queue item kept changing; claim left for the next drain");
        Ok(None)
    }

    pub async fn mark_completed(
        &self,
        item: &SyncQueueItem,
    ) -> Result<Option<SyncQueueItem>, AppError> {
        self.apply(item, QueueTransition::Complete).await
    }

    pub async fn mark_failed(
        &self,
        item: &SyncQueueItem,
        error: &str,
    ) -> Result<Option<SyncQueueItem>, AppError> {
        self.apply(item, QueueTransition::Fail(error.to_string()))
            .await
    }

    pub async fn reset_for_retry(
        &self,
        item: &SyncQueueItem,
        force: bool,
    ) -> Result<Option<SyncQueueItem>, AppError> {
        self.apply(item, QueueTransition::Retry { force }).await
    }

    /// Records the outcome of a push for a claimed item.
    pub async fn settle(
        &self,
        claimed: &SyncQueueItem,
        outcome: &Result<(), AppError>,
    ) -> Result<ItemResult, AppError> {
        let stored = match outcome {
            Ok(()) => self.mark_completed(claimed).await?,
            Err(err) => self.mark_failed(claimed, &err.to_string()).await?,
        };

        Ok(match (stored, outcome) {
            (None, _) => {
                tracing::debug!(
                    id = %claimed.id,
                    "queue item changed while in flight; left for the next drain"
                );
                ItemResult::Skipped
            }
            (Some(_), Ok(())) => ItemResult::Completed,
            (Some(_), Err(_)) => ItemResult::Failed,
        })
    }

    pub async fn counts(&self) -> Result<QueueCounts, AppError> {
        self.store.counts().await
    }

    pub async fn clear_completed(&self) -> Result<u64, AppError> {
        self.store.delete_completed().await
    }

    /// Only items that used up every retry.
    pub async fn clear_exhausted(&self) -> Result<u64, AppError> {
        self.store.delete_exhausted(self.policy.max_retries).await
    }

    pub async fn clear_all(&self) -> Result<u64, AppError> {
        self.store.clear_all().await
    }

    async fn apply(
        &self,
        item: &SyncQueueItem,
        step: QueueTransition,
    ) -> Result<Option<SyncQueueItem>, AppError> {
        let next = transition(item, step, &self.policy, now_millis())?;
        if self.store.compare_and_set(item.version, &next).await? {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }
}
