use crate::domain::value_objects::{
    EntityKind, LocalId, QueueItemId, QueuePayload, SyncOperation, SyncQueueStatus,
};
use crate::shared::config::SyncConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncQueueItem {
    pub id: QueueItemId,
    pub table: EntityKind,
    pub record_id: LocalId,
    pub operation: SyncOperation,
    pub payload: QueuePayload,
    pub status: SyncQueueStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Write counter. A copy is stale once the stored version moves past it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A mutation that has not been written to the queue yet.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncQueueItemDraft {
    pub table: EntityKind,
    pub record_id: LocalId,
    pub operation: SyncOperation,
    pub payload: QueuePayload,
}

impl SyncQueueItemDraft {
    pub fn new(
        table: EntityKind,
        record_id: LocalId,
        operation: SyncOperation,
        payload: QueuePayload,
    ) -> Self {
        Self {
            table,
            record_id,
            operation,
            payload,
        }
    }
}

/// What happened to a draft handed to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(QueueItemId),
    /// A delete replaced the active item.
    Superseded(QueueItemId),
    Merged(QueueItemId),
    /// The active item is already a delete; nothing left to change.
    Ignored(QueueItemId),
}

impl EnqueueOutcome {
    pub fn item_id(&self) -> QueueItemId {
        match self {
            EnqueueOutcome::Created(id)
            | EnqueueOutcome::Superseded(id)
            | EnqueueOutcome::Merged(id)
            | EnqueueOutcome::Ignored(id) => *id,
        }
    }
}

/// The active item rewritten to absorb a newer mutation for the same record.
#[derive(Debug, Clone, PartialEq)]
pub enum Absorbed {
    Superseded(SyncQueueItem),
    Merged(SyncQueueItem),
    Ignored,
}

impl SyncQueueItem {
    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.retry_count >= policy.max_retries
    }

    pub fn is_ready_for_retry(&self, policy: &RetryPolicy, now: DateTime<Utc>) -> bool {
        self.status == SyncQueueStatus::Failed
            && !self.is_exhausted(policy)
            && self.next_retry_at.map_or(true, |due| due <= now)
    }

    /// Dedup rule for a second mutation of a record that still has an active item.
    pub fn absorb(&self, draft: SyncQueueItemDraft, now: DateTime<Utc>) -> Absorbed {
        if draft.operation == SyncOperation::Delete {
            let mut next = self.clone();
            next.operation = SyncOperation::Delete;
            next.payload = draft.payload;
            next.status = SyncQueueStatus::Pending;
            next.retry_count = 0;
            next.last_error = None;
            next.next_retry_at = None;
            next.version = self.version + 1;
            next.updated_at = now;
            return Absorbed::Superseded(next);
        }

        if self.operation == SyncOperation::Delete {
            return Absorbed::Ignored;
        }

        let mut next = self.clone();
        next.payload.merge(draft.payload);
        next.status = SyncQueueStatus::Pending;
        next.version = self.version + 1;
        next.updated_at = now;
        Absorbed::Merged(next)
    }
}

/// Exponential backoff for failed queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(300_000),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
            max_retries: config.max_retries,
        }
    }

    /// `min(initial * 2^retry_count, max)`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let scaled = 1u64
            .checked_shl(retry_count)
            .map(|factor| initial_ms.saturating_mul(factor))
            .unwrap_or(max_ms);
        Duration::from_millis(scaled.min(max_ms))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueTransition {
    Claim,
    Complete,
    Fail(String),
    /// Failed back to pending. `force` ignores `next_retry_at`.
    Retry { force: bool },
}

impl QueueTransition {
    fn name(&self) -> &'static str {
        match self {
            QueueTransition::Claim => "claim",
            QueueTransition::Complete => "complete",
            QueueTransition::Fail(_) => "fail",
            QueueTransition::Retry { .. } => "retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("queue item {0} is completed")]
    Terminal(QueueItemId),
    #[error("cannot {action} queue item {id} in status {from}")]
    InvalidTransition {
        id: QueueItemId,
        from: SyncQueueStatus,
        action: &'static str,
    },
    #[error("queue item {0} has exhausted its retries")]
    RetriesExhausted(QueueItemId),
    #[error("queue item {0} is not due for retry yet")]
    NotDue(QueueItemId),
}

/// Pure state machine for queue items. The returned item is what the store should persist.
pub fn transition(
    item: &SyncQueueItem,
    step: QueueTransition,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<SyncQueueItem, TransitionError> {
    if item.status == SyncQueueStatus::Completed {
        return Err(TransitionError::Terminal(item.id));
    }

    let invalid = |step: &QueueTransition| TransitionError::InvalidTransition {
        id: item.id,
        from: item.status.clone(),
        action: step.name(),
    };

    let mut next = item.clone();
    next.version = item.version + 1;
    next.updated_at = now;

    match step {
        QueueTransition::Claim => {
            if item.status != SyncQueueStatus::Pending {
                return Err(invalid(&QueueTransition::Claim));
            }
            next.status = SyncQueueStatus::InProgress;
        }
        QueueTransition::Complete => {
            if item.status != SyncQueueStatus::InProgress {
                return Err(invalid(&QueueTransition::Complete));
            }
            next.status = SyncQueueStatus::Completed;
            next.last_error = None;
            next.next_retry_at = None;
        }
        QueueTransition::Fail(error) => {
            if !item.status.is_active() {
                return Err(invalid(&QueueTransition::Fail(error)));
            }
            let delay = policy.delay_for(item.retry_count);
            next.status = SyncQueueStatus::Failed;
            next.retry_count = item.retry_count.saturating_add(1);
            next.last_error = Some(error);
            next.next_retry_at = Some(
                now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()),
            );
        }
        QueueTransition::Retry { force } => {
            if item.status != SyncQueueStatus::Failed {
                return Err(invalid(&QueueTransition::Retry { force }));
            }
            if item.is_exhausted(policy) {
                return Err(TransitionError::RetriesExhausted(item.id));
            }
            if !force && !item.is_ready_for_retry(policy, now) {
                return Err(TransitionError::NotDue(item.id));
            }
            next.status = SyncQueueStatus::Pending;
            next.next_retry_at = None;
        }
    }

    Ok(next)
}
