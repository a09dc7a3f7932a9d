use super::sync_engine::{SyncEngine, SyncOutcome};
use super::sync_queue::{ItemResult, SyncQueue};
use crate::application::ports::{ConnectivityProbe, QueueCounts};
use crate::domain::entities::{EnqueueOutcome, LocalRecord, SyncQueueItem, SyncQueueItemDraft};
use crate::domain::value_objects::timestamp::now_millis;
use crate::domain::value_objects::{EntityKind, LocalId, QueuePayload, SyncOperation};
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub processed: u32,
    pub failed: u32,
    /// Items claimed by someone else or changed while in flight.
    pub skipped: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    Drained {
        summary: ProcessSummary,
        sync: SyncOutcome,
    },
    AlreadyProcessing,
    Offline,
    NotInitialized,
    Failed(String),
}

/// Decides when queued mutations go out and drives draining as connectivity changes.
pub struct OfflineQueueManager {
    this: Weak<Self>,
    queue: Arc<SyncQueue>,
    engine: Arc<SyncEngine>,
    connectivity: Arc<dyn ConnectivityProbe>,
    config: SyncConfig,
    processing: Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    counts: watch::Sender<QueueCounts>,
}

impl OfflineQueueManager {
    pub fn new(
        queue: Arc<SyncQueue>,
        engine: Arc<SyncEngine>,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (counts, _) = watch::channel(QueueCounts::default());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            queue,
            engine,
            connectivity,
            config,
            processing: Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            counts,
        })
    }

    /// Starts the connectivity watcher and the retry timer. Calling it again restarts both.
    pub async fn initialize(&self) {
        self.destroy().await;

        let watcher = self.spawn_network_watcher();
        let retry_timer = self.spawn_retry_timer();
        self.tasks.lock().await.extend([watcher, retry_timer]);
        self.publish_counts().await;

        if self.connectivity.is_online() {
            self.spawn_drain();
        }
        tracing::info!(online = self.connectivity.is_online(), "offline queue manager initialized");
    }

    pub async fn destroy(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        tracing::info!("offline queue manager stopped");
    }

    /// Records a mutation. When online a drain is started in the background; its failures
    /// land on the queue items.
    pub async fn enqueue(
        &self,
        table: EntityKind,
        record_id: LocalId,
        operation: SyncOperation,
        payload: QueuePayload,
    ) -> Result<EnqueueOutcome, AppError> {
        let outcome = self
            .queue
            .enqueue(SyncQueueItemDraft::new(table, record_id.clone(), operation, payload))
            .await?;

        tracing::debug!(
            table = %table,
            record_id = %record_id,
            operation = %operation,
            outcome = ?outcome,
            "mutation queued"
        );
        self.publish_counts().await;

        if self.connectivity.is_online() {
            self.spawn_drain();
        }
        Ok(outcome)
    }

    /// Queues `operation` for a stored record. Deletes carry the remote id so the push can
    /// find the remote row after the local one is gone.
    pub async fn enqueue_record(
        &self,
        record: &LocalRecord,
        operation: SyncOperation,
    ) -> Result<EnqueueOutcome, AppError> {
        let payload = match operation {
            SyncOperation::Create | SyncOperation::Update => record.payload.to_remote_payload(),
            SyncOperation::Delete => {
                let mut payload = Map::new();
                if let Some(remote_id) = &record.remote_id {
                    payload.insert(
                        "remote_id".into(),
                        Value::String(remote_id.as_str().to_string()),
                    );
                }
                payload
            }
        };
        let payload = QueuePayload::new(Value::Object(payload)).map_err(AppError::ValidationError)?;
        self.enqueue(record.kind(), record.local_id.clone(), operation, payload)
            .await
    }

    /// Drains pending items oldest first, then runs a full sync cycle.
    pub async fn process_queue(&self) -> DrainOutcome {
        if !self.connectivity.is_online() {
            return DrainOutcome::Offline;
        }
        if !self.engine.is_initialized().await {
            return DrainOutcome::NotInitialized;
        }
        let Ok(_processing) = self.processing.try_lock() else {
            return DrainOutcome::AlreadyProcessing;
        };

        let items = match self.queue.list_pending(None).await {
            Ok(items) => items,
            Err(err) => {
                tracing::error!(error = %err, "failed to load pending items");
                return DrainOutcome::Failed(err.to_string());
            }
        };

        let mut summary = ProcessSummary::default();
        for item in &items {
            match self.engine.process_item(item).await {
                Ok(ItemResult::Completed) => summary.processed += 1,
                Ok(ItemResult::Failed) => summary.failed += 1,
                Ok(ItemResult::Skipped) => summary.skipped += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(id = %item.id, error = %err, "queue item could not be settled");
                }
            }
            self.publish_counts().await;
        }

        if !items.is_empty() {
            tracing::info!(
                processed = summary.processed,
                failed = summary.failed,
                skipped = summary.skipped,
                "queue drained"
            );
        }

        let sync = self.engine.sync().await;
        self.publish_counts().await;
        DrainOutcome::Drained { summary, sync }
    }

    /// Moves failed items whose backoff has elapsed back to pending and drains. Returns how
    /// many were reset.
    pub async fn process_failed_items(&self) -> Result<u32, AppError> {
        if !self.connectivity.is_online() {
            return Ok(0);
        }

        let ready = self
            .queue
            .list_failed_ready_for_retry(now_millis(), None)
            .await?;
        let reset = self.reset_items(&ready, false).await?;
        if reset > 0 {
            tracing::info!(count = reset, "retrying failed items");
            self.process_queue().await;
        }
        Ok(reset)
    }

    /// Resets every failed item that still has retries left, ignoring its backoff.
    pub async fn retry_all_failed(&self) -> Result<u32, AppError> {
        let policy = self.queue.policy();
        let retryable: Vec<SyncQueueItem> = self
            .queue
            .failed_items()
            .await?
            .into_iter()
            .filter(|item| !item.is_exhausted(policy))
            .collect();
        let reset = self.reset_items(&retryable, true).await?;
        self.publish_counts().await;

        tracing::info!(count = reset, "manual retry of failed items");
        self.process_queue().await;
        Ok(reset)
    }

    pub async fn clear_completed(&self) -> Result<u64, AppError> {
        let removed = self.queue.clear_completed().await?;
        self.publish_counts().await;
        Ok(removed)
    }

    pub async fn clear_max_retry_items(&self) -> Result<u64, AppError> {
        let removed = self.queue.clear_exhausted().await?;
        if removed > 0 {
            tracing::warn!(count = removed, "dropped items that ran out of retries");
        }
        self.publish_counts().await;
        Ok(removed)
    }

    pub async fn get_queue_counts(&self) -> Result<QueueCounts, AppError> {
        self.queue.counts().await
    }

    pub async fn get_failed_items(&self) -> Result<Vec<SyncQueueItem>, AppError> {
        self.queue.failed_items().await
    }

    /// Drops every queue item of the record regardless of status.
    pub async fn dequeue(&self, table: EntityKind, record_id: &LocalId) -> Result<u64, AppError> {
        let removed = self.queue.dequeue_by_record(table, record_id).await?;
        self.publish_counts().await;
        Ok(removed)
    }

    pub fn is_network_available(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn should_queue_operation(&self) -> bool {
        !self.connectivity.is_online()
    }

    /// Queue counts, republished after every change made through the manager.
    pub fn subscribe_counts(&self) -> watch::Receiver<QueueCounts> {
        self.counts.subscribe()
    }

    async fn reset_items(&self, items: &[SyncQueueItem], force: bool) -> Result<u32, AppError> {
        let mut reset = 0;
        for item in items {
            if self.queue.reset_for_retry(item, force).await?.is_some() {
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn publish_counts(&self) {
        match self.queue.counts().await {
            Ok(counts) => {
                self.counts.send_replace(counts);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to refresh queue counts");
            }
        }
    }

    fn spawn_drain(&self) {
        let manager = self.this.clone();
        tokio::spawn(async move {
            if let Some(manager) = manager.upgrade() {
                manager.process_queue().await;
            }
        });
    }

    fn spawn_network_watcher(&self) -> JoinHandle<()> {
        let manager = self.this.clone();
        let mut online_rx = self.connectivity.watch();
        tokio::spawn(async move {
            let mut was_online = *online_rx.borrow_and_update();
            while online_rx.changed().await.is_ok() {
                let online = *online_rx.borrow_and_update();
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if online && !was_online {
                    tracing::info!("network restored; draining queue");
                    manager.process_queue().await;
                } else if !online && was_online {
                    tracing::info!("network lost; mutations will be queued");
                }
                was_online = online;
            }
        })
    }

    fn spawn_retry_timer(&self) -> JoinHandle<()> {
        let manager = self.this.clone();
        let period = self.config.retry_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(err) = manager.process_failed_items().await {
                    tracing::warn!(error = %err, "retry check failed");
                }
            }
        })
    }
}
