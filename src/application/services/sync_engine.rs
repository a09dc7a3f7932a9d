use super::remote_change_applier::RemoteChangeApplier;
use super::sync_queue::{ItemResult, SyncQueue};
use crate::application::ports::{ConnectivityProbe, LocalStore, RemoteStore};
use crate::domain::entities::{LocalRecord, SyncQueueItem, SyncQueueItemDraft, SYNC_COLUMNS};
use crate::domain::value_objects::timestamp::now_millis;
use crate::domain::value_objects::{EntityKind, QueuePayload, RemoteId, SyncOperation, UserId};
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use crate::shared::metrics::SyncMetrics;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub is_running: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Pending and failed queue items after the latest cycle.
    pub pending_changes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Push,
    Pull,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pushed: u32,
    pub push_failures: u32,
    pub pulled: u32,
    /// Local rows written while applying pulled rows.
    pub applied: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Start,
    Progress {
        phase: SyncPhase,
        table: Option<EntityKind>,
        processed: u32,
    },
    Complete(SyncReport),
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadyInProgress,
    NotInitialized,
    Failed(String),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

#[derive(Clone)]
struct Session {
    remote: Arc<dyn RemoteStore>,
    user_id: UserId,
}

/// Push/pull engine. Owns the pull watermark and is the only component that moves queued
/// mutations to the remote.
pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    queue: Arc<SyncQueue>,
    applier: Arc<RemoteChangeApplier>,
    connectivity: Arc<dyn ConnectivityProbe>,
    metrics: Arc<SyncMetrics>,
    config: SyncConfig,
    session: RwLock<Option<Session>>,
    state: RwLock<SyncState>,
    gate: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        queue: Arc<SyncQueue>,
        applier: Arc<RemoteChangeApplier>,
        connectivity: Arc<dyn ConnectivityProbe>,
        metrics: Arc<SyncMetrics>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local,
            queue,
            applier,
            connectivity,
            metrics,
            config,
            session: RwLock::new(None),
            state: RwLock::new(SyncState::default()),
            gate: Mutex::new(()),
            events,
            auto_sync: Mutex::new(None),
        }
    }

    /// Binds the engine to a remote and a user, restoring that user's watermark.
    pub async fn initialize(
        &self,
        remote: Arc<dyn RemoteStore>,
        user_id: UserId,
    ) -> Result<(), AppError> {
        let watermark = self.local.load_watermark(&user_id).await?;
        {
            let mut state = self.state.write().await;
            state.last_sync_at = watermark;
            state.last_error = None;
        }
        *self.session.write().await = Some(Session { remote, user_id });
        self.refresh_pending().await;

        tracing::info!(watermark = ?watermark, "sync engine initialized");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.stop_auto_sync().await;
        *self.session.write().await = None;
        tracing::info!("sync engine shut down");
    }

    pub async fn is_initialized(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.user_id.clone())
    }

    /// Periodic `sync()`; ticks while offline are skipped. Replaces a running timer.
    pub async fn start_auto_sync(self: &Arc<Self>, interval: Duration) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if !engine.connectivity.is_online() {
                    tracing::debug!("auto sync skipped while offline");
                    continue;
                }
                let outcome = engine.sync().await;
                tracing::debug!(outcome = ?outcome, "auto sync tick");
            }
        });

        if let Some(previous) = self.auto_sync.lock().await.replace(handle) {
            previous.abort();
        }
        tracing::info!(interval_secs = interval.as_secs(), "auto sync started");
    }

    pub async fn stop_auto_sync(&self) {
        if let Some(handle) = self.auto_sync.lock().await.take() {
            handle.abort();
            tracing::info!("auto sync stopped");
        }
    }

    pub async fn get_state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn sync(&self) -> SyncOutcome {
        let Ok(_gate) = self.gate.try_lock() else {
            return SyncOutcome::AlreadyInProgress;
        };
        self.run_cycle().await
    }

    /// Forgets the watermark so the next pull fetches everything.
    pub async fn force_sync(&self) -> SyncOutcome {
        let Ok(_gate) = self.gate.try_lock() else {
            return SyncOutcome::AlreadyInProgress;
        };
        let Some(session) = self.current_session().await else {
            return SyncOutcome::NotInitialized;
        };

        if let Err(err) = self.local.clear_watermark(&session.user_id).await {
            return self.fail_before_cycle(err).await;
        }
        self.state.write().await.last_sync_at = None;
        tracing::info!("watermark cleared for full re-pull");
        self.run_cycle().await
    }

    /// Drops every local row and queued mutation, then pulls from scratch.
    pub async fn reset_and_sync(&self) -> SyncOutcome {
        let Ok(_gate) = self.gate.try_lock() else {
            return SyncOutcome::AlreadyInProgress;
        };
        if self.current_session().await.is_none() {
            return SyncOutcome::NotInitialized;
        }

        tracing::warn!("resetting local store");
        if let Err(err) = self.local.wipe().await {
            return self.fail_before_cycle(err).await;
        }
        if let Err(err) = self.queue.clear_all().await {
            return self.fail_before_cycle(err).await;
        }
        self.state.write().await.last_sync_at = None;
        self.run_cycle().await
    }

    /// Claims one queue item, pushes it and records the result. Failures are stored on the
    /// item, not returned.
    pub async fn process_item(&self, item: &SyncQueueItem) -> Result<ItemResult, AppError> {
        let Some(claimed) = self.queue.mark_in_progress(item).await? else {
            return Ok(ItemResult::Skipped);
        };

        let outcome = self.push_item(&claimed).await;
        match &outcome {
            Ok(()) => self.metrics.push.record_success(),
            Err(err) => {
                self.metrics.push.record_failure();
                tracing::warn!(
                    id = %claimed.id,
                    table = %claimed.table,
                    operation = %claimed.operation,
                    retry_count = claimed.retry_count,
                    transient = err.is_transient(),
                    error = %err,
                    "push failed"
                );
            }
        }
        self.queue.settle(&claimed, &outcome).await
    }

    /// Sends one queue item to the remote.
    pub async fn push_item(&self, item: &SyncQueueItem) -> Result<(), AppError> {
        let session = self
            .current_session()
            .await
            .ok_or_else(|| AppError::NotInitialized("sync engine has no remote".to_string()))?;

        match item.operation {
            SyncOperation::Create | SyncOperation::Update => self.push_upsert(&session, item).await,
            SyncOperation::Delete => self.push_delete(&session, item).await,
        }
    }

    async fn push_upsert(&self, session: &Session, item: &SyncQueueItem) -> Result<(), AppError> {
        let kind = item.table;
        let fields = outgoing_fields(item, &session.user_id);

        if let Some(remote_id) = self.require_record(item).await?.remote_id {
            return self.push_update(session, item, &remote_id, fields).await;
        }

        let links = self.applier.lock_links().await;
        // Another push of the same record may have linked it while we waited.
        let record = self.require_record(item).await?;
        if let Some(remote_id) = record.remote_id {
            drop(links);
            return self.push_update(session, item, &remote_id, fields).await;
        }

        let row = session.remote.insert(kind, &session.user_id, fields).await?;
        match self
            .local
            .mark_pushed(kind, &record.local_id, &row.id, row.updated_at, now_millis())
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    table = %kind,
                    local_id = %record.local_id,
                    remote_id = %row.id,
                    "record linked to remote row"
                );
                Ok(())
            }
            Err(AppError::NotFound(_)) => self.discard_orphan(session, item, &row.id).await,
            Err(err) => Err(err),
        }
    }

    async fn push_update(
        &self,
        session: &Session,
        item: &SyncQueueItem,
        remote_id: &RemoteId,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        session
            .remote
            .update(item.table, &session.user_id, remote_id, fields)
            .await?;
        self.local
            .mark_pushed(item.table, &item.record_id, remote_id, None, now_millis())
            .await
    }

    /// The local record was removed while its insert was in flight. The new remote row is
    /// deleted now; if that fails, its id goes onto a queued delete for the record.
    async fn discard_orphan(
        &self,
        session: &Session,
        item: &SyncQueueItem,
        remote_id: &RemoteId,
    ) -> Result<(), AppError> {
        tracing::info!(
            table = %item.table,
            record_id = %item.record_id,
            remote_id = %remote_id,
            "record deleted while its insert was in flight"
        );

        let Err(err) = session
            .remote
            .delete(item.table, &session.user_id, remote_id)
            .await
        else {
            return Ok(());
        };

        tracing::warn!(
            table = %item.table,
            remote_id = %remote_id,
            error = %err,
            "queueing delete of orphaned remote row"
        );
        let payload = QueuePayload::new(json!({ "remote_id": remote_id.as_str() }))
            .map_err(AppError::ValidationError)?;
        self.queue
            .enqueue(SyncQueueItemDraft::new(
                item.table,
                item.record_id.clone(),
                SyncOperation::Delete,
                payload,
            ))
            .await?;
        Ok(())
    }

    async fn require_record(&self, item: &SyncQueueItem) -> Result<LocalRecord, AppError> {
        self.local
            .find_by_local_id(item.table, &item.record_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} record {}", item.table, item.record_id)))
    }

    async fn push_delete(&self, session: &Session, item: &SyncQueueItem) -> Result<(), AppError> {
        let kind = item.table;
        let record = self.local.find_by_local_id(kind, &item.record_id).await?;
        let remote_id = record
            .as_ref()
            .and_then(|record| record.remote_id.clone())
            .or_else(|| {
                item.payload
                    .get("remote_id")
                    .and_then(Value::as_str)
                    .and_then(|raw| RemoteId::new(raw.to_string()).ok())
            });

        let Some(remote_id) = remote_id else {
            tracing::debug!(
                table = %kind,
                record_id = %item.record_id,
                "delete of a record the remote never saw"
            );
            return Ok(());
        };

        if kind.soft_deletes() {
            let deleted_at = record
                .as_ref()
                .and_then(|record| record.deleted_at)
                .unwrap_or_else(now_millis);
            let mut fields = Map::new();
            fields.insert(
                "deleted_at".into(),
                Value::String(deleted_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            session
                .remote
                .update(kind, &session.user_id, &remote_id, fields)
                .await?;
            if let Some(record) = record {
                self.local
                    .mark_pushed(kind, &record.local_id, &remote_id, None, now_millis())
                    .await?;
            }
        } else {
            session
                .remote
                .delete(kind, &session.user_id, &remote_id)
                .await?;
        }
        Ok(())
    }

    async fn run_cycle(&self) -> SyncOutcome {
        let Some(session) = self.current_session().await else {
            return SyncOutcome::NotInitialized;
        };

        let cycle_start = now_millis();
        let since = {
            let mut state = self.state.write().await;
            state.is_running = true;
            state.last_sync_at
        };
        self.emit(SyncEvent::Start);
        tracing::info!(since = ?since, "sync cycle started");

        let result = match self.push_phase().await {
            Ok(mut report) => match self.pull_phase(&session, since, &mut report).await {
                Ok(()) => Ok(report),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        let result = match result {
            Ok(report) => self
                .local
                .save_watermark(&session.user_id, cycle_start)
                .await
                .map(|()| report),
            Err(err) => Err(err),
        };

        let pending = self.pending_changes().await;
        let outcome = {
            let mut state = self.state.write().await;
            state.is_running = false;
            if let Some(pending) = pending {
                state.pending_changes = pending;
            }
            match result {
                Ok(report) => {
                    state.last_sync_at = Some(cycle_start);
                    state.last_error = None;
                    SyncOutcome::Completed(report)
                }
                Err(err) => {
                    let message = err.to_string();
                    state.last_error = Some(message.clone());
                    SyncOutcome::Failed(message)
                }
            }
        };

        match &outcome {
            SyncOutcome::Completed(report) => {
                tracing::info!(
                    pushed = report.pushed,
                    push_failures = report.push_failures,
                    pulled = report.pulled,
                    applied = report.applied,
                    "sync cycle completed"
                );
                self.emit(SyncEvent::Complete(*report));
            }
            SyncOutcome::Failed(message) => {
                tracing::error!(error = %message, "sync cycle failed");
                self.emit(SyncEvent::Error {
                    message: message.clone(),
                });
            }
            _ => {}
        }
        outcome
    }

    async fn push_phase(&self) -> Result<SyncReport, AppError> {
        let limit = self.config.batch_size;
        let mut items = self.queue.list_pending(Some(limit)).await?;
        for failed in self
            .queue
            .list_failed_ready_for_retry(now_millis(), Some(limit))
            .await?
        {
            if let Some(reset) = self.queue.reset_for_retry(&failed, false).await? {
                items.push(reset);
            }
        }
        items.sort_by_key(|item| (item.created_at, item.id));
        items.truncate(limit as usize);

        let mut report = SyncReport::default();
        for (index, item) in items.iter().enumerate() {
            match self.process_item(item).await? {
                ItemResult::Completed => report.pushed += 1,
                ItemResult::Failed => report.push_failures += 1,
                ItemResult::Skipped => {}
            }
            self.emit(SyncEvent::Progress {
                phase: SyncPhase::Push,
                table: Some(item.table),
                processed: index as u32 + 1,
            });
        }
        Ok(report)
    }

    /// Pulls every kind; one kind failing does not stop the others but fails the cycle.
    async fn pull_phase(
        &self,
        session: &Session,
        since: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> Result<(), AppError> {
        let mut first_error = None;

        for kind in EntityKind::ALL {
            match self.pull_kind(session, kind, since, report).await {
                Ok(()) => self.metrics.pull.record_success(),
                Err(err) => {
                    self.metrics.pull.record_failure();
                    tracing::warn!(table = %kind, error = %err, "pull failed");
                    first_error.get_or_insert(err);
                }
            }
            self.emit(SyncEvent::Progress {
                phase: SyncPhase::Pull,
                table: Some(kind),
                processed: report.pulled,
            });
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn pull_kind(
        &self,
        session: &Session,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> Result<(), AppError> {
        let rows = session
            .remote
            .select_changed(kind, &session.user_id, since, self.config.batch_size)
            .await?;

        for row in &rows {
            match self.applier.apply_row(kind, row, &session.user_id).await {
                Ok(outcome) => {
                    report.pulled += 1;
                    report.applied += outcome.writes();
                }
                Err(AppError::DeserializationError(reason)) => {
                    tracing::warn!(
                        table = %kind,
                        remote_id = %row.id,
                        reason = %reason,
                        "skipping undecodable remote row"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn fail_before_cycle(&self, err: AppError) -> SyncOutcome {
        let message = err.to_string();
        self.state.write().await.last_error = Some(message.clone());
        tracing::error!(error = %message, "sync aborted");
        self.emit(SyncEvent::Error {
            message: message.clone(),
        });
        SyncOutcome::Failed(message)
    }

    async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn pending_changes(&self) -> Option<u64> {
        match self.queue.counts().await {
            Ok(counts) => Some(counts.pending + counts.failed),
            Err(err) => {
                tracing::warn!(error = %err, "failed to count pending changes");
                None
            }
        }
    }

    async fn refresh_pending(&self) {
        if let Some(pending) = self.pending_changes().await {
            self.state.write().await.pending_changes = pending;
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Queue payload with sync bookkeeping stripped, stamped with the owning user.
fn outgoing_fields(item: &SyncQueueItem, user_id: &UserId) -> Map<String, Value> {
    let mut fields: Map<String, Value> = item
        .payload
        .as_map()
        .iter()
        .filter(|(key, _)| !SYNC_COLUMNS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    fields.insert(
        "user_id".into(),
        Value::String(user_id.as_str().to_string()),
    );
    fields
}
