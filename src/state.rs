use crate::application::ports::{ConnectivityProbe, LocalStore, QueueCounts, RemoteStore};
use crate::application::services::{
    OfflineQueueManager, RealtimeSubscriptionManager, RemoteChangeApplier, SubscriptionState,
    SyncEngine, SyncQueue, SyncState,
};
use crate::domain::entities::{EntityPayload, LocalRecord, RetryPolicy};
use crate::domain::value_objects::timestamp::now_millis;
use crate::domain::value_objects::{EntityKind, LocalId, SyncOperation, UserId};
use crate::infrastructure::database::ConnectionPool;
use crate::infrastructure::offline::{SqliteLocalStore, SqliteSyncQueueStore};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use crate::shared::metrics::{SyncMetrics, SyncMetricsSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregate view for the application layer.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeState {
    pub queue: QueueCounts,
    pub sync: SyncState,
    pub realtime: BTreeMap<EntityKind, SubscriptionState>,
    pub metrics: SyncMetricsSnapshot,
}

/// Every sync service wired over one database.
#[derive(Clone)]
pub struct SyncRuntime {
    pub config: Arc<AppConfig>,
    pub pool: ConnectionPool,
    pub local_store: Arc<dyn LocalStore>,
    pub queue: Arc<SyncQueue>,
    pub engine: Arc<SyncEngine>,
    pub offline: Arc<OfflineQueueManager>,
    pub realtime: Arc<RealtimeSubscriptionManager>,
    pub metrics: Arc<SyncMetrics>,
}

impl SyncRuntime {
    pub async fn new(
        config: AppConfig,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;
        let pool = ConnectionPool::from_config(&config.database).await?;
        Self::with_pool(config, pool, connectivity).await
    }

    /// Wires the services over an existing pool and applies pending migrations.
    pub async fn with_pool(
        config: AppConfig,
        pool: ConnectionPool,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;
        pool.migrate().await?;

        let metrics = Arc::new(SyncMetrics::default());
        let local_store: Arc<dyn LocalStore> =
            Arc::new(SqliteLocalStore::new(pool.get_pool().clone()));
        let queue = Arc::new(SyncQueue::new(
            Arc::new(SqliteSyncQueueStore::new(pool.get_pool().clone())),
            RetryPolicy::from_config(&config.sync),
        ));
        let applier = Arc::new(RemoteChangeApplier::new(local_store.clone()));

        let engine = Arc::new(SyncEngine::new(
            local_store.clone(),
            queue.clone(),
            applier.clone(),
            connectivity.clone(),
            metrics.clone(),
            config.sync.clone(),
        ));
        let offline = OfflineQueueManager::new(
            queue.clone(),
            engine.clone(),
            connectivity,
            config.sync.clone(),
        );
        let realtime = RealtimeSubscriptionManager::new(applier, metrics.clone());

        tracing::info!(database = %config.database.url, "sync runtime ready");

        Ok(Self {
            config: Arc::new(config),
            pool,
            local_store,
            queue,
            engine,
            offline,
            realtime,
            metrics,
        })
    }

    /// Signs the runtime in: binds the remote, opens realtime channels and starts the timers.
    pub async fn initialize(
        &self,
        remote: Arc<dyn RemoteStore>,
        user_id: UserId,
    ) -> Result<(), AppError> {
        self.engine.initialize(remote.clone(), user_id.clone()).await?;

        self.realtime.initialize(remote, user_id.clone()).await;
        if self.config.realtime.enabled {
            self.realtime.start().await?;
        }

        self.offline.initialize().await;
        if self.config.sync.auto_sync {
            self.engine
                .start_auto_sync(self.config.sync.sync_interval())
                .await;
        }

        tracing::info!(user_id = %user_id, "sync runtime initialized");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.offline.destroy().await;
        self.realtime.stop().await;
        self.engine.shutdown().await;
    }

    pub async fn close(&self) {
        self.shutdown().await;
        self.pool.close().await;
    }

    pub async fn get_state(&self) -> Result<RuntimeState, AppError> {
        Ok(RuntimeState {
            queue: self.offline.get_queue_counts().await?,
            sync: self.engine.get_state().await,
            realtime: self.realtime.get_status().await,
            metrics: self.metrics.snapshot(),
        })
    }

    /// Stores a new record for the signed-in user and queues its creation.
    pub async fn create_record(&self, payload: EntityPayload) -> Result<LocalRecord, AppError> {
        let user_id = self.require_user().await?;
        let record = LocalRecord::new_local(user_id, payload, now_millis());
        self.local_store.insert(&record).await?;
        self.offline
            .enqueue_record(&record, SyncOperation::Create)
            .await?;
        Ok(record)
    }

    pub async fn update_record(
        &self,
        local_id: &LocalId,
        payload: EntityPayload,
    ) -> Result<LocalRecord, AppError> {
        let record = self
            .local_store
            .update_payload(payload.kind(), local_id, &payload, now_millis())
            .await?;
        self.offline
            .enqueue_record(&record, SyncOperation::Update)
            .await?;
        Ok(record)
    }

    /// Entries are tombstoned locally; other kinds are removed at once and the queued delete
    /// carries the remote id.
    pub async fn delete_record(&self, kind: EntityKind, local_id: &LocalId) -> Result<(), AppError> {
        if kind.soft_deletes() {
            let record = self
                .local_store
                .mark_deleted(kind, local_id, now_millis())
                .await?;
            self.offline
                .enqueue_record(&record, SyncOperation::Delete)
                .await?;
            return Ok(());
        }

        let record = self
            .local_store
            .find_by_local_id(kind, local_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{kind} record {local_id}")))?;
        self.offline
            .enqueue_record(&record, SyncOperation::Delete)
            .await?;
        self.local_store.remove(kind, local_id).await?;
        Ok(())
    }

    pub async fn list_records(&self, kind: EntityKind) -> Result<Vec<LocalRecord>, AppError> {
        let user_id = self.require_user().await?;
        self.local_store.list(kind, &user_id).await
    }

    async fn require_user(&self) -> Result<UserId, AppError> {
        self.engine
            .user_id()
            .await
            .ok_or_else(|| AppError::NotInitialized("no signed-in user".to_string()))
    }
}
