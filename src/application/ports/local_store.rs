use crate::domain::entities::{EntityPayload, LocalRecord};
use crate::domain::value_objects::{EntityKind, LocalId, RemoteId, SyncStatus, UserId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Per-kind collections of synchronized records plus the pull watermark.
///
/// Every method is one atomic write block; callers never observe a partially applied change.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn insert(&self, record: &LocalRecord) -> Result<(), AppError>;

    /// Application-side edit. The record becomes `pending`.
    async fn update_payload(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
        payload: &EntityPayload,
        updated_at: DateTime<Utc>,
    ) -> Result<LocalRecord, AppError>;

    /// Application-side soft delete. The record becomes `pending`.
    async fn mark_deleted(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
        deleted_at: DateTime<Utc>,
    ) -> Result<LocalRecord, AppError>;

    /// Physically removes a row. Returns whether a row existed.
    async fn remove(&self, kind: EntityKind, local_id: &LocalId) -> Result<bool, AppError>;

    async fn find_by_local_id(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
    ) -> Result<Option<LocalRecord>, AppError>;

    async fn find_by_remote_id(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
    ) -> Result<Option<LocalRecord>, AppError>;

    async fn list(&self, kind: EntityKind, user_id: &UserId) -> Result<Vec<LocalRecord>, AppError>;

    /// Writes a record that carries a remote id, matching on that id.
    async fn upsert_by_remote_id(&self, record: &LocalRecord) -> Result<(), AppError>;

    /// Records the remote id returned by a push and marks the record `synced`.
    async fn mark_pushed(
        &self,
        kind: EntityKind,
        local_id: &LocalId,
        remote_id: &RemoteId,
        remote_updated_at: Option<DateTime<Utc>>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Applies a remote tombstone. Returns whether a row matched.
    async fn mark_remote_deleted(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
        deleted_at: DateTime<Utc>,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn remove_by_remote_id(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
    ) -> Result<bool, AppError>;

    async fn count_by_status(&self, kind: EntityKind, status: SyncStatus)
        -> Result<u64, AppError>;

    /// Drops every synchronized row and every watermark.
    async fn wipe(&self) -> Result<(), AppError>;

    async fn load_watermark(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>, AppError>;

    async fn save_watermark(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn clear_watermark(&self, user_id: &UserId) -> Result<(), AppError>;
}
