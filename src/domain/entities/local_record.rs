use super::{EntityPayload, RemoteRow};
use crate::domain::value_objects::{EntityKind, LocalId, RemoteId, SyncStatus, UserId};
use chrono::{DateTime, Utc};

/// A synchronized row in the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    pub local_id: LocalId,
    pub remote_id: Option<RemoteId>,
    pub user_id: UserId,
    pub payload: EntityPayload,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// `updated_at` of the remote row this record was last materialized from.
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Authority for conflict resolution.
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    /// A record created by the application layer; it has not been seen by the remote yet.
    pub fn new_local(user_id: UserId, payload: EntityPayload, now: DateTime<Utc>) -> Self {
        Self {
            local_id: LocalId::generate(),
            remote_id: None,
            user_id,
            payload,
            sync_status: SyncStatus::Pending,
            last_synced_at: None,
            remote_updated_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Remote state ready to be materialized locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    pub remote_id: RemoteId,
    pub user_id: UserId,
    pub payload: EntityPayload,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RemoteSnapshot {
    /// `fallback_user` is used when the row does not carry its owner.
    pub fn from_row(kind: EntityKind, row: &RemoteRow, fallback_user: &UserId) -> Result<Self, String> {
        Ok(Self {
            remote_id: row.id.clone(),
            user_id: row.user_id.clone().unwrap_or_else(|| fallback_user.clone()),
            payload: EntityPayload::from_remote_row(kind, &row.fields)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    /// The local record this snapshot materializes into. Local id and creation time of an
    /// existing record are kept.
    pub fn materialize(
        &self,
        existing: Option<&LocalRecord>,
        now: DateTime<Utc>,
    ) -> LocalRecord {
        let updated_at = self
            .updated_at
            .or(existing.map(|record| record.updated_at))
            .unwrap_or(now);
        let created_at = existing
            .map(|record| record.created_at)
            .or(self.created_at)
            .unwrap_or(updated_at);

        LocalRecord {
            local_id: existing
                .map(|record| record.local_id.clone())
                .unwrap_or_else(LocalId::generate),
            remote_id: Some(self.remote_id.clone()),
            user_id: self.user_id.clone(),
            payload: self.payload.clone(),
            sync_status: SyncStatus::Synced,
            last_synced_at: Some(now),
            remote_updated_at: self.updated_at,
            created_at,
            updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPlan {
    Insert,
    Overwrite,
    /// The stored record already reflects this remote state.
    Unchanged,
    /// The stored record came from a newer remote version.
    Stale,
}

/// Last write wins by the remote's own `updated_at`. A pending local edit never blocks an
/// incoming remote row.
pub fn plan_remote_upsert(existing: Option<&LocalRecord>, incoming: &RemoteSnapshot) -> UpsertPlan {
    let Some(record) = existing else {
        return UpsertPlan::Insert;
    };

    if record.sync_status != SyncStatus::Synced {
        return UpsertPlan::Overwrite;
    }

    if let (Some(stored), Some(candidate)) = (record.remote_updated_at, incoming.updated_at) {
        if candidate < stored {
            return UpsertPlan::Stale;
        }
    }

    let same_state = record.remote_updated_at == incoming.updated_at
        && record.deleted_at == incoming.deleted_at
        && record.user_id == incoming.user_id
        && record.payload == incoming.payload;

    if same_state {
        UpsertPlan::Unchanged
    } else {
        UpsertPlan::Overwrite
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TombstonePlan {
    /// No local record carries this remote id.
    Ignore,
    AlreadyApplied,
    Mark,
    Remove,
}

/// `hard_delete` is set for delete events of kinds without soft-delete semantics.
pub fn plan_remote_delete(existing: Option<&LocalRecord>, hard_delete: bool) -> TombstonePlan {
    match existing {
        None => TombstonePlan::Ignore,
        Some(_) if hard_delete => TombstonePlan::Remove,
        Some(record) if record.is_deleted() && record.sync_status == SyncStatus::Synced => {
            TombstonePlan::AlreadyApplied
        }
        Some(_) => TombstonePlan::Mark,
    }
}
