use crate::domain::entities::{ChangeEvent, RemoteRow};
use crate::domain::value_objects::{EntityKind, RemoteId, UserId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::fmt;

/// Transport-level state of a realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

pub type ChangeFeed = BoxStream<'static, FeedMessage>;

/// Name of the realtime channel for one table and one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn for_table(kind: EntityKind, user_id: &UserId) -> Self {
        Self(format!("realtime:{}:{}", kind.remote_table(), user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote backend, scoped per call to one user.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows with `updated_at >= since` (all rows when `since` is `None`), newest first.
    async fn select_changed(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<RemoteRow>, AppError>;

    /// Returns the stored row including its assigned id.
    async fn insert(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        fields: Map<String, Value>,
    ) -> Result<RemoteRow, AppError>;

    async fn update(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        id: &RemoteId,
        fields: Map<String, Value>,
    ) -> Result<(), AppError>;

    async fn delete(&self, kind: EntityKind, user_id: &UserId, id: &RemoteId)
        -> Result<(), AppError>;

    async fn subscribe(&self, kind: EntityKind, user_id: &UserId) -> Result<ChangeFeed, AppError>;

    async fn unsubscribe(&self, channel: &ChannelName) -> Result<(), AppError>;
}
