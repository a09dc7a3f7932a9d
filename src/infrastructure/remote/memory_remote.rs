use crate::application::ports::{ChangeFeed, ChannelName, ChannelStatus, FeedMessage, RemoteStore};
use crate::domain::entities::{ChangeEvent, ChangeEventType, RemoteRow, SYNC_COLUMNS};
use crate::domain::value_objects::timestamp::{from_millis, now_millis};
use crate::domain::value_objects::{EntityKind, RemoteId, UserId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::channel::mpsc;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoteCallCounts {
    pub selects: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub subscribes: u64,
}

#[derive(Default)]
struct RemoteTables {
    rows: HashMap<EntityKind, BTreeMap<String, Map<String, Value>>>,
    last_stamp_ms: i64,
}

impl RemoteTables {
    /// Server clock. Strictly increasing so every write gets a distinct `updated_at`.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = now_millis().timestamp_millis();
        self.last_stamp_ms = now.max(self.last_stamp_ms + 1);
        from_millis(self.last_stamp_ms).unwrap_or_else(|_| now_millis())
    }
}

#[derive(Default)]
struct Counters {
    selects: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    subscribes: AtomicU64,
}

/// Loopback backend holding rows in memory and fanning changes out to realtime subscribers.
#[derive(Default)]
pub struct InMemoryRemote {
    tables: RwLock<RemoteTables>,
    subscribers: Mutex<HashMap<ChannelName, Vec<mpsc::UnboundedSender<FeedMessage>>>>,
    failing_writes: AtomicU32,
    failing_selects: AtomicU32,
    counters: Counters,
}

fn iso(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn owned_by(row: &Map<String, Value>, user_id: &UserId) -> bool {
    row.get("user_id").and_then(Value::as_str) == Some(user_id.as_str())
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` insert/update/delete calls fail with a network error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_selects(&self, count: u32) {
        self.failing_selects.store(count, Ordering::SeqCst);
    }

    pub fn call_counts(&self) -> RemoteCallCounts {
        RemoteCallCounts {
            selects: self.counters.selects.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            subscribes: self.counters.subscribes.load(Ordering::Relaxed),
        }
    }

    pub async fn row(&self, kind: EntityKind, id: &RemoteId) -> Option<RemoteRow> {
        let tables = self.tables.read().await;
        tables
            .rows
            .get(&kind)
            .and_then(|rows| rows.get(id.as_str()))
            .and_then(|row| RemoteRow::from_value(Value::Object(row.clone())).ok())
    }

    pub async fn row_count(&self, kind: EntityKind) -> usize {
        let tables = self.tables.read().await;
        tables.rows.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Stores a row exactly as given, bypassing the server clock. Subscribers are not told.
    pub async fn seed(&self, kind: EntityKind, row: Value) -> Result<RemoteId, AppError> {
        let parsed = RemoteRow::from_value(row).map_err(AppError::InvalidInput)?;
        let mut tables = self.tables.write().await;
        tables
            .rows
            .entry(kind)
            .or_default()
            .insert(parsed.id.as_str().to_string(), parsed.fields);
        Ok(parsed.id)
    }

    /// Delivers a raw event to the subscribers of `kind` for `user_id`.
    pub async fn emit(&self, user_id: &UserId, event: ChangeEvent) {
        let channel = ChannelName::for_table(event.table, user_id);
        self.publish(&channel, FeedMessage::Change(event)).await;
    }

    pub async fn emit_status(&self, kind: EntityKind, user_id: &UserId, status: ChannelStatus) {
        let channel = ChannelName::for_table(kind, user_id);
        self.publish(&channel, FeedMessage::Status(status)).await;
    }

    pub async fn subscriber_count(&self, kind: EntityKind, user_id: &UserId) -> usize {
        let channel = ChannelName::for_table(kind, user_id);
        self.subscribers
            .lock()
            .await
            .get(&channel)
            .map_or(0, Vec::len)
    }

    async fn publish(&self, channel: &ChannelName, message: FeedMessage) {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|sender| sender.unbounded_send(message.clone()).is_ok());
        }
    }

    async fn broadcast_change(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        event_type: ChangeEventType,
        new: Option<Map<String, Value>>,
        old: Option<Map<String, Value>>,
    ) {
        let event = ChangeEvent {
            table: kind,
            event_type,
            new: new.map(Value::Object),
            old: old.map(Value::Object),
        };
        self.emit(user_id, event).await;
    }

    fn check_write(&self) -> Result<(), AppError> {
        if take_one(&self.failing_writes) {
            return Err(AppError::Network("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn select_changed(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<RemoteRow>, AppError> {
        self.counters.selects.fetch_add(1, Ordering::Relaxed);
        if take_one(&self.failing_selects) {
            return Err(AppError::Network("injected select failure".to_string()));
        }

        let tables = self.tables.read().await;
        let mut rows: Vec<RemoteRow> = tables
            .rows
            .get(&kind)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|row| owned_by(row, user_id))
            .filter_map(|row| RemoteRow::from_value(Value::Object(row.clone())).ok())
            .filter(|row| match (since, row.updated_at) {
                (None, _) => true,
                (Some(since), Some(updated_at)) => updated_at >= since,
                (Some(_), None) => false,
            })
            .collect();

        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn insert(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        fields: Map<String, Value>,
    ) -> Result<RemoteRow, AppError> {
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        self.check_write()?;

        let mut row: Map<String, Value> = fields
            .into_iter()
            .filter(|(key, _)| key == "deleted_at" || !SYNC_COLUMNS.contains(&key.as_str()))
            .collect();
        let id = Uuid::new_v4().to_string();

        let stored = {
            let mut tables = self.tables.write().await;
            let stamp = tables.stamp();
            row.insert("id".into(), Value::String(id.clone()));
            row.insert("user_id".into(), Value::String(user_id.as_str().to_string()));
            row.insert("created_at".into(), iso(stamp));
            row.insert("updated_at".into(), iso(stamp));
            tables
                .rows
                .entry(kind)
                .or_default()
                .insert(id.clone(), row.clone());
            row
        };

        tracing::debug!(target: "sync::remote", table = %kind, id = %id, "remote insert");
        self.broadcast_change(kind, user_id, ChangeEventType::Insert, Some(stored.clone()), None)
            .await;
        RemoteRow::from_value(Value::Object(stored)).map_err(AppError::Remote)
    }

    async fn update(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        id: &RemoteId,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        self.check_write()?;

        let change = {
            let mut tables = self.tables.write().await;
            let stamp = tables.stamp();
            match tables
                .rows
                .get_mut(&kind)
                .and_then(|rows| rows.get_mut(id.as_str()))
                .filter(|row| owned_by(row, user_id))
            {
                Some(row) => {
                    let old = row.clone();
                    for (key, value) in fields {
                        if key == "deleted_at" || !SYNC_COLUMNS.contains(&key.as_str()) {
                            row.insert(key, value);
                        }
                    }
                    row.insert("updated_at".into(), iso(stamp));
                    Some((old, row.clone()))
                }
                None => None,
            }
        };

        // Updates that match no row succeed silently, like a filtered UPDATE.
        if let Some((old, new)) = change {
            self.broadcast_change(kind, user_id, ChangeEventType::Update, Some(new), Some(old))
                .await;
        }
        Ok(())
    }

    async fn delete(
        &self,
        kind: EntityKind,
        user_id: &UserId,
        id: &RemoteId,
    ) -> Result<(), AppError> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.check_write()?;

        let removed = {
            let mut tables = self.tables.write().await;
            let rows = tables.rows.entry(kind).or_default();
            let owned = rows
                .get(id.as_str())
                .is_some_and(|row| owned_by(row, user_id));
            if owned {
                rows.remove(id.as_str())
            } else {
                None
            }
        };

        if let Some(old) = removed {
            self.broadcast_change(kind, user_id, ChangeEventType::Delete, None, Some(old))
                .await;
        }
        Ok(())
    }

    async fn subscribe(&self, kind: EntityKind, user_id: &UserId) -> Result<ChangeFeed, AppError> {
        self.counters.subscribes.fetch_add(1, Ordering::Relaxed);
        let channel = ChannelName::for_table(kind, user_id);
        let (sender, receiver) = mpsc::unbounded();
        sender
            .unbounded_send(FeedMessage::Status(ChannelStatus::Subscribed))
            .map_err(|err| AppError::Internal(err.to_string()))?;

        self.subscribers
            .lock()
            .await
            .entry(channel)
            .or_default()
            .push(sender);
        Ok(receiver.boxed())
    }

    async fn unsubscribe(&self, channel: &ChannelName) -> Result<(), AppError> {
        // Dropping the senders ends the feeds.
        self.subscribers.lock().await.remove(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str) -> UserId {
        UserId::new(id.into()).unwrap()
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_and_server_timestamps() {
        let remote = InMemoryRemote::new();
        let row = remote
            .insert(
                EntityKind::Goals,
                &user("u1"),
                fields(json!({"id": "client-id", "title": "Run", "sync_status": "pending"})),
            )
            .await
            .unwrap();

        assert_ne!(row.id.as_str(), "client-id");
        assert_eq!(row.user_id, Some(user("u1")));
        assert!(row.updated_at.is_some());
        assert_eq!(row.fields.get("title"), Some(&json!("Run")));
        assert!(!row.fields.contains_key("sync_status"));
    }

    #[tokio::test]
    async fn select_is_scoped_filtered_and_newest_first() {
        let remote = InMemoryRemote::new();
        let first = remote
            .insert(EntityKind::Goals, &user("u1"), fields(json!({"title": "A"})))
            .await
            .unwrap();
        let second = remote
            .insert(EntityKind::Goals, &user("u1"), fields(json!({"title": "B"})))
            .await
            .unwrap();
        remote
            .insert(EntityKind::Goals, &user("u2"), fields(json!({"title": "C"})))
            .await
            .unwrap();

        let all = remote
            .select_changed(EntityKind::Goals, &user("u1"), None, 100)
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|row| row.id.clone()).collect::<Vec<_>>(),
            vec![second.id.clone(), first.id.clone()]
        );

        let since = remote
            .select_changed(EntityKind::Goals, &user("u1"), second.updated_at, 100)
            .await
            .unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, second.id);

        let limited = remote
            .select_changed(EntityKind::Goals, &user("u1"), None, 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_status_then_changes() {
        let remote = InMemoryRemote::new();
        let mut feed = remote
            .subscribe(EntityKind::Entries, &user("u1"))
            .await
            .unwrap();

        assert_eq!(
            feed.next().await,
            Some(FeedMessage::Status(ChannelStatus::Subscribed))
        );

        let row = remote
            .insert(EntityKind::Entries, &user("u1"), fields(json!({"title": "hi"})))
            .await
            .unwrap();
        remote
            .delete(EntityKind::Entries, &user("u1"), &row.id)
            .await
            .unwrap();

        let Some(FeedMessage::Change(insert)) = feed.next().await else {
            panic!("expected insert");
        };
        assert_eq!(insert.event_type, ChangeEventType::Insert);
        let Some(FeedMessage::Change(delete)) = feed.next().await else {
            panic!("expected delete");
        };
        assert_eq!(delete.event_type, ChangeEventType::Delete);
        assert_eq!(delete.remote_id(), Some(row.id));

        remote
            .unsubscribe(&ChannelName::for_table(EntityKind::Entries, &user("u1")))
            .await
            .unwrap();
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let remote = InMemoryRemote::new();
        remote.fail_next_writes(1);
        assert!(matches!(
            remote
                .insert(EntityKind::Goals, &user("u1"), Map::new())
                .await,
            Err(AppError::Network(_))
        ));
        assert!(remote
            .insert(EntityKind::Goals, &user("u1"), Map::new())
            .await
            .is_ok());
        assert_eq!(remote.call_counts().inserts, 2);
    }
}
