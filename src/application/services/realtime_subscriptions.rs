use super::remote_change_applier::{ApplyOutcome, RemoteChangeApplier};
use crate::application::ports::{
    ChangeFeed, ChannelName, ChannelStatus, FeedMessage, RemoteStore,
};
use crate::domain::entities::{ChangeEvent, ChangeEventType};
use crate::domain::value_objects::{EntityKind, RemoteId, UserId};
use crate::shared::error::AppError;
use crate::shared::metrics::SyncMetrics;
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SubscriptionState {
    Uninitialized,
    Started,
    Subscribed,
    Error(String),
    Stopped,
}

impl SubscriptionState {
    fn from_channel(status: ChannelStatus) -> Self {
        match status {
            ChannelStatus::Subscribed => SubscriptionState::Subscribed,
            ChannelStatus::ChannelError(reason) => SubscriptionState::Error(reason),
            ChannelStatus::TimedOut => SubscriptionState::Error("subscription timed out".into()),
            ChannelStatus::Closed => SubscriptionState::Stopped,
        }
    }
}

/// A remote change that was written to the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub table: EntityKind,
    pub event_type: ChangeEventType,
    pub remote_id: Option<RemoteId>,
    pub outcome: ApplyOutcome,
}

pub type ChangeListener = Arc<dyn Fn(&AppliedChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Session {
    remote: Arc<dyn RemoteStore>,
    user_id: UserId,
}

/// One realtime channel per entity kind for the signed-in user. Inbound changes go through
/// the same applier as pulled rows.
pub struct RealtimeSubscriptionManager {
    this: Weak<Self>,
    applier: Arc<RemoteChangeApplier>,
    metrics: Arc<SyncMetrics>,
    session: RwLock<Option<Session>>,
    states: RwLock<BTreeMap<EntityKind, SubscriptionState>>,
    channels: Mutex<Vec<(ChannelName, JoinHandle<()>)>>,
    listeners: RwLock<Vec<(ListenerId, ChangeListener)>>,
    next_listener: AtomicU64,
}

impl RealtimeSubscriptionManager {
    pub fn new(applier: Arc<RemoteChangeApplier>, metrics: Arc<SyncMetrics>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            applier,
            metrics,
            session: RwLock::new(None),
            states: RwLock::new(
                EntityKind::ALL
                    .into_iter()
                    .map(|kind| (kind, SubscriptionState::Uninitialized))
                    .collect(),
            ),
            channels: Mutex::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        })
    }

    /// Binds to a remote and user. Channels of a previous session are torn down.
    pub async fn initialize(&self, remote: Arc<dyn RemoteStore>, user_id: UserId) {
        self.stop().await;
        *self.session.write().await = Some(Session { remote, user_id });
        let mut states = self.states.write().await;
        for state in states.values_mut() {
            *state = SubscriptionState::Uninitialized;
        }
    }

    /// Opens every channel. A channel that fails to open is left in `Error`; the rest still
    /// start. No-op while channels are open.
    pub async fn start(&self) -> Result<(), AppError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::NotInitialized("realtime has no remote".to_string()))?;

        let mut channels = self.channels.lock().await;
        if !channels.is_empty() {
            return Ok(());
        }

        for kind in EntityKind::ALL {
            self.set_state(kind, SubscriptionState::Started).await;
            match session.remote.subscribe(kind, &session.user_id).await {
                Ok(feed) => {
                    let channel = ChannelName::for_table(kind, &session.user_id);
                    let handle = self.spawn_listener(kind, session.user_id.clone(), feed);
                    channels.push((channel, handle));
                }
                Err(err) => {
                    tracing::error!(table = %kind, error = %err, "failed to open realtime channel");
                    self.set_state(kind, SubscriptionState::Error(err.to_string()))
                        .await;
                }
            }
        }

        tracing::info!(user_id = %session.user_id, channels = channels.len(), "realtime started");
        Ok(())
    }

    pub async fn stop(&self) {
        let channels: Vec<_> = self.channels.lock().await.drain(..).collect();
        if channels.is_empty() {
            return;
        }

        let remote = self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.remote.clone());
        for (channel, handle) in channels {
            handle.abort();
            if let Some(remote) = &remote {
                if let Err(err) = remote.unsubscribe(&channel).await {
                    tracing::warn!(
                        channel = %channel,
                        error = %err,
                        "failed to close realtime channel"
                    );
                }
            }
        }

        let mut states = self.states.write().await;
        for state in states.values_mut() {
            *state = SubscriptionState::Stopped;
        }
        tracing::info!("realtime stopped");
    }

    pub async fn on_changes(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push((id, listener));
        id
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub async fn is_active(&self) -> bool {
        !self.channels.lock().await.is_empty()
    }

    pub async fn get_status(&self) -> BTreeMap<EntityKind, SubscriptionState> {
        self.states.read().await.clone()
    }

    async fn set_state(&self, kind: EntityKind, state: SubscriptionState) {
        self.states.write().await.insert(kind, state);
    }

    fn spawn_listener(
        &self,
        kind: EntityKind,
        user_id: UserId,
        mut feed: ChangeFeed,
    ) -> JoinHandle<()> {
        let manager = self.this.clone();
        tokio::spawn(async move {
            while let Some(message) = feed.next().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match message {
                    FeedMessage::Status(status) => {
                        let state = SubscriptionState::from_channel(status);
                        tracing::debug!(table = %kind, state = ?state, "channel status");
                        manager.set_state(kind, state).await;
                    }
                    FeedMessage::Change(event) => manager.handle_event(&event, &user_id).await,
                }
            }
            tracing::debug!(table = %kind, "realtime feed ended");
        })
    }

    async fn handle_event(&self, event: &ChangeEvent, user_id: &UserId) {
        let outcome = match self.applier.apply_event(event, user_id).await {
            Ok(outcome) => {
                self.metrics.realtime_apply.record_success();
                outcome
            }
            Err(err) => {
                self.metrics.realtime_apply.record_failure();
                tracing::warn!(
                    table = %event.table,
                    event_type = ?event.event_type,
                    error = %err,
                    "failed to apply realtime change"
                );
                return;
            }
        };

        tracing::debug!(
            table = %event.table,
            event_type = ?event.event_type,
            outcome = ?outcome,
            "realtime change applied"
        );
        if outcome.writes() == 0 {
            return;
        }

        let change = AppliedChange {
            table: event.table,
            event_type: event.event_type,
            remote_id: event.remote_id(),
            outcome,
        };
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .await
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&change))).is_err() {
                tracing::error!(table = %change.table, "change listener panicked");
            }
        }
    }
}
