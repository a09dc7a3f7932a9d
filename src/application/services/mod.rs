pub mod offline_queue_manager;
pub mod realtime_subscriptions;
pub mod remote_change_applier;
pub mod sync_engine;
pub mod sync_queue;

pub use offline_queue_manager::{DrainOutcome, OfflineQueueManager, ProcessSummary};
pub use realtime_subscriptions::{
    AppliedChange, ChangeListener, ListenerId, RealtimeSubscriptionManager, SubscriptionState,
};
pub use remote_change_applier::{ApplyOutcome, RemoteChangeApplier};
pub use sync_engine::{SyncEngine, SyncEvent, SyncOutcome, SyncPhase, SyncReport, SyncState};
pub use sync_queue::{ItemResult, SyncQueue};
