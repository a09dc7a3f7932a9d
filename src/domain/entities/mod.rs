pub mod change_event;
pub mod entity_payload;
pub mod local_record;
pub mod remote_row;
pub mod sync_queue_item;

pub use change_event::{ChangeEvent, ChangeEventType};
pub use entity_payload::{
    Attachment, Entry, EntityPayload, Goal, NutritionLog, SYNC_COLUMNS, TrackedEntity,
    WorkoutRow, WorkoutSession,
};
pub use local_record::{
    plan_remote_delete, plan_remote_upsert, LocalRecord, RemoteSnapshot, TombstonePlan,
    UpsertPlan,
};
pub use remote_row::RemoteRow;
pub use sync_queue_item::{
    transition, Absorbed, EnqueueOutcome, QueueTransition, RetryPolicy, SyncQueueItem,
    SyncQueueItemDraft, TransitionError,
};
