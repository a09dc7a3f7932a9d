pub mod entity_kind;
pub mod lenient;
pub mod payload;
pub mod record_id;
pub mod sync_operation;
pub mod sync_queue_status;
pub mod sync_status;
pub mod timestamp;

pub use entity_kind::EntityKind;
pub use payload::QueuePayload;
pub use record_id::{LocalId, QueueItemId, RemoteId, UserId};
pub use sync_operation::SyncOperation;
pub use sync_queue_status::SyncQueueStatus;
pub use sync_status::SyncStatus;
