pub mod mappers;
pub mod rows;
pub mod sqlite_local_store;
pub mod sqlite_queue_store;

pub use sqlite_local_store::SqliteLocalStore;
pub use sqlite_queue_store::SqliteSyncQueueStore;
