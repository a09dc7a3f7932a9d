pub mod connectivity;
pub mod local_store;
pub mod remote_store;
pub mod sync_queue_store;

pub use connectivity::ConnectivityProbe;
pub use local_store::LocalStore;
pub use remote_store::{ChangeFeed, ChannelName, ChannelStatus, FeedMessage, RemoteStore};
pub use sync_queue_store::{QueueCounts, SyncQueueStore};
