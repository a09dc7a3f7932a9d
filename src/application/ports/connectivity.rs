use tokio::sync::watch;

/// Source of network reachability.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every reachability change.
    fn watch(&self) -> watch::Receiver<bool>;
}
