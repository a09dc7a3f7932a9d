use crate::application::ports::ConnectivityProbe;
use tokio::sync::watch;

/// Reachability flag driven by the host, e.g. from platform network callbacks.
pub struct ManualConnectivity {
    sender: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Publishes a change. Repeated values are not re-broadcast.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityProbe for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watchers_see_transitions() {
        let probe = ManualConnectivity::new(false);
        let mut rx = probe.watch();
        assert!(!probe.is_online());

        probe.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        probe.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
