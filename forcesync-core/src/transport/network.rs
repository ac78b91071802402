/*
    network.rs - Host reachability signal

    The host (browser bridge, OS hook, CLI flag) reports online/offline
    transitions here; the transport channel reacts to them.
*/

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        NetworkMonitor { tx: Arc::new(tx) }
    }

    /// Report a reachability change. Repeating the current value is a no-op.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        NetworkMonitor::new(true)
    }
}
