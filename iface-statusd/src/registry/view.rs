use std::sync::Arc;
use tokio::sync::watch;
use shared::types::{ServiceState, ServiceStatus, StatusSnapshot};

/// Read-only view of one interface's status.
///
/// Holds a key and a subscription to the registry, never a copy of the
/// snapshot, so every read reflects the snapshot installed last.
#[derive(Clone)]
pub struct StatusView {
    iface_name: String,
    rx: watch::Receiver<Arc<StatusSnapshot>>,
    /// Entry for this key as of the last `changed()` wake-up
    last_seen: Option<ServiceStatus>,
}

impl StatusView {
    pub(crate) fn new(iface_name: String, mut rx: watch::Receiver<Arc<StatusSnapshot>>) -> Self {
        let last_seen = rx.borrow_and_update().get(&iface_name).cloned();
        Self {
            iface_name,
            rx,
            last_seen,
        }
    }

    pub fn iface_name(&self) -> &str {
        &self.iface_name
    }

    pub fn get(&self) -> ServiceState {
        self.rx.borrow().state(&self.iface_name)
    }

    pub fn status(&self) -> Option<ServiceStatus> {
        self.rx.borrow().get(&self.iface_name).cloned()
    }

    /// Wait until an installed snapshot changes this interface's entry and
    /// return its new state. Snapshots that leave the entry as it was are
    /// skipped. Returns `None` once the registry is gone.
    pub async fn changed(&mut self) -> Option<ServiceState> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }

            let entry = self.rx.borrow_and_update().get(&self.iface_name).cloned();
            if entry != self.last_seen {
                let state = entry.as_ref().map(|status| status.state).unwrap_or_default();
                self.last_seen = entry;
                return Some(state);
            }
        }
    }
}
