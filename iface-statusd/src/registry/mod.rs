pub mod hash;
pub mod view;

use std::sync::Arc;
use tokio::sync::watch;
use shared::types::{ServiceState, ServiceStatus, StatusSnapshot};
use self::view::StatusView;

/// Holds the latest status snapshot for one service kind.
///
/// Snapshots are immutable and shared behind an `Arc`; installing a new one
/// swaps the pointer, so readers see either the old or the new snapshot in
/// full. Clones share the same underlying registry.
#[derive(Clone)]
pub struct StatusRegistry {
    tx: Arc<watch::Sender<Arc<StatusSnapshot>>>,
}

impl StatusRegistry {
    /// Create a registry holding an empty snapshot
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(StatusSnapshot::default()));
        Self { tx: Arc::new(tx) }
    }

    /// Install `snapshot` as the current snapshot and wake subscribers.
    /// Returns the installed snapshot.
    pub fn replace(&self, snapshot: StatusSnapshot) -> Arc<StatusSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// The watch lock is held only for the `Arc` clone; searching happens
    /// on the caller's own handle.
    pub fn current(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// State of one interface in the current snapshot, `Unknown` if absent
    pub fn lookup(&self, iface_name: &str) -> ServiceState {
        self.current().state(iface_name)
    }

    /// Full status entry, including the diagnostic message
    pub fn status(&self, iface_name: &str) -> Option<ServiceStatus> {
        self.current().get(iface_name).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.tx.subscribe()
    }

    /// Live view of one interface, re-evaluated against whatever snapshot is
    /// current at each read.
    pub fn view_for(&self, iface_name: impl Into<String>) -> StatusView {
        StatusView::new(iface_name.into(), self.subscribe())
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
