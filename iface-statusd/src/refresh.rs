use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use shared::types::{ServiceKind, StatusSnapshot};
use crate::registry::StatusRegistry;
use crate::source::{FetchError, StatusSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("refresh failed: {0}")]
    RefreshFailed(#[from] FetchError),
}

/// Fetches complete snapshots for one service kind and installs them into
/// its registry.
pub struct RefreshCoordinator {
    kind: ServiceKind,
    source: Arc<dyn StatusSource>,
    registry: StatusRegistry,
}

impl RefreshCoordinator {
    pub fn new(kind: ServiceKind, source: Arc<dyn StatusSource>, registry: StatusRegistry) -> Self {
        Self { kind, source, registry }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    /// Run one fetch-and-install cycle.
    ///
    /// The registry is only touched after the fetch has completed and the
    /// result validated; on any failure, or if this future is dropped before
    /// completion, the current snapshot stays as it was.
    pub async fn refresh(&self) -> Result<Arc<StatusSnapshot>, RefreshError> {
        let entries = self.source.fetch_all_statuses().await?;
        let snapshot = StatusSnapshot::from_entries(entries).map_err(FetchError::from)?;
        Ok(self.registry.replace(snapshot))
    }
}

/// Periodic refresh loop. Failures are logged and retried on the next tick.
/// The first tick comes one interval after start; callers run the initial
/// refresh themselves.
pub async fn run(
    coordinator: Arc<RefreshCoordinator>,
    interval: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let kind = coordinator.kind();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let before = coordinator.registry().current();

                // Cancelling mid-fetch drops the refresh before it installs anything
                let result = tokio::select! {
                    result = coordinator.refresh() => result,
                    _ = cancel.cancelled() => break,
                };

                match result {
                    Ok(after) => {
                        if consecutive_failures > 0 {
                            tracing::info!("{} status refresh recovered after {} failures", kind, consecutive_failures);
                            consecutive_failures = 0;
                        }
                        for t in before.transitions(&after) {
                            tracing::info!("{} on {}: {} -> {}", kind, t.iface_name, t.from, t.to);
                        }
                        tracing::debug!("{} snapshot installed with {} interfaces", kind, after.len());
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        tracing::warn!("{} {} (attempt {})", kind, e, consecutive_failures);
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("{} refresh loop shutting down", kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use shared::types::{ServiceState, ServiceStatus, SnapshotError};

    type Reply = Result<BTreeMap<String, ServiceStatus>, FetchError>;

    /// Replays canned replies; repeats the last one when exhausted
    struct ScriptedSource {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_all_statuses(&self) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
    }

    /// Replies once its gate is opened
    struct GatedSource {
        gate: Arc<Notify>,
        reply: BTreeMap<String, ServiceStatus>,
    }

    #[async_trait]
    impl StatusSource for GatedSource {
        async fn fetch_all_statuses(&self) -> Reply {
            self.gate.notified().await;
            Ok(self.reply.clone())
        }
    }

    /// Never completes
    struct HangingSource;

    #[async_trait]
    impl StatusSource for HangingSource {
        async fn fetch_all_statuses(&self) -> Reply {
            std::future::pending().await
        }
    }

    fn entries(pairs: &[(&str, ServiceState)]) -> BTreeMap<String, ServiceStatus> {
        pairs
            .iter()
            .map(|(name, state)| (name.to_string(), ServiceStatus::new(*name, *state)))
            .collect()
    }

    fn coordinator(source: Arc<dyn StatusSource>) -> RefreshCoordinator {
        RefreshCoordinator::new(ServiceKind::Nat, source, StatusRegistry::new())
    }

    #[tokio::test]
    async fn test_refresh_installs_snapshot() {
        let source = ScriptedSource::new(vec![Ok(entries(&[("eth0", ServiceState::Active)]))]);
        let coordinator = coordinator(source.clone());

        let installed = coordinator.refresh().await.unwrap();
        assert_eq!(installed.state("eth0"), ServiceState::Active);
        assert_eq!(coordinator.registry().lookup("eth0"), ServiceState::Active);
        assert_eq!(coordinator.registry().lookup("eth1"), ServiceState::Unknown);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(entries(&[("eth0", ServiceState::Active)])),
            Err(FetchError::Timeout),
        ]);
        let coordinator = coordinator(source);
        coordinator.refresh().await.unwrap();

        let before = coordinator.registry().current();
        let err = coordinator.refresh().await.unwrap_err();
        assert_eq!(err, RefreshError::RefreshFailed(FetchError::Timeout));

        let after = coordinator.registry().current();
        assert_eq!(*before, *after);
        assert_eq!(coordinator.registry().lookup("eth0"), ServiceState::Active);
    }

    #[tokio::test]
    async fn test_failed_first_refresh_leaves_registry_empty() {
        let source = ScriptedSource::new(vec![Err(FetchError::Transport("connection refused".to_string()))]);
        let coordinator = coordinator(source);

        assert!(coordinator.refresh().await.is_err());
        assert!(coordinator.registry().current().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_rejected_whole() {
        let mut bad = entries(&[("eth0", ServiceState::Active)]);
        bad.insert("eth1".to_string(), ServiceStatus::new("eth9", ServiceState::Active));

        let source = ScriptedSource::new(vec![Ok(entries(&[("eth0", ServiceState::Stopped)])), Ok(bad)]);
        let coordinator = coordinator(source);
        coordinator.refresh().await.unwrap();

        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::RefreshFailed(FetchError::Invalid(SnapshotError::KeyMismatch { .. }))
        ));
        // Nothing from the rejected snapshot leaked in
        assert_eq!(coordinator.registry().lookup("eth0"), ServiceState::Stopped);
        assert_eq!(coordinator.registry().lookup("eth1"), ServiceState::Unknown);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let source = ScriptedSource::new(vec![Ok(entries(&[
            ("eth0", ServiceState::Active),
            ("eth1", ServiceState::Degraded),
        ]))]);
        let coordinator = coordinator(source);

        let first = coordinator.refresh().await.unwrap();
        let second = coordinator.refresh().await.unwrap();
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_empty_snapshot_replaces_known_state() {
        let source = ScriptedSource::new(vec![Ok(entries(&[("eth0", ServiceState::Active)])), Ok(BTreeMap::new())]);
        let coordinator = coordinator(source);
        coordinator.refresh().await.unwrap();

        coordinator.refresh().await.unwrap();
        assert!(coordinator.registry().current().is_empty());
        assert_eq!(coordinator.registry().lookup("eth0"), ServiceState::Unknown);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_leaves_registry_untouched() {
        let coordinator = coordinator(Arc::new(HangingSource));
        coordinator
            .registry()
            .replace(StatusSnapshot::from_entries(entries(&[("eth0", ServiceState::Active)])).unwrap());
        let before = coordinator.registry().current();

        let result = tokio::time::timeout(Duration::from_millis(20), coordinator.refresh()).await;
        assert!(result.is_err(), "refresh should still be pending");
        assert_eq!(*coordinator.registry().current(), *before);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_last_install_wins() {
        let registry = StatusRegistry::new();
        let gate_a = Arc::new(Notify::new());
        let gate_b = Arc::new(Notify::new());
        let snapshot_a = entries(&[("eth0", ServiceState::Active), ("eth1", ServiceState::Active)]);
        let snapshot_b = entries(&[("eth0", ServiceState::Stopped)]);

        let slow = Arc::new(RefreshCoordinator::new(
            ServiceKind::Nat,
            Arc::new(GatedSource { gate: gate_a.clone(), reply: snapshot_a.clone() }),
            registry.clone(),
        ));
        let fast = Arc::new(RefreshCoordinator::new(
            ServiceKind::Nat,
            Arc::new(GatedSource { gate: gate_b.clone(), reply: snapshot_b.clone() }),
            registry.clone(),
        ));

        // Both fetches are in flight before either completes
        let slow_handle = tokio::spawn({
            let slow = slow.clone();
            async move { slow.refresh().await }
        });
        let fast_handle = tokio::spawn({
            let fast = fast.clone();
            async move { fast.refresh().await }
        });
        tokio::task::yield_now().await;

        gate_b.notify_one();
        fast_handle.await.unwrap().unwrap();
        assert_eq!(*registry.current(), StatusSnapshot::from_entries(snapshot_b).unwrap());

        gate_a.notify_one();
        slow_handle.await.unwrap().unwrap();
        let expected = StatusSnapshot::from_entries(snapshot_a).unwrap();
        assert_eq!(*registry.current(), expected);
        assert_eq!(registry.lookup("eth1"), ServiceState::Active);
    }

    #[tokio::test]
    async fn test_run_waits_one_interval_before_first_fetch() {
        let source = ScriptedSource::new(vec![Ok(entries(&[("wan", ServiceState::Active)]))]);
        let coordinator = Arc::new(coordinator(source.clone()));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(coordinator.clone(), Duration::from_millis(200), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 0);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(coordinator.registry().current().is_empty());
    }

    #[tokio::test]
    async fn test_run_refreshes_until_cancelled() {
        let source = ScriptedSource::new(vec![Ok(entries(&[("wan", ServiceState::Active)]))]);
        let coordinator = Arc::new(coordinator(source.clone()));
        let mut view = coordinator.registry().view_for("wan");
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(coordinator.clone(), Duration::from_millis(10), cancel.clone()));

        assert_eq!(view.changed().await, Some(ServiceState::Active));
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(source.calls() >= 1);
    }

    #[tokio::test]
    async fn test_run_survives_failures() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Timeout),
            Err(FetchError::Decode("truncated".to_string())),
            Ok(entries(&[("eth0", ServiceState::Degraded)])),
        ]);
        let coordinator = Arc::new(coordinator(source.clone()));
        let mut view = coordinator.registry().view_for("eth0");
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(coordinator.clone(), Duration::from_millis(5), cancel.clone()));

        assert_eq!(view.changed().await, Some(ServiceState::Degraded));
        assert!(source.calls() >= 3);
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_cancels_inflight_fetch() {
        let coordinator = Arc::new(coordinator(Arc::new(HangingSource)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(coordinator.clone(), Duration::from_millis(5), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run should exit promptly")
            .unwrap()
            .unwrap();
        assert!(coordinator.registry().current().is_empty());
    }
}
