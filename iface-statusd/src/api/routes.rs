use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use shared::protocol::{HASH_PATH, IFACE_STATUS_PATH, IFACE_WATCH_PATH, REFRESH_PATH, SERVICES_PATH, STATUS_PATH};
use shared::types::{ServiceKind, ServiceStatus, StatusSnapshot};
use crate::refresh::RefreshCoordinator;
use crate::registry::hash;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<BTreeMap<ServiceKind, Arc<RefreshCoordinator>>>,
    pub watch_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(SERVICES_PATH, get(list_services))
        .route(STATUS_PATH, get(get_snapshot))
        .route(IFACE_STATUS_PATH, get(get_iface_status))
        .route(IFACE_WATCH_PATH, get(watch_iface))
        .route(HASH_PATH, get(get_hash))
        .route(REFRESH_PATH, post(trigger_refresh))
        .with_state(state)
}

fn coordinator(state: &AppState, kind: &str) -> Result<Arc<RefreshCoordinator>, StatusCode> {
    let kind: ServiceKind = kind.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    state
        .services
        .get(&kind)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceKind>> {
    Json(state.services.keys().copied().collect())
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<StatusSnapshot>, StatusCode> {
    let snapshot = coordinator(&state, &kind)?.registry().current();
    Ok(Json(StatusSnapshot::clone(&snapshot)))
}

async fn get_iface_status(
    State(state): State<AppState>,
    Path((kind, iface)): Path<(String, String)>,
) -> Result<Json<ServiceStatus>, StatusCode> {
    let status = coordinator(&state, &kind)?
        .registry()
        .status(&iface)
        .unwrap_or_else(|| ServiceStatus::unknown(iface));
    Ok(Json(status))
}

/// Hold the request until the interface's status changes or the watch
/// timeout elapses, then answer with its status at that point.
async fn watch_iface(
    State(state): State<AppState>,
    Path((kind, iface)): Path<(String, String)>,
) -> Result<Json<ServiceStatus>, StatusCode> {
    let mut view = coordinator(&state, &kind)?.registry().view_for(iface);

    if let Ok(None) = tokio::time::timeout(state.watch_timeout, view.changed()).await {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(view.status().unwrap_or_else(|| ServiceStatus::unknown(view.iface_name()))))
}

async fn get_hash(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<String, StatusCode> {
    let snapshot = coordinator(&state, &kind)?.registry().current();
    Ok(hash::compute_hash(&snapshot))
}

async fn trigger_refresh(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<String, StatusCode> {
    let coordinator = coordinator(&state, &kind)?;
    match coordinator.refresh().await {
        Ok(snapshot) => Ok(hash::compute_hash(&snapshot)),
        Err(e) => {
            tracing::warn!("Manual {} {}", kind, e);
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use async_trait::async_trait;
    use shared::types::ServiceState;
    use crate::registry::StatusRegistry;
    use crate::source::{FetchError, StatusSource};

    struct FixedSource(Result<BTreeMap<String, ServiceStatus>, FetchError>);

    #[async_trait]
    impl StatusSource for FixedSource {
        async fn fetch_all_statuses(&self) -> Result<BTreeMap<String, ServiceStatus>, FetchError> {
            self.0.clone()
        }
    }

    fn app_state(reply: Result<BTreeMap<String, ServiceStatus>, FetchError>) -> AppState {
        let coordinator = RefreshCoordinator::new(
            ServiceKind::DhcpV4,
            Arc::new(FixedSource(reply)),
            StatusRegistry::new(),
        );
        AppState {
            services: Arc::new(BTreeMap::from([(ServiceKind::DhcpV4, Arc::new(coordinator))])),
            watch_timeout: Duration::from_millis(50),
        }
    }

    fn lan_active() -> BTreeMap<String, ServiceStatus> {
        BTreeMap::from([("br-lan".to_string(), ServiceStatus::new("br-lan", ServiceState::Active))])
    }

    fn path2(kind: &str, iface: &str) -> Path<(String, String)> {
        Path((kind.to_string(), iface.to_string()))
    }

    #[tokio::test]
    async fn test_list_services() {
        let Json(kinds) = list_services(State(app_state(Ok(lan_active())))).await;
        assert_eq!(kinds, vec![ServiceKind::DhcpV4]);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_not_found() {
        let state = app_state(Ok(lan_active()));

        let err = get_snapshot(State(state.clone()), Path("firewall".to_string())).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);

        // Valid kind, but not configured on this daemon
        let err = get_hash(State(state), Path("nat".to_string())).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_iface_status_before_and_after_refresh() {
        let state = app_state(Ok(lan_active()));

        let Json(status) = get_iface_status(State(state.clone()), path2("dhcp_v4", "br-lan")).await.unwrap();
        assert_eq!(status, ServiceStatus::unknown("br-lan"));

        let digest = trigger_refresh(State(state.clone()), Path("dhcp_v4".to_string())).await.unwrap();
        assert_eq!(digest.len(), 64);

        let Json(status) = get_iface_status(State(state.clone()), path2("dhcp_v4", "br-lan")).await.unwrap();
        assert_eq!(status.state, ServiceState::Active);

        let Json(snapshot) = get_snapshot(State(state.clone()), Path("dhcp_v4".to_string())).await.unwrap();
        assert_eq!(snapshot.len(), 1);

        let served = get_hash(State(state), Path("dhcp_v4".to_string())).await.unwrap();
        assert_eq!(served, digest);
    }

    #[tokio::test]
    async fn test_failed_manual_refresh_is_bad_gateway() {
        let state = app_state(Err(FetchError::Timeout));
        let before = get_hash(State(state.clone()), Path("dhcp_v4".to_string())).await.unwrap();

        let err = trigger_refresh(State(state.clone()), Path("dhcp_v4".to_string())).await.unwrap_err();
        assert_eq!(err, StatusCode::BAD_GATEWAY);

        let after = get_hash(State(state), Path("dhcp_v4".to_string())).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_watch_returns_on_change() {
        let state = app_state(Ok(lan_active()));
        let watcher = tokio::spawn(watch_iface(State(AppState {
            watch_timeout: Duration::from_secs(5),
            ..state.clone()
        }), path2("dhcp_v4", "br-lan")));

        // Let the watcher subscribe before the refresh lands
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger_refresh(State(state), Path("dhcp_v4".to_string())).await.unwrap();

        let Json(status) = watcher.await.unwrap().unwrap();
        assert_eq!(status.state, ServiceState::Active);
    }

    #[tokio::test]
    async fn test_watch_times_out_with_current_status() {
        let state = app_state(Ok(lan_active()));
        let Json(status) = watch_iface(State(state), path2("dhcp_v4", "eth0")).await.unwrap();
        assert_eq!(status, ServiceStatus::unknown("eth0"));
    }
}
