mod api;
mod config;
mod refresh;
mod registry;
mod source;

use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use crate::config::Config;
use crate::refresh::RefreshCoordinator;
use crate::registry::StatusRegistry;
use crate::source::http::HttpStatusSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("iface_statusd=info"))
        )
        .init();

    tracing::info!("Starting iface-statusd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/iface-statusd/statusd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // One registry and coordinator per service kind
    let mut services = BTreeMap::new();
    for service in &config.services {
        let source = HttpStatusSource::new(&service.status_url, config.refresh.timeout())
            .with_context(|| format!("Failed to set up {} status source", service.kind))?;
        tracing::info!("Tracking {} status from {}", service.kind, source.url());

        let coordinator = RefreshCoordinator::new(service.kind, Arc::new(source), StatusRegistry::new());
        services.insert(service.kind, Arc::new(coordinator));
    }

    // Initial refresh; failures leave the registry empty until the next tick
    let initial = futures::future::join_all(services.values().map(|c| async move {
        (c.kind(), c.refresh().await)
    }))
    .await;
    for (kind, result) in initial {
        match result {
            Ok(snapshot) => tracing::info!("Initial {} snapshot: {} interfaces", kind, snapshot.len()),
            Err(e) => tracing::warn!("Initial {} {}", kind, e),
        }
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn one refresh loop per service kind
    let mut refresh_handles = Vec::new();
    for coordinator in services.values() {
        let coordinator = coordinator.clone();
        let interval = config.refresh.interval();
        let refresh_cancel = cancel.clone();
        refresh_handles.push(tokio::spawn(async move {
            let kind = coordinator.kind();
            if let Err(e) = refresh::run(coordinator, interval, refresh_cancel).await {
                tracing::error!("{} refresh loop error: {}", kind, e);
            }
        }));
    }

    // Build API router
    let app_state = api::routes::AppState {
        services: Arc::new(services),
        watch_timeout: std::time::Duration::from_secs(config.api.watch_timeout_secs),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete
    let _ = futures::future::join_all(refresh_handles).await;
    let _ = server_handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
