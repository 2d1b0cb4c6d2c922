use rbac_service::{
    build_ops_router,
    config::RbacConfig,
    db,
    services::{StorageDeadline, SystemClock},
    AppState, RbacCore,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = RbacConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    rbac_service::services::metrics::init_metrics()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Metrics init failed: {}", e)))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting rbac service"
    );

    let store = Arc::new(db::connect_store(&config.database).await?);
    let deadline = StorageDeadline(config.storage.timeout());
    let refresh_interval = config.role_cache.refresh_interval();

    let core = RbacCore::new(
        store.clone(),
        store.clone(),
        Arc::new(SystemClock),
        deadline,
        refresh_interval,
    );
    core.bootstrap().await?;

    let shutdown = CancellationToken::new();
    let refresher = core
        .cache
        .clone()
        .spawn_refresher(refresh_interval, shutdown.clone());

    let state = AppState {
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
        store,
        core,
    };
    let app = build_ops_router(state);

    let addr = config.common.bind_address()?;
    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = refresher.await {
        tracing::warn!(error = %e, "Role cache refresher did not stop cleanly");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
