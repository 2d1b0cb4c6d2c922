use service_core::axum::{extract::State, Json};
use service_core::error::AppError;

use crate::AppState;

/// Liveness plus a storage ping and the role cache's state.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Storage health check failed");
        AppError::from(e)
    })?;

    let cache = &state.core.cache;
    let last_loaded_at = cache.last_loaded_at().await;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.service_version,
        "checks": {
            "storage": "up",
            "role_cache": {
                "roles": cache.len().await,
                "last_loaded_at": last_loaded_at,
            }
        }
    })))
}
