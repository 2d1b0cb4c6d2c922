pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{middleware::from_fn, routing::get, Router};
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::services::{
    ApprovalService, AuthzError, AuthzStore, Clock, NodeAdminLookup, PermissionCalculator,
    RoleCache, RoleService, StorageDeadline,
};

/// The authorization core wired over one store, one admin lookup and one clock.
#[derive(Clone)]
pub struct RbacCore {
    pub cache: Arc<RoleCache>,
    pub roles: Arc<RoleService>,
    pub calculator: Arc<PermissionCalculator>,
    pub approvals: Arc<ApprovalService>,
}

impl RbacCore {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        admins: Arc<dyn NodeAdminLookup>,
        clock: Arc<dyn Clock>,
        deadline: StorageDeadline,
        refresh_interval: Duration,
    ) -> Self {
        let cache = Arc::new(RoleCache::new(
            store.clone(),
            clock.clone(),
            deadline,
            refresh_interval,
        ));
        let roles = Arc::new(RoleService::new(
            store.clone(),
            cache.clone(),
            clock.clone(),
            deadline,
        ));
        let calculator = Arc::new(PermissionCalculator::new(
            store.clone(),
            cache.clone(),
            clock.clone(),
            deadline,
        ));
        let approvals = Arc::new(ApprovalService::new(
            store,
            admins,
            roles.clone(),
            cache.clone(),
            clock,
            deadline,
        ));

        Self {
            cache,
            roles,
            calculator,
            approvals,
        }
    }

    /// Seed the action catalog and system roles, then load the cache.
    pub async fn bootstrap(&self) -> Result<(), AuthzError> {
        self.roles.seed_system_roles().await?;
        tracing::info!(roles = self.cache.len().await, "Authorization core ready");
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub service_version: String,
    pub store: Arc<dyn AuthzStore>,
    pub core: RbacCore,
}

/// Operational surface: health and Prometheus metrics.
pub fn build_ops_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
