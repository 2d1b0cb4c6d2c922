//! Test helper module for rbac-service integration tests.
//!
//! Wires the authorization core over the in-memory store, an in-memory
//! service tree and a manually driven clock.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rbac_service::{
    build_ops_router,
    models::{ResourceType, RoleGrant, ServiceTreeNode},
    services::{
        metrics, FixedClock, MemoryServiceTree, MemoryStore, PermissionMap, PermissionQuery,
        StorageDeadline,
    },
    utils::path,
    AppState, RbacCore,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

pub const TENANT: &str = "tenantA";
pub const WORKSPACE: &str = "shop";

/// Test application backed by in-memory storage.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub tree: Arc<MemoryServiceTree>,
    pub clock: Arc<FixedClock>,
    pub core: RbacCore,
}

impl TestApp {
    /// Build the core and seed the catalog and system roles.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let _ = metrics::init_metrics();

        let store = Arc::new(MemoryStore::new());
        let tree = Arc::new(MemoryServiceTree::new());
        let clock = Arc::new(FixedClock::new(start_time()));

        let core = RbacCore::new(
            store.clone(),
            tree.clone(),
            clock.clone(),
            StorageDeadline::default(),
            std::time::Duration::from_secs(300),
        );
        core.bootstrap().await?;

        Ok(Self {
            store,
            tree,
            clock,
            core,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        rbac_service::services::Clock::now(self.clock.as_ref())
    }

    /// Open-ended grant at `resource_path` starting now.
    pub fn grant(&self, resource_path: &str) -> RoleGrant {
        let (tenant, workspace) =
            path::tenant_app(resource_path).expect("test resource path must be valid");
        RoleGrant {
            tenant,
            workspace,
            resource_path: resource_path.to_string(),
            start_time: None,
            end_time: None,
            created_by: "admin".to_string(),
        }
    }

    /// Grant at `resource_path` with an explicit window.
    pub fn windowed_grant(
        &self,
        resource_path: &str,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> RoleGrant {
        RoleGrant {
            start_time: Some(start_time),
            end_time,
            ..self.grant(resource_path)
        }
    }

    pub async fn role_id(&self, resource_type: ResourceType, code: &str) -> Uuid {
        self.core
            .cache
            .get_role_by_code(resource_type, code)
            .await
            .unwrap_or_else(|| panic!("role {}:{} not seeded", resource_type, code))
            .id
    }

    pub async fn permissions(&self, query: &PermissionQuery, roots: &[ServiceTreeNode]) -> PermissionMap {
        self.core
            .calculator
            .compute(query, roots)
            .await
            .expect("Failed to compute permissions")
    }

    /// Serve the operational router on an ephemeral port.
    pub async fn serve(&self) -> SocketAddr {
        let state = AppState {
            service_name: "rbac-service-test".to_string(),
            service_version: "0.0.0".to_string(),
            store: self.store.clone(),
            core: self.core.clone(),
        };
        let app = build_ops_router(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn seconds(n: i64) -> Duration {
    Duration::seconds(n)
}

pub fn query(username: &str) -> PermissionQuery {
    PermissionQuery::new(TENANT, WORKSPACE, username)
}

/// Flatten one node's entry into `action_type -> granted` for readable asserts.
pub fn actions_at(map: &PermissionMap, node_path: &str) -> BTreeMap<String, bool> {
    map.get(node_path)
        .unwrap_or_else(|| panic!("no entry for {}", node_path))
        .iter()
        .map(|(code, granted)| (code.action_type.to_string(), *granted))
        .collect()
}

pub fn expect(pairs: &[(&str, bool)]) -> BTreeMap<String, bool> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}
