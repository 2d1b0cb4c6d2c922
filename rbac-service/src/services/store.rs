//! Persistence contracts consumed by the authorization core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::AuthzError;
use crate::models::{
    Action, PermissionRequest, RequestFilter, RequestTransition, ResourceType, Role,
    RoleAssignment, RolePermission, Subject,
};

/// Transactional store for roles, assignments and permission requests.
///
/// Reads are at least read-committed. Every method that writes more than one
/// row does so atomically.
#[async_trait]
pub trait AuthzStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AuthzError>;

    // ==================== Actions ====================

    async fn get_all_actions(&self) -> Result<Vec<Action>, AuthzError>;

    async fn get_action_by_code(&self, code: &str) -> Result<Option<Action>, AuthzError>;

    /// Insert unless an action with the same code exists. Returns the stored row.
    async fn upsert_action(&self, action: &Action) -> Result<Action, AuthzError>;

    // ==================== Roles ====================

    async fn get_all_roles(&self) -> Result<Vec<Role>, AuthzError>;

    async fn get_all_role_permissions(&self) -> Result<Vec<RolePermission>, AuthzError>;

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthzError>;

    async fn get_role_by(
        &self,
        code: &str,
        resource_type: ResourceType,
    ) -> Result<Option<Role>, AuthzError>;

    /// Insert the role and one permission row per action id.
    /// Fails with `DuplicateRole` on a `(code, resource_type)` collision.
    async fn create_role(&self, role: &Role, action_ids: &[Uuid]) -> Result<(), AuthzError>;

    /// Persist editable fields. When `role.is_default` is set, every other
    /// role of the same resource type loses its default flag. When
    /// `action_ids` is given the permission set is replaced wholesale.
    async fn update_role(&self, role: &Role, action_ids: Option<&[Uuid]>)
        -> Result<(), AuthzError>;

    /// Delete the role and its permissions. Rejects system roles and roles
    /// that still have assignments.
    async fn delete_role(&self, role_id: Uuid) -> Result<(), AuthzError>;

    // ==================== Assignments ====================

    async fn create_role_assignment(&self, assignment: &RoleAssignment) -> Result<(), AuthzError>;

    async fn get_role_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<Option<RoleAssignment>, AuthzError>;

    async fn delete_role_assignment(&self, assignment_id: Uuid) -> Result<bool, AuthzError>;

    /// Delete assignments of `role_id` to `subject` at exactly `resource_path`.
    async fn delete_role_assignments_by_subject(
        &self,
        tenant: &str,
        workspace: &str,
        subject: &Subject,
        role_id: Uuid,
        resource_path: &str,
    ) -> Result<u64, AuthzError>;

    /// All assignments in the workspace effective at `at` whose subject is
    /// any of `subjects`, in a single round-trip.
    async fn get_assignments_by_subjects(
        &self,
        tenant: &str,
        workspace: &str,
        subjects: &[Subject],
        at: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, AuthzError>;

    async fn list_assignments(
        &self,
        tenant: &str,
        workspace: &str,
    ) -> Result<Vec<RoleAssignment>, AuthzError>;

    // ==================== Permission requests ====================

    async fn create_permission_request(&self, request: &PermissionRequest)
        -> Result<(), AuthzError>;

    async fn get_permission_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<PermissionRequest>, AuthzError>;

    async fn list_permission_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<PermissionRequest>, AuthzError>;

    /// Move a pending request to rejected or cancelled.
    /// Fails with `IllegalTransition` when the request is not pending.
    async fn transition_permission_request(
        &self,
        request_id: Uuid,
        transition: &RequestTransition,
    ) -> Result<PermissionRequest, AuthzError>;

    /// Mark a pending request approved, insert `assignment` and link it, all
    /// in one transaction.
    async fn approve_permission_request(
        &self,
        request_id: Uuid,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        assignment: &RoleAssignment,
    ) -> Result<PermissionRequest, AuthzError>;
}

/// Lookup of node administrators in the external service tree.
#[async_trait]
pub trait NodeAdminLookup: Send + Sync {
    async fn get_node_admins(&self, resource_path: &str) -> Result<HashSet<String>, AuthzError>;
}

/// Deadline applied to every storage call made by the core.
#[derive(Debug, Clone, Copy)]
pub struct StorageDeadline(pub Duration);

impl Default for StorageDeadline {
    fn default() -> Self {
        Self(Duration::from_secs(5))
    }
}

impl StorageDeadline {
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, AuthzError>
    where
        F: Future<Output = Result<T, AuthzError>>,
    {
        match tokio::time::timeout(self.0, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.0.as_millis() as u64, "Storage deadline exceeded");
                Err(AuthzError::Storage(anyhow::anyhow!(
                    "{} exceeded deadline of {:?}",
                    op,
                    self.0
                )))
            }
        }
    }
}
