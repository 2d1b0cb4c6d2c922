//! In-process implementations of the persistence contracts.
//!
//! Used by the test-suite and for local development without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{AuthzStore, NodeAdminLookup};
use super::AuthzError;
use crate::models::{
    Action, PermissionRequest, RequestFilter, RequestStatus, RequestTransition, ResourceType,
    Role, RoleAssignment, RolePermission, Subject,
};
use crate::utils::path;

#[derive(Default)]
struct MemoryState {
    actions: HashMap<Uuid, Action>,
    roles: HashMap<Uuid, Role>,
    role_permissions: Vec<RolePermission>,
    assignments: HashMap<Uuid, RoleAssignment>,
    requests: HashMap<Uuid, PermissionRequest>,
}

impl MemoryState {
    fn replace_permissions(&mut self, role_id: Uuid, action_ids: &[Uuid]) -> Result<(), AuthzError> {
        if let Some(missing) = action_ids.iter().find(|id| !self.actions.contains_key(id)) {
            return Err(AuthzError::UnknownAction(missing.to_string()));
        }
        self.role_permissions.retain(|rp| rp.role_id != role_id);
        let mut seen = HashSet::new();
        for action_id in action_ids {
            if seen.insert(*action_id) {
                self.role_permissions.push(RolePermission {
                    role_id,
                    action_id: *action_id,
                });
            }
        }
        Ok(())
    }

    fn pending_request(&mut self, request_id: Uuid) -> Result<&mut PermissionRequest, AuthzError> {
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(AuthzError::UnknownRequest(request_id))?;
        if request.status != RequestStatus::Pending {
            return Err(AuthzError::IllegalTransition {
                id: request_id,
                status: request.status.to_string(),
            });
        }
        Ok(request)
    }
}

/// Mutex-protected in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a storage error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, AuthzError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::Storage(anyhow::anyhow!("Memory store unavailable")));
        }
        self.state
            .lock()
            .map_err(|e| AuthzError::Storage(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl AuthzStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AuthzError> {
        self.state().map(|_| ())
    }

    async fn get_all_actions(&self) -> Result<Vec<Action>, AuthzError> {
        let mut actions: Vec<Action> = self.state()?.actions.values().cloned().collect();
        actions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(actions)
    }

    async fn get_action_by_code(&self, code: &str) -> Result<Option<Action>, AuthzError> {
        Ok(self
            .state()?
            .actions
            .values()
            .find(|a| a.code == code)
            .cloned())
    }

    async fn upsert_action(&self, action: &Action) -> Result<Action, AuthzError> {
        let mut state = self.state()?;
        if let Some(existing) = state.actions.values().find(|a| a.code == action.code) {
            return Ok(existing.clone());
        }
        state.actions.insert(action.id, action.clone());
        Ok(action.clone())
    }

    async fn get_all_roles(&self) -> Result<Vec<Role>, AuthzError> {
        Ok(self.state()?.roles.values().cloned().collect())
    }

    async fn get_all_role_permissions(&self) -> Result<Vec<RolePermission>, AuthzError> {
        Ok(self.state()?.role_permissions.clone())
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthzError> {
        Ok(self.state()?.roles.get(&role_id).cloned())
    }

    async fn get_role_by(
        &self,
        code: &str,
        resource_type: ResourceType,
    ) -> Result<Option<Role>, AuthzError> {
        Ok(self
            .state()?
            .roles
            .values()
            .find(|r| r.code == code && r.resource_type == resource_type)
            .cloned())
    }

    async fn create_role(&self, role: &Role, action_ids: &[Uuid]) -> Result<(), AuthzError> {
        let mut state = self.state()?;
        if state
            .roles
            .values()
            .any(|r| r.code == role.code && r.resource_type == role.resource_type)
        {
            return Err(AuthzError::DuplicateRole {
                code: role.code.clone(),
                resource_type: role.resource_type.to_string(),
            });
        }
        state.replace_permissions(role.id, action_ids)?;
        if role.is_default {
            for other in state.roles.values_mut() {
                if other.resource_type == role.resource_type {
                    other.is_default = false;
                }
            }
        }
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(
        &self,
        role: &Role,
        action_ids: Option<&[Uuid]>,
    ) -> Result<(), AuthzError> {
        let mut state = self.state()?;
        if !state.roles.contains_key(&role.id) {
            return Err(AuthzError::UnknownRole(role.id.to_string()));
        }
        if let Some(ids) = action_ids {
            state.replace_permissions(role.id, ids)?;
        }
        if role.is_default {
            for other in state.roles.values_mut() {
                if other.resource_type == role.resource_type && other.id != role.id {
                    other.is_default = false;
                }
            }
        }
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<(), AuthzError> {
        let mut state = self.state()?;
        let role = state
            .roles
            .get(&role_id)
            .ok_or_else(|| AuthzError::UnknownRole(role_id.to_string()))?;
        if role.is_system {
            return Err(AuthzError::SystemRoleImmutable(role.index_key()));
        }
        if state.assignments.values().any(|a| a.role_id == role_id)
            || state.requests.values().any(|r| r.role_id == role_id)
        {
            return Err(AuthzError::RoleInUse(role.index_key()));
        }
        state.role_permissions.retain(|rp| rp.role_id != role_id);
        state.roles.remove(&role_id);
        Ok(())
    }

    async fn create_role_assignment(&self, assignment: &RoleAssignment) -> Result<(), AuthzError> {
        let mut state = self.state()?;
        if !state.roles.contains_key(&assignment.role_id) {
            return Err(AuthzError::UnknownRole(assignment.role_id.to_string()));
        }
        state.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn get_role_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<Option<RoleAssignment>, AuthzError> {
        Ok(self.state()?.assignments.get(&assignment_id).cloned())
    }

    async fn delete_role_assignment(&self, assignment_id: Uuid) -> Result<bool, AuthzError> {
        Ok(self.state()?.assignments.remove(&assignment_id).is_some())
    }

    async fn delete_role_assignments_by_subject(
        &self,
        tenant: &str,
        workspace: &str,
        subject: &Subject,
        role_id: Uuid,
        resource_path: &str,
    ) -> Result<u64, AuthzError> {
        let mut state = self.state()?;
        let before = state.assignments.len();
        state.assignments.retain(|_, a| {
            !(a.tenant == tenant
                && a.workspace == workspace
                && a.matches_subject(subject)
                && a.role_id == role_id
                && a.resource_path == resource_path)
        });
        Ok((before - state.assignments.len()) as u64)
    }

    async fn get_assignments_by_subjects(
        &self,
        tenant: &str,
        workspace: &str,
        subjects: &[Subject],
        at: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, AuthzError> {
        let state = self.state()?;
        let mut found: Vec<RoleAssignment> = state
            .assignments
            .values()
            .filter(|a| a.tenant == tenant && a.workspace == workspace)
            .filter(|a| subjects.iter().any(|s| a.matches_subject(s)))
            .filter(|a| a.is_effective_at(at))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn list_assignments(
        &self,
        tenant: &str,
        workspace: &str,
    ) -> Result<Vec<RoleAssignment>, AuthzError> {
        let state = self.state()?;
        let mut found: Vec<RoleAssignment> = state
            .assignments
            .values()
            .filter(|a| a.tenant == tenant && a.workspace == workspace)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn create_permission_request(
        &self,
        request: &PermissionRequest,
    ) -> Result<(), AuthzError> {
        self.state()?.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_permission_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<PermissionRequest>, AuthzError> {
        Ok(self.state()?.requests.get(&request_id).cloned())
    }

    async fn list_permission_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<PermissionRequest>, AuthzError> {
        let state = self.state()?;
        let mut found: Vec<PermissionRequest> = state
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn transition_permission_request(
        &self,
        request_id: Uuid,
        transition: &RequestTransition,
    ) -> Result<PermissionRequest, AuthzError> {
        let mut state = self.state()?;
        let request = state.pending_request(request_id)?;
        transition.apply(request);
        Ok(request.clone())
    }

    async fn approve_permission_request(
        &self,
        request_id: Uuid,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        assignment: &RoleAssignment,
    ) -> Result<PermissionRequest, AuthzError> {
        let mut state = self.state()?;
        state.pending_request(request_id)?;
        if !state.roles.contains_key(&assignment.role_id) {
            return Err(AuthzError::UnknownRole(assignment.role_id.to_string()));
        }
        state.assignments.insert(assignment.id, assignment.clone());

        let request = state.pending_request(request_id)?;
        request.status = RequestStatus::Approved;
        request.approved_by = Some(approved_by.to_string());
        request.approved_at = Some(approved_at);
        request.role_assignment_id = Some(assignment.id);
        Ok(request.clone())
    }
}

/// Service-tree admin registry. A node's admins are those registered at the
/// node itself or at any ancestor.
#[derive(Default)]
pub struct MemoryServiceTree {
    admins: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryServiceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_admin(&self, resource_path: &str, username: &str) {
        if let Ok(mut admins) = self.admins.lock() {
            admins
                .entry(resource_path.to_string())
                .or_default()
                .insert(username.to_string());
        }
    }
}

#[async_trait]
impl NodeAdminLookup for MemoryServiceTree {
    async fn get_node_admins(&self, resource_path: &str) -> Result<HashSet<String>, AuthzError> {
        let mut scopes = vec![resource_path.to_string()];
        scopes.extend(path::ancestors(resource_path)?);

        let admins = self.admins.lock().map_err(|e| {
            AuthzError::Storage(anyhow::anyhow!("Service tree mutex poisoned: {}", e))
        })?;
        Ok(scopes
            .iter()
            .filter_map(|scope| admins.get(scope))
            .flatten()
            .cloned()
            .collect())
    }
}
