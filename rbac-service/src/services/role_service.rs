//! Role and assignment management.
//!
//! Every successful mutation eagerly refreshes the role cache so permission
//! checks made afterwards in this process observe it.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::catalog::ActionCatalog;
use super::clock::Clock;
use super::role_cache::RoleCache;
use super::store::{AuthzStore, StorageDeadline};
use super::AuthzError;
use crate::models::action::actions_for;
use crate::models::{
    ActionCode, ActionType, AssignRoleRequest, CreateRoleRequest, PermissionGrant, ResourceType,
    Role, RoleAssignment, RoleGrant, RoleWithPermissions, Subject, SubjectType,
    UpdateRoleRequest,
};
use crate::utils::path;

const SYSTEM_ACTOR: &str = "system";

/// Built-in role re-asserted on every startup.
struct SystemRole {
    resource_type: ResourceType,
    code: &'static str,
    name: &'static str,
    is_default: bool,
    permissions: Vec<ActionCode>,
}

fn grant(resource_type: ResourceType, action_types: &[ActionType]) -> Vec<ActionCode> {
    action_types
        .iter()
        .map(|at| ActionCode::new(resource_type, *at))
        .collect()
}

fn system_roles() -> Vec<SystemRole> {
    use ActionType::{Admin, Delete, Read, Update, Write};
    use ResourceType::{App, Chart, Directory, Form, Table};

    vec![
        SystemRole {
            resource_type: Directory,
            code: "viewer",
            name: "Directory Viewer",
            is_default: true,
            permissions: [Directory, Table, Form, Chart]
                .into_iter()
                .flat_map(|rt| grant(rt, &[Read]))
                .collect(),
        },
        SystemRole {
            resource_type: Directory,
            code: "developer",
            name: "Directory Developer",
            is_default: false,
            permissions: [
                grant(Directory, &[Read, Write, Update]),
                grant(Table, &[Read, Write, Update]),
                grant(Form, &[Read, Write]),
                grant(Chart, &[Read]),
            ]
            .concat(),
        },
        SystemRole {
            resource_type: Directory,
            code: "admin",
            name: "Directory Admin",
            is_default: false,
            permissions: actions_for(Directory)
                .into_iter()
                .chain([Table, Form, Chart].into_iter().flat_map(|rt| grant(rt, &[Admin])))
                .collect(),
        },
        SystemRole {
            resource_type: Table,
            code: "viewer",
            name: "Table Viewer",
            is_default: true,
            permissions: grant(Table, &[Read]),
        },
        SystemRole {
            resource_type: Table,
            code: "developer",
            name: "Table Developer",
            is_default: false,
            permissions: grant(Table, &[Read, Write, Update, Delete]),
        },
        SystemRole {
            resource_type: Table,
            code: "admin",
            name: "Table Admin",
            is_default: false,
            permissions: actions_for(Table).into_iter().collect(),
        },
        SystemRole {
            resource_type: Form,
            code: "viewer",
            name: "Form Viewer",
            is_default: true,
            permissions: grant(Form, &[Read]),
        },
        SystemRole {
            resource_type: Form,
            code: "developer",
            name: "Form Developer",
            is_default: false,
            permissions: grant(Form, &[Read, Write]),
        },
        SystemRole {
            resource_type: Form,
            code: "admin",
            name: "Form Admin",
            is_default: false,
            permissions: actions_for(Form).into_iter().collect(),
        },
        SystemRole {
            resource_type: Chart,
            code: "viewer",
            name: "Chart Viewer",
            is_default: true,
            permissions: grant(Chart, &[Read]),
        },
        SystemRole {
            resource_type: Chart,
            code: "admin",
            name: "Chart Admin",
            is_default: false,
            permissions: actions_for(Chart).into_iter().collect(),
        },
        SystemRole {
            resource_type: App,
            code: "admin",
            name: "App Admin",
            is_default: true,
            permissions: actions_for(App).into_iter().collect(),
        },
    ]
}

pub struct RoleService {
    store: Arc<dyn AuthzStore>,
    cache: Arc<RoleCache>,
    catalog: ActionCatalog,
    clock: Arc<dyn Clock>,
    deadline: StorageDeadline,
}

impl RoleService {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        cache: Arc<RoleCache>,
        clock: Arc<dyn Clock>,
        deadline: StorageDeadline,
    ) -> Self {
        Self {
            catalog: ActionCatalog::new(store.clone(), deadline),
            store,
            cache,
            clock,
            deadline,
        }
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    async fn refresh_cache(&self) {
        if let Err(e) = self.cache.refresh().await {
            tracing::warn!(error = %e, "Role cache refresh after mutation failed");
        }
    }

    /// Map permission grants onto stored action ids.
    async fn resolve_permissions(&self, grants: &[PermissionGrant]) -> Result<Vec<Uuid>, AuthzError> {
        let by_code: HashMap<String, Uuid> = self
            .catalog
            .list_actions()
            .await?
            .into_iter()
            .map(|a| (a.code, a.id))
            .collect();

        let mut ids = Vec::new();
        for grant in grants {
            for raw in &grant.actions {
                let code: ActionCode = raw.parse()?;
                if code.resource_type != grant.resource_type {
                    return Err(AuthzError::InvalidActionCode(format!(
                        "{} listed under {}",
                        raw, grant.resource_type
                    )));
                }
                if !code.is_valid() {
                    return Err(AuthzError::UnknownAction(raw.clone()));
                }
                let id = by_code
                    .get(&code.to_string())
                    .ok_or_else(|| AuthzError::UnknownAction(raw.clone()))?;
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        Ok(ids)
    }

    // ==================== Roles ====================

    #[tracing::instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_role(&self, request: CreateRoleRequest) -> Result<Role, AuthzError> {
        request.validate()?;
        let resource_type = request
            .permissions
            .first()
            .map(|g| g.resource_type)
            .ok_or_else(|| AuthzError::InvalidResourceType("no permissions given".to_string()))?;

        if self
            .deadline
            .run(
                "get_role_by",
                self.store.get_role_by(&request.code, resource_type),
            )
            .await?
            .is_some()
        {
            return Err(AuthzError::DuplicateRole {
                code: request.code,
                resource_type: resource_type.to_string(),
            });
        }

        let action_ids = self.resolve_permissions(&request.permissions).await?;

        let mut role = Role::new(
            request.name,
            request.code,
            resource_type,
            request.description,
            request.created_by,
        );
        role.created_at = self.clock.now();
        role.updated_at = role.created_at;

        self.deadline
            .run("create_role", self.store.create_role(&role, &action_ids))
            .await?;
        tracing::info!(role_id = %role.id, role = %role.index_key(), "Role created");

        self.refresh_cache().await;
        Ok(role)
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn update_role(
        &self,
        role_id: Uuid,
        request: UpdateRoleRequest,
    ) -> Result<Role, AuthzError> {
        request.validate()?;
        let mut role = self
            .deadline
            .run("get_role", self.store.get_role(role_id))
            .await?
            .ok_or_else(|| AuthzError::UnknownRole(role_id.to_string()))?;

        if let Some(name) = request.name {
            role.name = name;
        }
        if let Some(description) = request.description {
            role.description = Some(description);
        }
        if let Some(is_default) = request.is_default {
            role.is_default = is_default;
        }
        role.updated_at = self.clock.now();

        let action_ids = match &request.permissions {
            Some(grants) => Some(self.resolve_permissions(grants).await?),
            None => None,
        };

        self.deadline
            .run(
                "update_role",
                self.store.update_role(&role, action_ids.as_deref()),
            )
            .await?;
        tracing::info!(role_id = %role.id, role = %role.index_key(), "Role updated");

        self.refresh_cache().await;
        Ok(role)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_role(&self, role_id: Uuid) -> Result<(), AuthzError> {
        self.deadline
            .run("delete_role", self.store.delete_role(role_id))
            .await?;
        tracing::info!(role_id = %role_id, "Role deleted");

        self.refresh_cache().await;
        Ok(())
    }

    pub async fn list_roles(&self, resource_type: Option<ResourceType>) -> Vec<Role> {
        self.cache.list_roles(resource_type).await
    }

    pub async fn get_role_with_permissions(
        &self,
        role_id: Uuid,
    ) -> Result<RoleWithPermissions, AuthzError> {
        let snapshot = self.cache.snapshot().await;
        let role = snapshot
            .role(role_id)
            .cloned()
            .ok_or_else(|| AuthzError::UnknownRole(role_id.to_string()))?;
        let permissions = snapshot.permissions(role_id).cloned().unwrap_or_default();
        Ok(RoleWithPermissions { role, permissions })
    }

    /// Upsert the built-in roles and re-assert their permission sets and
    /// default flags.
    #[tracing::instrument(skip(self))]
    pub async fn seed_system_roles(&self) -> Result<(), AuthzError> {
        let actions = self.catalog.ensure_actions_seeded().await?;

        for def in system_roles() {
            let action_ids = def
                .permissions
                .iter()
                .map(|code| {
                    actions
                        .get(&code.to_string())
                        .map(|a| a.id)
                        .ok_or_else(|| AuthzError::UnknownAction(code.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let existing = self
                .deadline
                .run("get_role_by", self.store.get_role_by(def.code, def.resource_type))
                .await?;

            match existing {
                Some(mut role) => {
                    role.is_system = true;
                    role.is_default = def.is_default;
                    role.updated_at = self.clock.now();
                    self.deadline
                        .run(
                            "update_role",
                            self.store.update_role(&role, Some(action_ids.as_slice())),
                        )
                        .await?;
                }
                None => {
                    let mut role = Role::new(
                        def.name.to_string(),
                        def.code.to_string(),
                        def.resource_type,
                        None,
                        SYSTEM_ACTOR.to_string(),
                    );
                    role.is_system = true;
                    role.is_default = def.is_default;
                    role.created_at = self.clock.now();
                    role.updated_at = role.created_at;
                    self.deadline
                        .run("create_role", self.store.create_role(&role, &action_ids))
                        .await?;
                    tracing::info!(role = %role.index_key(), "System role created");
                }
            }
        }

        self.cache.refresh().await
    }

    // ==================== Assignments ====================

    /// Build a validated assignment of `role_id` to `subject`.
    ///
    /// The resource path must belong to the grant's tenant and workspace and
    /// the window, when bounded, must end after it starts.
    pub(crate) fn prepare_assignment(
        &self,
        subject: Subject,
        role_id: Uuid,
        grant: &RoleGrant,
    ) -> Result<RoleAssignment, AuthzError> {
        let resource_path = path::normalize(&grant.resource_path)?;
        let (tenant, workspace) = path::tenant_app(&resource_path)?;
        if tenant != grant.tenant || workspace != grant.workspace {
            return Err(AuthzError::NotAuthorized(format!(
                "{} is outside {}/{}",
                resource_path, grant.tenant, grant.workspace
            )));
        }
        let subject_name = match subject.subject_type {
            SubjectType::Department => path::normalize(&subject.subject)?,
            SubjectType::User if subject.subject.trim().is_empty() => {
                return Err(AuthzError::InvalidSubject("empty username".to_string()));
            }
            SubjectType::User => subject.subject,
        };

        let now = self.clock.now();
        let start_time = grant.start_time.unwrap_or(now);
        if grant.end_time.is_some_and(|end| end <= start_time) {
            return Err(AuthzError::InvalidWindow);
        }

        Ok(RoleAssignment {
            id: Uuid::new_v4(),
            tenant: grant.tenant.clone(),
            workspace: grant.workspace.clone(),
            subject_type: subject.subject_type,
            subject: subject_name,
            role_id,
            resource_path,
            start_time,
            end_time: grant.end_time,
            created_by: grant.created_by.clone(),
            created_at: now,
        })
    }

    async fn resolve_role(&self, resource_type: ResourceType, code: &str) -> Result<Role, AuthzError> {
        if let Some(role) = self.cache.get_role_by_code(resource_type, code).await {
            return Ok(role);
        }
        self.deadline
            .run("get_role_by", self.store.get_role_by(code, resource_type))
            .await?
            .ok_or_else(|| AuthzError::UnknownRole(format!("{}:{}", resource_type, code)))
    }

    #[tracing::instrument(
        skip(self, request),
        fields(subject = %request.subject.subject, resource_path = %request.grant.resource_path)
    )]
    pub async fn assign_role(&self, request: AssignRoleRequest) -> Result<RoleAssignment, AuthzError> {
        let role = self
            .resolve_role(request.resource_type, &request.role_code)
            .await?;
        let assignment = self.prepare_assignment(request.subject, role.id, &request.grant)?;

        self.deadline
            .run(
                "create_role_assignment",
                self.store.create_role_assignment(&assignment),
            )
            .await?;
        tracing::info!(
            assignment_id = %assignment.id,
            role = %role.index_key(),
            "Role assigned"
        );
        Ok(assignment)
    }

    pub async fn assign_role_to_user(
        &self,
        username: &str,
        role_code: &str,
        resource_type: ResourceType,
        grant: RoleGrant,
    ) -> Result<RoleAssignment, AuthzError> {
        self.assign_role(AssignRoleRequest {
            subject: Subject::user(username),
            role_code: role_code.to_string(),
            resource_type,
            grant,
        })
        .await
    }

    pub async fn assign_role_to_department(
        &self,
        department: &str,
        role_code: &str,
        resource_type: ResourceType,
        grant: RoleGrant,
    ) -> Result<RoleAssignment, AuthzError> {
        self.assign_role(AssignRoleRequest {
            subject: Subject::department(department),
            role_code: role_code.to_string(),
            resource_type,
            grant,
        })
        .await
    }

    async fn revoke_role(
        &self,
        subject: Subject,
        role_code: &str,
        resource_type: ResourceType,
        resource_path: &str,
    ) -> Result<u64, AuthzError> {
        let role = self.resolve_role(resource_type, role_code).await?;
        let resource_path = path::normalize(resource_path)?;
        let (tenant, workspace) = path::tenant_app(&resource_path)?;
        let subject = match subject.subject_type {
            SubjectType::Department => Subject::department(path::normalize(&subject.subject)?),
            SubjectType::User => subject,
        };
        let removed = self
            .deadline
            .run(
                "delete_role_assignments_by_subject",
                self.store.delete_role_assignments_by_subject(
                    &tenant,
                    &workspace,
                    &subject,
                    role.id,
                    &resource_path,
                ),
            )
            .await?;
        tracing::info!(
            subject = %subject.subject,
            role = %role.index_key(),
            resource_path = %resource_path,
            removed,
            "Role revoked"
        );
        Ok(removed)
    }

    /// Remove every assignment of the role to `username` at exactly `resource_path`.
    pub async fn revoke_role_from_user(
        &self,
        username: &str,
        role_code: &str,
        resource_type: ResourceType,
        resource_path: &str,
    ) -> Result<u64, AuthzError> {
        self.revoke_role(Subject::user(username), role_code, resource_type, resource_path)
            .await
    }

    pub async fn revoke_role_from_department(
        &self,
        department: &str,
        role_code: &str,
        resource_type: ResourceType,
        resource_path: &str,
    ) -> Result<u64, AuthzError> {
        self.revoke_role(
            Subject::department(department),
            role_code,
            resource_type,
            resource_path,
        )
        .await
    }

    /// Delete one assignment by id. Returns whether it existed.
    pub async fn revoke_assignment(&self, assignment_id: Uuid) -> Result<bool, AuthzError> {
        let removed = self
            .deadline
            .run(
                "delete_role_assignment",
                self.store.delete_role_assignment(assignment_id),
            )
            .await?;
        if removed {
            tracing::info!(assignment_id = %assignment_id, "Assignment revoked");
        }
        Ok(removed)
    }

    pub async fn list_assignments(
        &self,
        tenant: &str,
        workspace: &str,
    ) -> Result<Vec<RoleAssignment>, AuthzError> {
        self.deadline
            .run(
                "list_assignments",
                self.store.list_assignments(tenant, workspace),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::canonical_codes;

    #[test]
    fn test_system_roles_use_valid_codes() {
        let catalog: Vec<ActionCode> = canonical_codes();
        for def in system_roles() {
            assert!(!def.permissions.is_empty(), "{}:{}", def.resource_type, def.code);
            for code in &def.permissions {
                assert!(catalog.contains(code), "{} not in catalog", code);
            }
        }
    }

    #[test]
    fn test_one_default_per_resource_type() {
        for rt in ResourceType::ALL {
            let defaults = system_roles()
                .into_iter()
                .filter(|r| r.resource_type == rt && r.is_default)
                .count();
            assert_eq!(defaults, 1, "{}", rt);
        }
    }

    #[test]
    fn test_directory_developer_cannot_delete() {
        let developer = system_roles()
            .into_iter()
            .find(|r| r.resource_type == ResourceType::Directory && r.code == "developer")
            .unwrap();
        assert!(developer
            .permissions
            .iter()
            .all(|c| c.action_type != ActionType::Delete && !c.is_admin()));
    }
}
