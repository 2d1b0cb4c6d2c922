//! PostgreSQL implementation of the persistence contracts.
//!
//! Queries are runtime-checked; rows are decoded into private row structs and
//! converted into domain models so enum columns are validated on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

use super::store::{AuthzStore, NodeAdminLookup};
use super::AuthzError;
use crate::models::{
    Action, PermissionRequest, RequestFilter, RequestStatus, RequestTransition, ResourceType,
    Role, RoleAssignment, RolePermission, Subject,
};
use crate::utils::path;

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: Uuid,
    code: String,
    resource_type: String,
    action_type: String,
    is_system: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActionRow> for Action {
    type Error = AuthzError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        Ok(Action {
            id: row.id,
            code: row.code,
            resource_type: row.resource_type.parse()?,
            action_type: row.action_type.parse()?,
            is_system: row.is_system,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    code: String,
    resource_type: String,
    description: Option<String>,
    is_system: bool,
    is_default: bool,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoleRow> for Role {
    type Error = AuthzError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        Ok(Role {
            id: row.id,
            name: row.name,
            code: row.code,
            resource_type: row.resource_type.parse()?,
            description: row.description,
            is_system: row.is_system,
            is_default: row.is_default,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: Uuid,
    tenant: String,
    workspace: String,
    subject_type: String,
    subject: String,
    role_id: Uuid,
    resource_path: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AssignmentRow> for RoleAssignment {
    type Error = AuthzError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(RoleAssignment {
            id: row.id,
            tenant: row.tenant,
            workspace: row.workspace,
            subject_type: row.subject_type.parse()?,
            subject: row.subject,
            role_id: row.role_id,
            resource_path: row.resource_path,
            start_time: row.start_time,
            end_time: row.end_time,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    tenant: String,
    workspace_id: String,
    applicant: String,
    subject_type: String,
    subject: String,
    resource_path: String,
    role_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    reason: String,
    status: String,
    created_at: DateTime<Utc>,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    rejected_by: Option<String>,
    rejected_at: Option<DateTime<Utc>>,
    reject_reason: Option<String>,
    cancelled_by: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    role_assignment_id: Option<Uuid>,
}

impl TryFrom<RequestRow> for PermissionRequest {
    type Error = AuthzError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(PermissionRequest {
            id: row.id,
            tenant: row.tenant,
            workspace_id: row.workspace_id,
            applicant: row.applicant,
            subject_type: row.subject_type.parse()?,
            subject: row.subject,
            resource_path: row.resource_path,
            role_id: row.role_id,
            start_time: row.start_time,
            end_time: row.end_time,
            reason: row.reason,
            status: row.status.parse()?,
            created_at: row.created_at,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejected_by: row.rejected_by,
            rejected_at: row.rejected_at,
            reject_reason: row.reject_reason,
            cancelled_by: row.cancelled_by,
            cancelled_at: row.cancelled_at,
            cancel_reason: row.cancel_reason,
            role_assignment_id: row.role_assignment_id,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, AuthzError>
where
    T: TryFrom<R, Error = AuthzError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Insert one permission row per action id.
async fn insert_role_permissions(
    conn: &mut PgConnection,
    role_id: Uuid,
    action_ids: &[Uuid],
) -> Result<(), AuthzError> {
    if action_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, action_id)
        SELECT $1, UNNEST($2::uuid[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(role_id)
    .bind(action_ids)
    .execute(conn)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            AuthzError::UnknownAction(format!("action referenced by role {}", role_id))
        } else {
            AuthzError::from(e)
        }
    })?;
    Ok(())
}

async fn delete_role_permissions_by_role(
    conn: &mut PgConnection,
    role_id: Uuid,
) -> Result<(), AuthzError> {
    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(role_id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn insert_role_assignment(
    conn: &mut PgConnection,
    assignment: &RoleAssignment,
) -> Result<(), AuthzError> {
    sqlx::query(
        r#"
        INSERT INTO role_assignments
            (id, tenant, workspace, subject_type, subject, role_id, resource_path,
             start_time, end_time, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(assignment.id)
    .bind(&assignment.tenant)
    .bind(&assignment.workspace)
    .bind(assignment.subject_type.as_str())
    .bind(&assignment.subject)
    .bind(assignment.role_id)
    .bind(&assignment.resource_path)
    .bind(assignment.start_time)
    .bind(assignment.end_time)
    .bind(&assignment.created_by)
    .bind(assignment.created_at)
    .execute(conn)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            AuthzError::UnknownRole(assignment.role_id.to_string())
        } else {
            AuthzError::from(e)
        }
    })?;
    Ok(())
}

#[async_trait]
impl AuthzStore for PgStore {
    async fn health_check(&self) -> Result<(), AuthzError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AuthzError::from(e)
            })?;
        Ok(())
    }

    // ==================== Actions ====================

    async fn get_all_actions(&self) -> Result<Vec<Action>, AuthzError> {
        let rows = sqlx::query_as::<_, ActionRow>("SELECT * FROM actions ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn get_action_by_code(&self, code: &str) -> Result<Option<Action>, AuthzError> {
        sqlx::query_as::<_, ActionRow>("SELECT * FROM actions WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(Action::try_from)
            .transpose()
    }

    async fn upsert_action(&self, action: &Action) -> Result<Action, AuthzError> {
        sqlx::query(
            r#"
            INSERT INTO actions (id, code, resource_type, action_type, is_system, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(action.id)
        .bind(&action.code)
        .bind(action.resource_type.as_str())
        .bind(action.action_type.as_str())
        .bind(action.is_system)
        .bind(action.created_at)
        .execute(&self.pool)
        .await?;

        self.get_action_by_code(&action.code)
            .await?
            .ok_or_else(|| AuthzError::UnknownAction(action.code.clone()))
    }

    // ==================== Roles ====================

    async fn get_all_roles(&self) -> Result<Vec<Role>, AuthzError> {
        let rows = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles ORDER BY resource_type, code")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn get_all_role_permissions(&self) -> Result<Vec<RolePermission>, AuthzError> {
        let rows: Vec<(Uuid, Uuid)> =
            sqlx::query_as("SELECT role_id, action_id FROM role_permissions")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(role_id, action_id)| RolePermission { role_id, action_id })
            .collect())
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthzError> {
        sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Role::try_from)
            .transpose()
    }

    async fn get_role_by(
        &self,
        code: &str,
        resource_type: ResourceType,
    ) -> Result<Option<Role>, AuthzError> {
        sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE code = $1 AND resource_type = $2")
            .bind(code)
            .bind(resource_type.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Role::try_from)
            .transpose()
    }

    async fn create_role(&self, role: &Role, action_ids: &[Uuid]) -> Result<(), AuthzError> {
        let mut tx = self.pool.begin().await?;

        if role.is_default {
            sqlx::query("UPDATE roles SET is_default = FALSE WHERE resource_type = $1")
                .bind(role.resource_type.as_str())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO roles
                (id, name, code, resource_type, description, is_system, is_default,
                 created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.code)
        .bind(role.resource_type.as_str())
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.is_default)
        .bind(&role.created_by)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AuthzError::DuplicateRole {
                    code: role.code.clone(),
                    resource_type: role.resource_type.to_string(),
                }
            } else {
                AuthzError::from(e)
            }
        })?;

        insert_role_permissions(&mut tx, role.id, action_ids).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_role(
        &self,
        role: &Role,
        action_ids: Option<&[Uuid]>,
    ) -> Result<(), AuthzError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, description = $3, is_default = $4, is_system = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_default)
        .bind(role.is_system)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AuthzError::UnknownRole(role.id.to_string()));
        }

        if role.is_default {
            sqlx::query("UPDATE roles SET is_default = FALSE WHERE resource_type = $1 AND id <> $2")
                .bind(role.resource_type.as_str())
                .bind(role.id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(ids) = action_ids {
            delete_role_permissions_by_role(&mut tx, role.id).await?;
            insert_role_permissions(&mut tx, role.id, ids).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<(), AuthzError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AuthzError::UnknownRole(role_id.to_string()))?;
        let role = Role::try_from(row)?;

        if role.is_system {
            return Err(AuthzError::SystemRoleImmutable(role.index_key()));
        }

        let (in_use,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM role_assignments WHERE role_id = $1)",
        )
        .bind(role_id)
        .fetch_one(&mut *tx)
        .await?;
        if in_use {
            return Err(AuthzError::RoleInUse(role.index_key()));
        }

        delete_role_permissions_by_role(&mut tx, role_id).await?;
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // Still referenced by permission requests.
                if is_foreign_key_violation(&e) {
                    AuthzError::RoleInUse(role.index_key())
                } else {
                    AuthzError::from(e)
                }
            })?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== Assignments ====================

    async fn create_role_assignment(&self, assignment: &RoleAssignment) -> Result<(), AuthzError> {
        let mut conn = self.pool.acquire().await?;
        insert_role_assignment(&mut conn, assignment).await
    }

    async fn get_role_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<Option<RoleAssignment>, AuthzError> {
        sqlx::query_as::<_, AssignmentRow>("SELECT * FROM role_assignments WHERE id = $1")
            .bind(assignment_id)
            .fetch_optional(&self.pool)
            .await?
            .map(RoleAssignment::try_from)
            .transpose()
    }

    async fn delete_role_assignment(&self, assignment_id: Uuid) -> Result<bool, AuthzError> {
        let result = sqlx::query("DELETE FROM role_assignments WHERE id = $1")
            .bind(assignment_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_role_assignments_by_subject(
        &self,
        tenant: &str,
        workspace: &str,
        subject: &Subject,
        role_id: Uuid,
        resource_path: &str,
    ) -> Result<u64, AuthzError> {
        let result = sqlx::query(
            r#"
            DELETE FROM role_assignments
            WHERE tenant = $1 AND workspace = $2 AND subject_type = $3 AND subject = $4
              AND role_id = $5 AND resource_path = $6
            "#,
        )
        .bind(tenant)
        .bind(workspace)
        .bind(subject.subject_type.as_str())
        .bind(&subject.subject)
        .bind(role_id)
        .bind(resource_path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_assignments_by_subjects(
        &self,
        tenant: &str,
        workspace: &str,
        subjects: &[Subject],
        at: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, AuthzError> {
        if subjects.is_empty() {
            return Ok(Vec::new());
        }
        let subject_types: Vec<&str> = subjects.iter().map(|s| s.subject_type.as_str()).collect();
        let subject_values: Vec<&str> = subjects.iter().map(|s| s.subject.as_str()).collect();

        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT ra.*
            FROM role_assignments ra
            JOIN UNNEST($3::text[], $4::text[]) AS s(subject_type, subject)
              ON ra.subject_type = s.subject_type AND ra.subject = s.subject
            WHERE ra.tenant = $1 AND ra.workspace = $2
              AND ra.start_time <= $5
              AND (ra.end_time IS NULL OR ra.end_time > $5)
            ORDER BY ra.created_at, ra.id
            "#,
        )
        .bind(tenant)
        .bind(workspace)
        .bind(&subject_types)
        .bind(&subject_values)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_assignments(
        &self,
        tenant: &str,
        workspace: &str,
    ) -> Result<Vec<RoleAssignment>, AuthzError> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT * FROM role_assignments
            WHERE tenant = $1 AND workspace = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(tenant)
        .bind(workspace)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    // ==================== Permission requests ====================

    async fn create_permission_request(
        &self,
        request: &PermissionRequest,
    ) -> Result<(), AuthzError> {
        sqlx::query(
            r#"
            INSERT INTO permission_requests
                (id, tenant, workspace_id, applicant, subject_type, subject, resource_path,
                 role_id, start_time, end_time, reason, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(request.id)
        .bind(&request.tenant)
        .bind(&request.workspace_id)
        .bind(&request.applicant)
        .bind(request.subject_type.as_str())
        .bind(&request.subject)
        .bind(&request.resource_path)
        .bind(request.role_id)
        .bind(request.start_time)
        .bind(request.end_time)
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AuthzError::UnknownRole(request.role_id.to_string())
            } else {
                AuthzError::from(e)
            }
        })?;
        Ok(())
    }

    async fn get_permission_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<PermissionRequest>, AuthzError> {
        sqlx::query_as::<_, RequestRow>("SELECT * FROM permission_requests WHERE id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .map(PermissionRequest::try_from)
            .transpose()
    }

    async fn list_permission_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<PermissionRequest>, AuthzError> {
        let rows = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT * FROM permission_requests
            WHERE ($1::text IS NULL OR tenant = $1)
              AND ($2::text IS NULL OR workspace_id = $2)
              AND ($3::text IS NULL OR applicant = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(&filter.tenant)
        .bind(&filter.workspace)
        .bind(&filter.applicant)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn transition_permission_request(
        &self,
        request_id: Uuid,
        transition: &RequestTransition,
    ) -> Result<PermissionRequest, AuthzError> {
        let query = match transition {
            RequestTransition::Rejected { by, at, reason } => sqlx::query_as::<_, RequestRow>(
                r#"
                UPDATE permission_requests
                SET status = $2, rejected_by = $3, rejected_at = $4, reject_reason = $5
                WHERE id = $1 AND status = 'pending'
                RETURNING *
                "#,
            )
            .bind(request_id)
            .bind(transition.target_status().as_str())
            .bind(by)
            .bind(at)
            .bind(Some(reason)),
            RequestTransition::Cancelled { by, at, reason } => sqlx::query_as::<_, RequestRow>(
                r#"
                UPDATE permission_requests
                SET status = $2, cancelled_by = $3, cancelled_at = $4, cancel_reason = $5
                WHERE id = $1 AND status = 'pending'
                RETURNING *
                "#,
            )
            .bind(request_id)
            .bind(transition.target_status().as_str())
            .bind(by)
            .bind(at)
            .bind(reason.as_ref()),
        };

        match query.fetch_optional(&self.pool).await? {
            Some(row) => PermissionRequest::try_from(row),
            None => {
                let current = self
                    .get_permission_request(request_id)
                    .await?
                    .ok_or(AuthzError::UnknownRequest(request_id))?;
                Err(AuthzError::IllegalTransition {
                    id: request_id,
                    status: current.status.to_string(),
                })
            }
        }
    }

    async fn approve_permission_request(
        &self,
        request_id: Uuid,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        assignment: &RoleAssignment,
    ) -> Result<PermissionRequest, AuthzError> {
        let mut tx = self.pool.begin().await?;

        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM permission_requests WHERE id = $1 FOR UPDATE")
                .bind(request_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AuthzError::UnknownRequest(request_id))?;
        let status: RequestStatus = status.parse()?;
        if status != RequestStatus::Pending {
            return Err(AuthzError::IllegalTransition {
                id: request_id,
                status: status.to_string(),
            });
        }

        insert_role_assignment(&mut tx, assignment).await?;

        let row = sqlx::query_as::<_, RequestRow>(
            r#"
            UPDATE permission_requests
            SET status = $2, approved_by = $3, approved_at = $4, role_assignment_id = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(RequestStatus::Approved.as_str())
        .bind(approved_by)
        .bind(approved_at)
        .bind(assignment.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        PermissionRequest::try_from(row)
    }
}

#[async_trait]
impl NodeAdminLookup for PgStore {
    async fn get_node_admins(&self, resource_path: &str) -> Result<HashSet<String>, AuthzError> {
        let mut scopes = vec![resource_path.to_string()];
        scopes.extend(path::ancestors(resource_path)?);

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT username FROM service_tree_admins WHERE resource_path = ANY($1)",
        )
        .bind(&scopes)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(username,)| username).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_row_rejects_unknown_resource_type() {
        let now = Utc::now();
        let row = RoleRow {
            id: Uuid::new_v4(),
            name: "Viewer".to_string(),
            code: "viewer".to_string(),
            resource_type: "dashboard".to_string(),
            description: None,
            is_system: true,
            is_default: true,
            created_by: "system".to_string(),
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            Role::try_from(row),
            Err(AuthzError::InvalidResourceType(_))
        ));
    }

    #[test]
    fn test_request_row_decodes_status() {
        let now = Utc::now();
        let row = RequestRow {
            id: Uuid::new_v4(),
            tenant: "tenantA".to_string(),
            workspace_id: "shop".to_string(),
            applicant: "eve".to_string(),
            subject_type: "user".to_string(),
            subject: "eve".to_string(),
            resource_path: "/tenantA/shop/sales".to_string(),
            role_id: Uuid::new_v4(),
            start_time: now,
            end_time: None,
            reason: String::new(),
            status: "rejected".to_string(),
            created_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: Some("frank".to_string()),
            rejected_at: Some(now),
            reject_reason: Some("no".to_string()),
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            role_assignment_id: None,
        };
        let request = PermissionRequest::try_from(row).unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);
        assert!(request.status.is_terminal());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_update_role_persists_system_flag() {
        let config = crate::config::DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/rbac_test".to_string()),
            max_connections: 2,
            min_connections: 1,
            acquire_timeout_secs: 5,
        };
        let store = crate::db::connect_store(&config).await.unwrap();

        let mut role = Role::new(
            "Promoted".to_string(),
            format!("promoted-{}", Uuid::new_v4().simple()),
            ResourceType::Table,
            None,
            "test".to_string(),
        );
        store.create_role(&role, &[]).await.unwrap();

        role.is_system = true;
        store.update_role(&role, None).await.unwrap();

        let stored = store.get_role(role.id).await.unwrap().unwrap();
        assert!(stored.is_system);
    }
}
