//! Permission request workflow.
//!
//! ```text
//! pending --approve--> approved
//! pending --reject---> rejected
//! pending --cancel---> cancelled
//! ```
//!
//! Terminal states never change. Approval inserts the matching role
//! assignment in the same store transaction as the status change.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::clock::Clock;
use super::metrics;
use super::role_cache::RoleCache;
use super::role_service::RoleService;
use super::store::{AuthzStore, NodeAdminLookup, StorageDeadline};
use super::AuthzError;
use crate::models::{
    CreatePermissionRequest, PermissionRequest, RequestFilter, RequestStatus, RequestTransition,
    Role, RoleGrant,
};

/// A freshly opened request and the users who may decide it.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedRequest {
    pub request: PermissionRequest,
    pub approvers: BTreeSet<String>,
}

pub struct ApprovalService {
    store: Arc<dyn AuthzStore>,
    admins: Arc<dyn NodeAdminLookup>,
    roles: Arc<RoleService>,
    cache: Arc<RoleCache>,
    clock: Arc<dyn Clock>,
    deadline: StorageDeadline,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        admins: Arc<dyn NodeAdminLookup>,
        roles: Arc<RoleService>,
        cache: Arc<RoleCache>,
        clock: Arc<dyn Clock>,
        deadline: StorageDeadline,
    ) -> Self {
        Self {
            store,
            admins,
            roles,
            cache,
            clock,
            deadline,
        }
    }

    async fn node_admins(&self, resource_path: &str) -> Result<HashSet<String>, AuthzError> {
        self.deadline
            .run("get_node_admins", self.admins.get_node_admins(resource_path))
            .await
    }

    async fn require_admin(&self, resource_path: &str, username: &str) -> Result<(), AuthzError> {
        if self.node_admins(resource_path).await?.contains(username) {
            Ok(())
        } else {
            Err(AuthzError::NotAuthorized(format!(
                "{} is not an administrator of {}",
                username, resource_path
            )))
        }
    }

    async fn resolve_role(&self, role_id: Uuid) -> Result<Role, AuthzError> {
        if let Some(role) = self.cache.get_role(role_id).await {
            return Ok(role);
        }
        self.deadline
            .run("get_role", self.store.get_role(role_id))
            .await?
            .ok_or_else(|| AuthzError::UnknownRole(role_id.to_string()))
    }

    async fn load_pending(&self, request_id: Uuid) -> Result<PermissionRequest, AuthzError> {
        let request = self.get_request(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(AuthzError::IllegalTransition {
                id: request_id,
                status: request.status.to_string(),
            });
        }
        Ok(request)
    }

    #[tracing::instrument(
        skip(self, input),
        fields(applicant = %input.applicant, resource_path = %input.resource_path)
    )]
    pub async fn create_request(
        &self,
        input: CreatePermissionRequest,
    ) -> Result<OpenedRequest, AuthzError> {
        input.validate()?;
        let role = self.resolve_role(input.role_id).await?;

        // Same checks an assignment would get, so approval cannot fail on them.
        let draft = self.roles.prepare_assignment(
            input.subject.clone(),
            role.id,
            &RoleGrant {
                tenant: input.tenant.clone(),
                workspace: input.workspace.clone(),
                resource_path: input.resource_path.clone(),
                start_time: input.start_time,
                end_time: input.end_time,
                created_by: input.applicant.clone(),
            },
        )?;

        let request = PermissionRequest {
            id: Uuid::new_v4(),
            tenant: input.tenant,
            workspace_id: input.workspace,
            applicant: input.applicant,
            subject_type: draft.subject_type,
            subject: draft.subject,
            resource_path: draft.resource_path,
            role_id: role.id,
            start_time: draft.start_time,
            end_time: draft.end_time,
            reason: input.reason,
            status: RequestStatus::Pending,
            created_at: self.clock.now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            reject_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            role_assignment_id: None,
        };

        self.deadline
            .run(
                "create_permission_request",
                self.store.create_permission_request(&request),
            )
            .await?;
        metrics::record_request_transition("created");

        let approvers: BTreeSet<String> = self
            .node_admins(&request.resource_path)
            .await?
            .into_iter()
            .collect();
        if approvers.is_empty() {
            tracing::warn!(
                request_id = %request.id,
                "Permission request has no approvers; operator action required"
            );
        } else {
            tracing::info!(
                request_id = %request.id,
                role = %role.index_key(),
                approvers = approvers.len(),
                "Permission request created"
            );
        }

        Ok(OpenedRequest { request, approvers })
    }

    #[tracing::instrument(skip(self))]
    pub async fn approve(
        &self,
        request_id: Uuid,
        approver: &str,
    ) -> Result<PermissionRequest, AuthzError> {
        let request = self.load_pending(request_id).await?;
        self.require_admin(&request.resource_path, approver).await?;
        let role = self.resolve_role(request.role_id).await?;

        let assignment = self.roles.prepare_assignment(
            request.requested_subject(),
            role.id,
            &RoleGrant {
                tenant: request.tenant.clone(),
                workspace: request.workspace_id.clone(),
                resource_path: request.resource_path.clone(),
                start_time: Some(request.start_time),
                end_time: request.end_time,
                created_by: approver.to_string(),
            },
        )?;

        let approved = self
            .deadline
            .run(
                "approve_permission_request",
                self.store.approve_permission_request(
                    request_id,
                    approver,
                    self.clock.now(),
                    &assignment,
                ),
            )
            .await?;
        metrics::record_request_transition("approved");
        tracing::info!(
            request_id = %request_id,
            assignment_id = %assignment.id,
            role = %role.index_key(),
            "Permission request approved"
        );
        Ok(approved)
    }

    #[tracing::instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        request_id: Uuid,
        approver: &str,
        reason: &str,
    ) -> Result<PermissionRequest, AuthzError> {
        let request = self.load_pending(request_id).await?;
        self.require_admin(&request.resource_path, approver).await?;

        let transition = RequestTransition::Rejected {
            by: approver.to_string(),
            at: self.clock.now(),
            reason: reason.to_string(),
        };
        let rejected = self
            .deadline
            .run(
                "transition_permission_request",
                self.store.transition_permission_request(request_id, &transition),
            )
            .await?;
        metrics::record_request_transition("rejected");
        tracing::info!(request_id = %request_id, "Permission request rejected");
        Ok(rejected)
    }

    /// Withdraw a pending request. Only the applicant may cancel.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        request_id: Uuid,
        applicant: &str,
        reason: Option<&str>,
    ) -> Result<PermissionRequest, AuthzError> {
        let request = self.load_pending(request_id).await?;
        if request.applicant != applicant {
            return Err(AuthzError::NotAuthorized(format!(
                "only {} may cancel request {}",
                request.applicant, request_id
            )));
        }

        let transition = RequestTransition::Cancelled {
            by: applicant.to_string(),
            at: self.clock.now(),
            reason: reason.map(str::to_string),
        };
        let cancelled = self
            .deadline
            .run(
                "transition_permission_request",
                self.store.transition_permission_request(request_id, &transition),
            )
            .await?;
        metrics::record_request_transition("cancelled");
        tracing::info!(request_id = %request_id, "Permission request cancelled");
        Ok(cancelled)
    }

    pub async fn get_request(&self, request_id: Uuid) -> Result<PermissionRequest, AuthzError> {
        self.deadline
            .run(
                "get_permission_request",
                self.store.get_permission_request(request_id),
            )
            .await?
            .ok_or(AuthzError::UnknownRequest(request_id))
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<PermissionRequest>, AuthzError> {
        self.deadline
            .run(
                "list_permission_requests",
                self.store.list_permission_requests(filter),
            )
            .await
    }

    /// Pending requests in a workspace that `approver` may decide.
    pub async fn pending_for_approver(
        &self,
        tenant: &str,
        workspace: &str,
        approver: &str,
    ) -> Result<Vec<PermissionRequest>, AuthzError> {
        let pending = self
            .list_requests(&RequestFilter {
                tenant: Some(tenant.to_string()),
                workspace: Some(workspace.to_string()),
                applicant: None,
                status: Some(RequestStatus::Pending),
            })
            .await?;

        let mut decided: HashMap<String, bool> = HashMap::new();
        let mut visible = Vec::new();
        for request in pending {
            let allowed = match decided.get(&request.resource_path) {
                Some(allowed) => *allowed,
                None => {
                    let allowed = self
                        .node_admins(&request.resource_path)
                        .await?
                        .contains(approver);
                    decided.insert(request.resource_path.clone(), allowed);
                    allowed
                }
            };
            if allowed {
                visible.push(request);
            }
        }
        Ok(visible)
    }
}
