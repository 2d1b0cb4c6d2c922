//! Effective-permission calculator.
//!
//! For a user in a workspace, materializes the granted/denied state of every
//! required action on every node of a service tree. All I/O happens in one
//! batched assignment fetch; the walk itself is CPU-only over a single role
//! cache snapshot and a single `now`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::clock::Clock;
use super::metrics;
use super::role_cache::{RoleCache, RoleSnapshot};
use super::store::{AuthzStore, StorageDeadline};
use super::AuthzError;
use crate::models::service_tree::actions_required_for;
use crate::models::{
    ActionCode, ActionType, ResourceType, RoleAssignment, RolePermissionSet, ServiceTreeNode,
    Subject,
};
use crate::utils::path;

/// Who is asking, and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionQuery {
    pub tenant: String,
    pub workspace: String,
    pub username: String,
    /// Department the user belongs to, e.g. `/org/eng/payments`.
    pub department_path: Option<String>,
}

impl PermissionQuery {
    pub fn new(
        tenant: impl Into<String>,
        workspace: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            workspace: workspace.into(),
            username: username.into(),
            department_path: None,
        }
    }

    pub fn with_department(mut self, department_path: impl Into<String>) -> Self {
        self.department_path = Some(department_path.into());
        self
    }

    /// The user followed by each department in its chain.
    fn subjects(&self) -> Result<Vec<Subject>, AuthzError> {
        let mut subjects = vec![Subject::user(self.username.clone())];
        if let Some(department) = &self.department_path {
            subjects.extend(path::department_chain(department)?.into_iter().map(Subject::department));
        }
        Ok(subjects)
    }
}

/// `full_code_path -> action -> granted`.
pub type PermissionMap = HashMap<String, BTreeMap<ActionCode, bool>>;

/// Union of role permissions per assignment path.
type Grants = HashMap<String, RolePermissionSet>;

struct Walk<'a> {
    grants: &'a Grants,
    app_admin: bool,
    out: PermissionMap,
}

impl Walk<'_> {
    fn visit(
        &mut self,
        node: &ServiceTreeNode,
        inherited: &BTreeSet<ActionCode>,
    ) -> Result<(), AuthzError> {
        let required = actions_required_for(node.node_kind, node.template_type);
        let resource_type = match node.resource_type() {
            Some(rt) if !required.is_empty() => rt,
            _ => {
                for child in &node.children {
                    self.visit(child, inherited)?;
                }
                return Ok(());
            }
        };

        let granted = self.evaluate(node, resource_type, &required, inherited)?;

        let entry = required
            .iter()
            .map(|code| (*code, granted.contains(code)))
            .collect();
        self.out.insert(node.full_code_path.clone(), entry);

        let child_inherited: BTreeSet<ActionCode> = inherited.union(&granted).copied().collect();
        for child in &node.children {
            self.visit(child, &child_inherited)?;
        }
        Ok(())
    }

    fn evaluate(
        &self,
        node: &ServiceTreeNode,
        resource_type: ResourceType,
        required: &BTreeSet<ActionCode>,
        inherited: &BTreeSet<ActionCode>,
    ) -> Result<BTreeSet<ActionCode>, AuthzError> {
        if self.app_admin {
            return Ok(required.clone());
        }

        let mut granted = BTreeSet::new();
        let scopes = std::iter::once(node.full_code_path.clone())
            .chain(path::ancestors(&node.full_code_path)?);

        for scope in scopes {
            let Some(permissions) = self.grants.get(&scope) else {
                continue;
            };

            if let Some(bucket) = permissions.bucket(resource_type) {
                for code in bucket {
                    if code.is_admin() {
                        return Ok(required.clone());
                    }
                    if required.contains(code) {
                        granted.insert(*code);
                    }
                }
            }

            if resource_type != ResourceType::Directory {
                if let Some(directory) = permissions.bucket(ResourceType::Directory) {
                    for code in directory {
                        if code.is_admin() {
                            return Ok(required.clone());
                        }
                        let translated = code.translate(resource_type);
                        if required.contains(&translated) {
                            granted.insert(translated);
                        }
                    }
                }
            }
        }

        granted.extend(inherited.intersection(required).copied());
        Ok(granted)
    }
}

pub struct PermissionCalculator {
    store: Arc<dyn AuthzStore>,
    cache: Arc<RoleCache>,
    clock: Arc<dyn Clock>,
    deadline: StorageDeadline,
}

impl PermissionCalculator {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        cache: Arc<RoleCache>,
        clock: Arc<dyn Clock>,
        deadline: StorageDeadline,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            deadline,
        }
    }

    async fn fetch_assignments(
        &self,
        query: &PermissionQuery,
        at: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, AuthzError> {
        path::split(&path::app_path(&query.tenant, &query.workspace))?;
        let subjects = query.subjects()?;
        let assignments = self
            .deadline
            .run(
                "get_assignments_by_subjects",
                self.store.get_assignments_by_subjects(
                    &query.tenant,
                    &query.workspace,
                    &subjects,
                    at,
                ),
            )
            .await?;
        Ok(assignments
            .into_iter()
            .filter(|a| {
                a.tenant == query.tenant && a.workspace == query.workspace && a.is_effective_at(at)
            })
            .collect())
    }

    fn build_grants(
        snapshot: &RoleSnapshot,
        assignments: &[RoleAssignment],
    ) -> Result<Grants, AuthzError> {
        let mut grants = Grants::new();
        for assignment in assignments {
            let permissions = snapshot
                .permissions(assignment.role_id)
                .ok_or(AuthzError::CacheStale(assignment.role_id))?;
            grants
                .entry(assignment.resource_path.clone())
                .or_default()
                .merge(permissions);
        }
        Ok(grants)
    }

    /// Expand assignments through the cache, reloading it once if an
    /// assignment references a role the snapshot does not know.
    async fn grants_for(&self, assignments: &[RoleAssignment]) -> Result<Grants, AuthzError> {
        let snapshot = self.cache.snapshot().await;
        match Self::build_grants(&snapshot, assignments) {
            Err(AuthzError::CacheStale(role_id)) => {
                tracing::warn!(role_id = %role_id, "Assignment references uncached role, reloading");
                if let Err(e) = self.cache.refresh().await {
                    tracing::error!(error = %e, "Role cache reload failed");
                }
                let snapshot = self.cache.snapshot().await;
                Self::build_grants(&snapshot, assignments).map_err(|e| match e {
                    AuthzError::CacheStale(id) => AuthzError::UnknownRole(id.to_string()),
                    other => other,
                })
            }
            other => other,
        }
    }

    async fn evaluate(
        &self,
        query: &PermissionQuery,
        roots: &[ServiceTreeNode],
    ) -> Result<PermissionMap, AuthzError> {
        let at = self.clock.now();
        let assignments = self.fetch_assignments(query, at).await?;
        let grants = self.grants_for(&assignments).await?;

        let app_admin = grants
            .get(&path::app_path(&query.tenant, &query.workspace))
            .is_some_and(|p| p.contains(&ActionCode::new(ResourceType::App, ActionType::Admin)));

        let mut walk = Walk {
            grants: &grants,
            app_admin,
            out: PermissionMap::new(),
        };
        let root_inherited = BTreeSet::new();
        for root in roots {
            walk.visit(root, &root_inherited)?;
        }

        tracing::debug!(
            username = %query.username,
            assignments = assignments.len(),
            nodes = walk.out.len(),
            "Permission map computed"
        );
        Ok(walk.out)
    }

    /// Effective actions on every node of `roots` that has a resource type.
    #[tracing::instrument(
        skip(self, query, roots),
        fields(tenant = %query.tenant, workspace = %query.workspace, username = %query.username)
    )]
    pub async fn compute(
        &self,
        query: &PermissionQuery,
        roots: &[ServiceTreeNode],
    ) -> Result<PermissionMap, AuthzError> {
        let started = Instant::now();
        let result = self.evaluate(query, roots).await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::record_evaluation(outcome, started.elapsed());
        result
    }

    /// Whether `action` is granted on a single node. Actions outside the
    /// node's required set are never granted.
    pub async fn check(
        &self,
        query: &PermissionQuery,
        node: &ServiceTreeNode,
        action: ActionCode,
    ) -> Result<bool, AuthzError> {
        let leaf = ServiceTreeNode {
            children: Vec::new(),
            ..node.clone()
        };
        let map = self.compute(query, std::slice::from_ref(&leaf)).await?;
        Ok(map
            .get(&leaf.full_code_path)
            .and_then(|actions| actions.get(&action))
            .copied()
            .unwrap_or(false))
    }

    /// Assignments currently effective for the query's subjects.
    pub async fn effective_assignments(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<RoleAssignment>, AuthzError> {
        self.fetch_assignments(query, self.clock.now()).await
    }

    /// Load one assignment, failing with `NotEffective` when it is absent or
    /// outside its time window.
    pub async fn effective_assignment(&self, assignment_id: Uuid) -> Result<RoleAssignment, AuthzError> {
        let assignment = self
            .deadline
            .run(
                "get_role_assignment",
                self.store.get_role_assignment(assignment_id),
            )
            .await?
            .ok_or(AuthzError::NotEffective(assignment_id))?;
        if !assignment.is_effective_at(self.clock.now()) {
            return Err(AuthzError::NotEffective(assignment_id));
        }
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TemplateType;

    fn code(rt: ResourceType, at: ActionType) -> ActionCode {
        ActionCode::new(rt, at)
    }

    fn walk(grants: &Grants, app_admin: bool, roots: &[ServiceTreeNode]) -> PermissionMap {
        let mut walk = Walk {
            grants,
            app_admin,
            out: PermissionMap::new(),
        };
        for root in roots {
            walk.visit(root, &BTreeSet::new()).unwrap();
        }
        walk.out
    }

    fn grants(entries: Vec<(&str, Vec<ActionCode>)>) -> Grants {
        entries
            .into_iter()
            .map(|(p, codes)| (p.to_string(), codes.into_iter().collect()))
            .collect()
    }

    #[test]
    fn test_exact_match_uses_node_type_bucket_only() {
        let g = grants(vec![(
            "/t/w/a/f",
            vec![
                code(ResourceType::Form, ActionType::Read),
                code(ResourceType::Table, ActionType::Write),
            ],
        )]);
        let out = walk(&g, false, &[ServiceTreeNode::function("/t/w/a/f", TemplateType::Form)]);
        let f = &out["/t/w/a/f"];
        assert_eq!(f.len(), 3);
        assert!(f[&code(ResourceType::Form, ActionType::Read)]);
        assert!(!f[&code(ResourceType::Form, ActionType::Write)]);
    }

    #[test]
    fn test_directory_grant_translates_to_function_type() {
        let g = grants(vec![("/t/w", vec![code(ResourceType::Directory, ActionType::Update)])]);
        let tree = ServiceTreeNode::package(
            "/t/w/x",
            vec![
                ServiceTreeNode::function("/t/w/x/t1", TemplateType::Table),
                ServiceTreeNode::function("/t/w/x/f1", TemplateType::Form),
            ],
        );
        let out = walk(&g, false, &[tree]);
        assert!(out["/t/w/x"][&code(ResourceType::Directory, ActionType::Update)]);
        assert!(out["/t/w/x/t1"][&code(ResourceType::Table, ActionType::Update)]);
        // Form has no update action, so nothing is granted there.
        assert!(out["/t/w/x/f1"].values().all(|v| !v));
    }

    #[test]
    fn test_same_type_admin_grants_everything_below() {
        let g = grants(vec![("/t/w/a", vec![code(ResourceType::Table, ActionType::Admin)])]);
        let tree = ServiceTreeNode::package(
            "/t/w/a",
            vec![ServiceTreeNode::package(
                "/t/w/a/b",
                vec![ServiceTreeNode::function("/t/w/a/b/t", TemplateType::Table)],
            )],
        );
        let out = walk(&g, false, &[tree]);
        assert!(out["/t/w/a/b/t"].values().all(|v| *v));
        assert!(out["/t/w/a"].values().all(|v| !v));
    }

    #[test]
    fn test_app_admin_shortcut() {
        let out = walk(
            &Grants::new(),
            true,
            &[ServiceTreeNode::function("/t/w/c", TemplateType::Chart)],
        );
        assert_eq!(out["/t/w/c"].len(), 2);
        assert!(out["/t/w/c"].values().all(|v| *v));
    }

    #[test]
    fn test_untyped_function_is_skipped_but_children_visited() {
        let untyped = ServiceTreeNode {
            full_code_path: "/t/w/u".to_string(),
            node_kind: crate::models::NodeKind::Function,
            template_type: None,
            children: vec![ServiceTreeNode::function("/t/w/u/f", TemplateType::Form)],
        };
        let out = walk(&Grants::new(), false, &[untyped]);
        assert!(!out.contains_key("/t/w/u"));
        assert!(out.contains_key("/t/w/u/f"));
    }

    #[test]
    fn test_grant_on_sibling_path_does_not_leak() {
        let g = grants(vec![("/t/w/ab", vec![code(ResourceType::Table, ActionType::Read)])]);
        let out = walk(&g, false, &[ServiceTreeNode::function("/t/w/a/t", TemplateType::Table)]);
        assert!(out["/t/w/a/t"].values().all(|v| !v));
    }

    #[test]
    fn test_query_subjects_include_department_chain() {
        let query = PermissionQuery::new("t", "w", "dan").with_department("/org/eng/payments");
        let subjects = query.subjects().unwrap();
        assert_eq!(
            subjects,
            vec![
                Subject::user("dan"),
                Subject::department("/org/eng/payments"),
                Subject::department("/org/eng"),
            ]
        );
    }
}
