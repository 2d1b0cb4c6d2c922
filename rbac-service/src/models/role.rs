//! Role model - process-global roles and their permission sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;
use validator::Validate;

use super::action::{ActionCode, ResourceType};

/// Role identity and flags. Permissions live in [`RolePermissionSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    /// Primary resource type; `(code, resource_type)` is unique.
    pub resource_type: ResourceType,
    pub description: Option<String>,
    pub is_system: bool,
    pub is_default: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Create a new role.
    pub fn new(
        name: String,
        code: String,
        resource_type: ResourceType,
        description: Option<String>,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            code,
            resource_type,
            description,
            is_system: false,
            is_default: false,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Lookup key `"<resource_type>:<code>"`.
    pub fn index_key(&self) -> String {
        role_index_key(self.resource_type, &self.code)
    }
}

pub fn role_index_key(resource_type: ResourceType, code: &str) -> String {
    format!("{}:{}", resource_type, code)
}

/// Role-to-action link row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub action_id: Uuid,
}

/// Actions a role grants, bucketed by resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionSet(BTreeMap<ResourceType, BTreeSet<ActionCode>>);

impl RolePermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: ActionCode) {
        self.0.entry(code.resource_type).or_default().insert(code);
    }

    pub fn bucket(&self, resource_type: ResourceType) -> Option<&BTreeSet<ActionCode>> {
        self.0.get(&resource_type)
    }

    pub fn contains(&self, code: &ActionCode) -> bool {
        self.bucket(code.resource_type)
            .is_some_and(|bucket| bucket.contains(code))
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &RolePermissionSet) {
        for (rt, codes) in &other.0 {
            self.0.entry(*rt).or_default().extend(codes.iter().copied());
        }
    }

    pub fn codes(&self) -> impl Iterator<Item = &ActionCode> {
        self.0.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|codes| codes.is_empty())
    }
}

impl FromIterator<ActionCode> for RolePermissionSet {
    fn from_iter<I: IntoIterator<Item = ActionCode>>(iter: I) -> Self {
        let mut set = RolePermissionSet::new();
        for code in iter {
            set.insert(code);
        }
        set
    }
}

/// Permission codes requested for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub resource_type: ResourceType,
    pub actions: Vec<String>,
}

/// Request to create a role. The first grant's resource type is the role's
/// primary resource type.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1))]
    pub permissions: Vec<PermissionGrant>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub created_by: String,
}

/// Request to update a role. `code` and primary resource type are fixed.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    pub is_default: Option<bool>,
    /// Replaces the whole permission set when present.
    pub permissions: Option<Vec<PermissionGrant>>,
}

/// Role with its materialized permissions.
#[derive(Debug, Clone, Serialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: RolePermissionSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::ActionType;

    #[test]
    fn test_permission_set_buckets_and_merge() {
        let mut a: RolePermissionSet = [
            ActionCode::new(ResourceType::Directory, ActionType::Read),
            ActionCode::new(ResourceType::Table, ActionType::Read),
        ]
        .into_iter()
        .collect();
        let b: RolePermissionSet = [ActionCode::new(ResourceType::Table, ActionType::Write)]
            .into_iter()
            .collect();
        a.merge(&b);

        assert_eq!(a.bucket(ResourceType::Table).map(|s| s.len()), Some(2));
        assert!(a.contains(&ActionCode::new(ResourceType::Directory, ActionType::Read)));
        assert!(a.bucket(ResourceType::Chart).is_none());
        assert_eq!(a.codes().count(), 3);
    }

    #[test]
    fn test_index_key() {
        let role = Role::new(
            "Viewer".to_string(),
            "viewer".to_string(),
            ResourceType::Form,
            None,
            "system".to_string(),
        );
        assert_eq!(role.index_key(), "form:viewer");
    }
}
