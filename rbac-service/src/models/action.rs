//! Action model - the global catalog of permission points.
//!
//! A permission point pairs a resource type with an action type and is
//! written `"<resource_type>:<action_type>"`, e.g. `form:read`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::services::AuthzError;

/// Kind of resource a permission point applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Directory,
    Table,
    Form,
    Chart,
    App,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Directory,
        ResourceType::Table,
        ResourceType::Form,
        ResourceType::Chart,
        ResourceType::App,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Directory => "directory",
            ResourceType::Table => "table",
            ResourceType::Form => "form",
            ResourceType::Chart => "chart",
            ResourceType::App => "app",
        }
    }

    /// Action types that are meaningful on this resource type.
    pub fn valid_actions(&self) -> &'static [ActionType] {
        match self {
            ResourceType::Directory | ResourceType::Table | ResourceType::App => &ActionType::ALL,
            ResourceType::Form => &[ActionType::Read, ActionType::Write, ActionType::Admin],
            ResourceType::Chart => &[ActionType::Read, ActionType::Admin],
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(ResourceType::Directory),
            "table" => Ok(ResourceType::Table),
            "form" => Ok(ResourceType::Form),
            "chart" => Ok(ResourceType::Chart),
            "app" => Ok(ResourceType::App),
            _ => Err(AuthzError::InvalidResourceType(s.to_string())),
        }
    }
}

/// Operation a permission point allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Read,
    Write,
    Update,
    Delete,
    Admin,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::Read,
        ActionType::Write,
        ActionType::Update,
        ActionType::Delete,
        ActionType::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Read => "read",
            ActionType::Write => "write",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Admin => "admin",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(ActionType::Read),
            "write" => Ok(ActionType::Write),
            "update" => Ok(ActionType::Update),
            "delete" => Ok(ActionType::Delete),
            "admin" => Ok(ActionType::Admin),
            _ => Err(AuthzError::InvalidActionCode(s.to_string())),
        }
    }
}

/// A `(resource_type, action_type)` permission point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionCode {
    pub resource_type: ResourceType,
    pub action_type: ActionType,
}

impl ActionCode {
    pub const fn new(resource_type: ResourceType, action_type: ActionType) -> Self {
        Self {
            resource_type,
            action_type,
        }
    }

    /// Whether the action type is part of the resource type's matrix.
    pub fn is_valid(&self) -> bool {
        self.resource_type
            .valid_actions()
            .contains(&self.action_type)
    }

    pub fn is_admin(&self) -> bool {
        self.action_type == ActionType::Admin
    }

    /// Same action type re-targeted at another resource type.
    pub fn translate(&self, resource_type: ResourceType) -> ActionCode {
        ActionCode::new(resource_type, self.action_type)
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.action_type)
    }
}

impl FromStr for ActionCode {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource_type, action_type) = parse_code(s)?;
        Ok(ActionCode::new(resource_type, action_type))
    }
}

impl TryFrom<String> for ActionCode {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionCode> for String {
    fn from(code: ActionCode) -> Self {
        code.to_string()
    }
}

/// Wire form of a permission point.
pub fn build_code(resource_type: ResourceType, action_type: ActionType) -> String {
    format!("{}:{}", resource_type, action_type)
}

/// Parse `"<resource_type>:<action_type>"`.
pub fn parse_code(code: &str) -> Result<(ResourceType, ActionType), AuthzError> {
    let (rt, at) = code
        .split_once(':')
        .ok_or_else(|| AuthzError::InvalidActionCode(code.to_string()))?;
    if at.contains(':') {
        return Err(AuthzError::InvalidActionCode(code.to_string()));
    }
    let resource_type: ResourceType = rt.parse()?;
    let action_type: ActionType = at
        .parse()
        .map_err(|_| AuthzError::InvalidActionCode(code.to_string()))?;
    Ok((resource_type, action_type))
}

/// Every valid permission point for a resource type.
pub fn actions_for(resource_type: ResourceType) -> BTreeSet<ActionCode> {
    resource_type
        .valid_actions()
        .iter()
        .map(|at| ActionCode::new(resource_type, *at))
        .collect()
}

/// The full canonical catalog, in matrix order.
pub fn canonical_codes() -> Vec<ActionCode> {
    ResourceType::ALL
        .iter()
        .flat_map(|rt| actions_for(*rt))
        .collect()
}

/// Persisted action row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub code: String,
    pub resource_type: ResourceType,
    pub action_type: ActionType,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Action {
    /// Create a system action for a canonical permission point.
    pub fn system(code: ActionCode) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            resource_type: code.resource_type,
            action_type: code.action_type,
            is_system: true,
            created_at: Utc::now(),
        }
    }

    pub fn action_code(&self) -> ActionCode {
        ActionCode::new(self.resource_type, self.action_type)
    }
}
