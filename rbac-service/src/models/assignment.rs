//! Role assignment model - time-bounded subject→role grants at a resource path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::action::ResourceType;
use crate::services::AuthzError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Department,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::User => "user",
            SubjectType::Department => "department",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectType::User),
            "department" => Ok(SubjectType::Department),
            _ => Err(AuthzError::Storage(anyhow::anyhow!(
                "Unknown subject type: {}",
                s
            ))),
        }
    }
}

/// A user (by username) or a department (by `/org/...` path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub subject_type: SubjectType,
    pub subject: String,
}

impl Subject {
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            subject_type: SubjectType::User,
            subject: username.into(),
        }
    }

    pub fn department(path: impl Into<String>) -> Self {
        Self {
            subject_type: SubjectType::Department,
            subject: path.into(),
        }
    }
}

/// Role assignment entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: Uuid,
    pub tenant: String,
    pub workspace: String,
    pub subject_type: SubjectType,
    pub subject: String,
    pub role_id: Uuid,
    pub resource_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl RoleAssignment {
    /// Effective at `t` iff `start_time <= t` and `t` is before any end time.
    pub fn is_effective_at(&self, t: DateTime<Utc>) -> bool {
        self.start_time <= t && self.end_time.is_none_or(|end| t < end)
    }

    pub fn matches_subject(&self, subject: &Subject) -> bool {
        self.subject_type == subject.subject_type && self.subject == subject.subject
    }
}

/// Where and for how long a role is granted.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleGrant {
    pub tenant: String,
    pub workspace: String,
    pub resource_path: String,
    /// Defaults to the current time.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// Request to assign a role, addressed by `(resource_type, code)`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignRoleRequest {
    pub subject: Subject,
    pub role_code: String,
    pub resource_type: ResourceType,
    #[serde(flatten)]
    pub grant: RoleGrant,
}
