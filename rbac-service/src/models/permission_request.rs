//! Permission request model - the approval workflow's unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::assignment::{Subject, SubjectType};
use crate::services::AuthzError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            _ => Err(AuthzError::Storage(anyhow::anyhow!(
                "Unknown request status: {}",
                s
            ))),
        }
    }
}

/// Permission request entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: Uuid,
    pub tenant: String,
    pub workspace_id: String,
    pub applicant: String,
    pub subject_type: SubjectType,
    pub subject: String,
    pub resource_path: String,
    pub role_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub reason: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub reject_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub role_assignment_id: Option<Uuid>,
}

impl PermissionRequest {
    pub fn requested_subject(&self) -> Subject {
        Subject {
            subject_type: self.subject_type,
            subject: self.subject.clone(),
        }
    }
}

/// Terminal transition applied to a pending request.
#[derive(Debug, Clone)]
pub enum RequestTransition {
    Rejected {
        by: String,
        at: DateTime<Utc>,
        reason: String,
    },
    Cancelled {
        by: String,
        at: DateTime<Utc>,
        reason: Option<String>,
    },
}

impl RequestTransition {
    pub fn target_status(&self) -> RequestStatus {
        match self {
            RequestTransition::Rejected { .. } => RequestStatus::Rejected,
            RequestTransition::Cancelled { .. } => RequestStatus::Cancelled,
        }
    }

    /// Stamp the transition's actor fields onto `request`.
    pub fn apply(&self, request: &mut PermissionRequest) {
        request.status = self.target_status();
        match self {
            RequestTransition::Rejected { by, at, reason } => {
                request.rejected_by = Some(by.clone());
                request.rejected_at = Some(*at);
                request.reject_reason = Some(reason.clone());
            }
            RequestTransition::Cancelled { by, at, reason } => {
                request.cancelled_by = Some(by.clone());
                request.cancelled_at = Some(*at);
                request.cancel_reason = reason.clone();
            }
        }
    }
}

/// Request to open a permission request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    pub tenant: String,
    pub workspace: String,
    #[validate(length(min = 1))]
    pub applicant: String,
    pub subject: Subject,
    pub resource_path: String,
    pub role_id: Uuid,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[validate(length(max = 2048))]
    pub reason: String,
}

/// Filter for listing requests; unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestFilter {
    pub tenant: Option<String>,
    pub workspace: Option<String>,
    pub applicant: Option<String>,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    pub fn matches(&self, request: &PermissionRequest) -> bool {
        self.tenant.as_ref().is_none_or(|t| *t == request.tenant)
            && self
                .workspace
                .as_ref()
                .is_none_or(|w| *w == request.workspace_id)
            && self
                .applicant
                .as_ref()
                .is_none_or(|a| *a == request.applicant)
            && self.status.is_none_or(|s| s == request.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "cancelled".parse::<RequestStatus>().unwrap(),
            RequestStatus::Cancelled
        );
        assert!("done".parse::<RequestStatus>().is_err());
    }
}
