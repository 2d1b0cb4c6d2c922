use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid action code: {0}")]
    InvalidActionCode(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Invalid resource type: {0}")]
    InvalidResourceType(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown permission request: {0}")]
    UnknownRequest(Uuid),

    #[error("Role {code} already exists for resource type {resource_type}")]
    DuplicateRole { code: String, resource_type: String },

    #[error("System role {0} cannot be deleted")]
    SystemRoleImmutable(String),

    #[error("Role {0} still has assignments")]
    RoleInUse(String),

    #[error("Assignment {0} is not effective")]
    NotEffective(Uuid),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Illegal transition: request {id} is {status}")]
    IllegalTransition { id: Uuid, status: String },

    #[error("End time must be after start time")]
    InvalidWindow,

    #[error("Role cache is stale: {0}")]
    CacheStale(Uuid),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AuthzError {
    fn from(err: sqlx::Error) -> Self {
        AuthzError::Storage(anyhow::Error::new(err))
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        let message = err.to_string();
        match err {
            AuthzError::InvalidPath(_)
            | AuthzError::InvalidActionCode(_)
            | AuthzError::InvalidResourceType(_)
            | AuthzError::InvalidSubject(_)
            | AuthzError::InvalidWindow
            | AuthzError::NotEffective(_) => AppError::BadRequest(anyhow::anyhow!(message)),
            AuthzError::Validation(e) => AppError::ValidationError(e),
            AuthzError::UnknownAction(_)
            | AuthzError::UnknownRole(_)
            | AuthzError::UnknownRequest(_) => AppError::NotFound(anyhow::anyhow!(message)),
            AuthzError::DuplicateRole { .. }
            | AuthzError::RoleInUse(_)
            | AuthzError::IllegalTransition { .. } => AppError::Conflict(anyhow::anyhow!(message)),
            AuthzError::SystemRoleImmutable(_) | AuthzError::NotAuthorized(_) => {
                AppError::Forbidden(anyhow::anyhow!(message))
            }
            AuthzError::CacheStale(_) => AppError::ServiceUnavailable,
            AuthzError::Storage(e) => AppError::DatabaseError(e),
        }
    }
}
