use serde_json::json;
use thiserror::Error;

use crate::model::Role;
use crate::policy::Operation;

/// Typed failure returned by every core operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("role {role} may not {operation}")]
    Permission { role: Role, operation: Operation },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        CoreError::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "validation_error",
            CoreError::Permission { .. } => "permission_denied",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::Precondition(_) => "precondition_failed",
            CoreError::Db(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::Validation { details, .. } => details.clone(),
            CoreError::Permission { role, operation } => Some(json!({
                "role": role.as_str(),
                "operation": operation.as_str(),
            })),
            CoreError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            CoreError::Conflict(reason) => Some(json!({ "reason": reason })),
            CoreError::Precondition(which) => Some(json!({ "precondition": which })),
            CoreError::Db(_) => None,
        }
    }

    /// Reason string for conflict errors, used by callers that branch on it.
    pub fn conflict_reason(&self) -> Option<&'static str> {
        match self {
            CoreError::Conflict(reason) => Some(reason),
            _ => None,
        }
    }
}

/// True when the error is SQLite rejecting a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(inner, _) => {
            inner.code == rusqlite::ErrorCode::ConstraintViolation
                && (inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}
