use std::fmt::Display;

use thiserror::Error;
use uuid::Uuid;

use crate::ports::RepositoryError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot {action} {entity} in status {status}")]
    InvalidTransition {
        entity: &'static str,
        status: String,
        action: &'static str,
    },

    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("dispute {0} is closed to new evidence")]
    DisputeClosed(Uuid),

    #[error("persistence failure: {0}")]
    Persistence(RepositoryError),
}

pub type EscrowResult<T> = Result<T, EscrowError>;

impl EscrowError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        EscrowError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        status: impl Display,
        action: &'static str,
    ) -> Self {
        EscrowError::InvalidTransition {
            entity,
            status: status.to_string(),
            action,
        }
    }

    /// Short message safe to show an end user. Never carries identifiers or
    /// storage details.
    pub fn user_message(&self) -> String {
        match self {
            EscrowError::NotFound { entity, .. } => format!("{} not found.", entity),
            EscrowError::InvalidTransition { .. } => {
                "This action is not allowed in the current state.".to_string()
            }
            EscrowError::ValidationFailed(e) => e.to_string(),
            EscrowError::Conflict(_) => {
                "This record was already changed by someone else. Refresh and try again."
                    .to_string()
            }
            EscrowError::DisputeClosed(_) => "This dispute is closed to new evidence.".to_string(),
            EscrowError::Persistence(_) => "A database error occurred.".to_string(),
        }
    }

    /// Whether the caller may repeat the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EscrowError::Persistence(_))
    }
}

impl From<RepositoryError> for EscrowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => EscrowError::NotFound {
                entity: "Record",
                id: what,
            },
            RepositoryError::Conflict(detail) => EscrowError::Conflict(detail),
            other => EscrowError::Persistence(other),
        }
    }
}
