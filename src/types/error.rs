//! Error types for Flare
//!
//! Every failure is terminal for the attempted operation. Nothing in the
//! core retries on its own; `is_retryable` only tells the caller which
//! failures are worth offering a retry for.

use crate::flare::{FlareStatus, Transition};

/// Main error type for flare operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlareError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Victim {victim_id} already has an unresolved flare ({existing})")]
    DuplicateActiveFlare { victim_id: String, existing: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: cannot {transition} a flare that is {from}")]
    InvalidTransition {
        transition: Transition,
        from: FlareStatus,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed flare document {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlareError {
    /// Stable machine-readable code for the UI shell
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateActiveFlare { .. } => "duplicate_active_flare",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Malformed { .. } => "malformed",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether a caller-driven retry of the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for FlareError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

/// Result type alias for flare operations
pub type Result<T> = std::result::Result<T, FlareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_outage_is_retryable() {
        assert!(FlareError::StoreUnavailable("offline".into()).is_retryable());
        assert!(!FlareError::NotFound("flare x".into()).is_retryable());
        assert!(!FlareError::DuplicateActiveFlare {
            victim_id: "v".into(),
            existing: "f".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = FlareError::InvalidTransition {
            transition: Transition::Resolve,
            from: FlareStatus::Active,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition: cannot resolve a flare that is Active"
        );
        assert_eq!(err.code(), "invalid_transition");
    }
}
