//! Error taxonomy for the admission engine.
//!
//! Every error here is a programmer error at the call site. Capacity
//! rejection is a `false` return from admission, never an `Err`.
//!
//! - `UserError`   — bad input or misuse of the group API (4xx equivalent)
//! - `InternalBug` — should never happen; triggers alert + diagnostic dump

use thiserror::Error;

use crate::types::ResourceGroupId;

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Error classification for escalation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    InternalBug,
}

/// Top-level error type for the admission engine.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("group '{group}' has sub-groups and cannot accept queries directly")]
    NotLeaf { group: ResourceGroupId },

    #[error("cannot create a sub-group under '{group}' while it holds queries")]
    GroupNotEmpty { group: ResourceGroupId },

    /// Internal bug — should never occur in production.
    /// Always carries a unique `error_code` for post-mortem correlation.
    #[error("InvariantViolated [{error_code}]: {message}")]
    InvariantViolated {
        error_code: &'static str,
        message: String,
    },
}

impl KestrelError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        KestrelError::InvalidArgument(message.into())
    }

    /// Construct an invariant-violation error and log it immediately, so the
    /// bug is visible even if the caller swallows the `Err`.
    pub fn invariant(error_code: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(error_code, %message, "admission invariant violated");
        KestrelError::InvariantViolated {
            error_code,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KestrelError::InvalidArgument(_)
            | KestrelError::NotLeaf { .. }
            | KestrelError::GroupNotEmpty { .. } => ErrorKind::UserError,
            KestrelError::InvariantViolated { .. } => ErrorKind::InternalBug,
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::UserError
    }

    pub fn is_internal_bug(&self) -> bool {
        self.kind() == ErrorKind::InternalBug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_classification() {
        let id = ResourceGroupId::new("global").unwrap();
        assert!(KestrelError::invalid_argument("bad").is_user_error());
        assert!(KestrelError::NotLeaf { group: id.clone() }.is_user_error());
        assert!(KestrelError::GroupNotEmpty { group: id }.is_user_error());
    }

    #[test]
    fn test_invariant_is_internal_bug() {
        let err = KestrelError::invariant("KADM-0001", "eligible child had nothing to start");
        assert!(err.is_internal_bug());
        assert!(!err.is_user_error());
        assert!(err.to_string().contains("KADM-0001"));
    }

    #[test]
    fn test_not_leaf_display_names_group() {
        let id = ResourceGroupId::new("global").unwrap().child("etl").unwrap();
        let err = KestrelError::NotLeaf { group: id };
        assert!(err.to_string().contains("global.etl"));
    }
}
