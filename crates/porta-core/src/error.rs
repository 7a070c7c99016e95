//! Error types for Porta core
//!
//! - `StoreError`: transient failures of the shared lease and endpoints stores.
//!   These never leave the reconciliation loop; they are logged and retried.
//! - `ConfigError`: configuration problems detected by completion. These are
//!   the only failures that cross the subsystem boundary.

use std::time::Duration;

use crate::model::Version;

/// Errors returned by the lease and endpoints stores
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("key '{0}' already exists")]
    AlreadyExists(String),

    #[error("version conflict on '{key}': expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: Version,
        actual: Version,
    },

    #[error("key '{0}' not found")]
    NotFound(String),

    #[error("invalid ttl {0:?}: must be positive")]
    InvalidTtl(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store request timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Whether the error reports a lost compare-and-swap race
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::AlreadyExists(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether the store may succeed if the same request is repeated
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Configuration errors detected during completion
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("reconciler not implemented: {0}")]
    UnknownReconciler(String),

    #[error("master count must be positive, got {0}")]
    InvalidMasterCount(i64),

    #[error("missing required dependency: {0}")]
    MissingDependency(&'static str),

    #[error("invalid ip range '{0}': {1}")]
    InvalidIpRange(String, String),

    #[error("service ip {ip} is outside service ip range {range}")]
    ServiceIpOutOfRange { ip: String, range: String },

    #[error("secondary service ip range {0} must be of a different ip family than the primary")]
    SecondaryRangeFamily(String),

    #[error("invalid port range '{0}'")]
    InvalidPortRange(String),

    #[error("node port {port} is outside node port range {range}")]
    NodePortOutOfRange { port: u16, range: String },

    #[error("endpoint reconciler ttl {ttl:?} must be greater than the reconcile interval {interval:?}")]
    TtlNotAboveInterval { ttl: Duration, interval: Duration },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let conflict = StoreError::VersionConflict {
            key: "/masterleases/10.0.0.1".to_string(),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert!(conflict.is_conflict());
        assert!(StoreError::AlreadyExists("k".to_string()).is_conflict());
        assert!(!StoreError::NotFound("k".to_string()).is_conflict());
        assert!(!StoreError::Timeout(Duration::from_secs(1)).is_conflict());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConfigError::UnknownReconciler("bogus".to_string()).to_string(),
            "reconciler not implemented: bogus"
        );
        assert_eq!(
            ConfigError::InvalidMasterCount(0).to_string(),
            "master count must be positive, got 0"
        );
    }
}
