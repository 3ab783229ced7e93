//! Error types for the audit execution core.
//!
//! This module provides structured error handling with:
//! - `AppError`: Domain-specific errors for queue, executor and collaborators
//! - `Result<T>`: Type alias for Results using AppError
//!
//! Page store failures have their own type (`storage::PageStoreError`) since
//! most of them are absorbed inside the store rather than surfaced.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::storage::PageStoreError;

// ============================================================================
// DOMAIN ERROR TYPE
// ============================================================================

/// Domain-specific errors for audit operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad domain, session id or page limit. Raised before any side effect.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another audit is already running on this executor.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Crawl or report failure, wrapped with the audited domain.
    #[error("Audit failed for {domain}: {message}")]
    Execution { domain: String, message: String },

    /// No persisted crawl state for the domain
    #[error("State not found: {0}")]
    StateNotFound(String),

    /// Filesystem failure while removing crawl artifacts
    #[error("Cleanup failed for {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A job attempt exceeded its deadline
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Page store failure that could not be absorbed
    #[error("Storage error: {0}")]
    Storage(#[from] PageStoreError),

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a concurrency conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Wrap a failure with the domain it happened on
    pub fn execution(domain: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Execution {
            domain: domain.into(),
            message: cause.to_string(),
        }
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::DatabaseError(error.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        Self::NetworkError(error.to_string())
    }
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_carries_domain_context() {
        let err = AppError::execution("https://example.com", "connection reset");
        assert_eq!(
            err.to_string(),
            "Audit failed for https://example.com: connection reset"
        );
    }

    #[test]
    fn classifiers_match_variants() {
        assert!(AppError::validation("bad").is_validation());
        assert!(AppError::conflict("busy").is_conflict());
        assert!(!AppError::network("down").is_conflict());
    }
}
