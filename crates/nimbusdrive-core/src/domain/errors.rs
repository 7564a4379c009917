//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including path validation failures and invalid status transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid sync path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid record status transition attempt
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// The current status
        from: String,
        /// The attempted target status
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A persisted record failed typed validation on load
    #[error("Malformed record for {path}: {reason}")]
    MalformedRecord {
        /// The raw path key of the offending entry
        path: String,
        /// Why the entry could not be decoded
        reason: String,
    },
}
