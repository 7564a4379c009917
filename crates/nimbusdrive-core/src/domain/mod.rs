//! Domain types for the reconciliation engine
//!
//! This module contains the core domain types:
//! - Newtypes for validated paths and remote identifiers
//! - The per-path `SyncRecord` and its status state machine
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod record;

// Re-export commonly used types
pub use errors::DomainError;
pub use newtypes::{ItemPath, RemoteId};
pub use record::{ItemKind, RecordStatus, SyncRecord};
