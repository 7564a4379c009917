//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! engine. Ports are interfaces the reconciliation core depends on, but
//! whose implementations live in adapter crates (or in the embedding
//! process, for the network transport).
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - list/upload/download/delete against the remote
//!   content store, with a distinguishable error taxonomy
//! - [`ILocalFileSystem`] - local walk, atomic writes, trash
//! - [`IStateStore`] - durable path-keyed `SyncRecord` table

pub mod local_filesystem;
pub mod remote_store;
pub mod state_store;

pub use local_filesystem::{ILocalFileSystem, LocalEntry, LocalMetadata};
pub use remote_store::{IRemoteStore, RemoteEntry, RemotePage, RemoteStoreError};
pub use state_store::IStateStore;
