//! State store adapters for nimbusdrive
//!
//! This crate implements the [`IStateStore`] port:
//!
//! - [`JsonStateStore`] - the production adapter; a single JSON file
//!   rewritten atomically (temporary file + rename) after every mutating
//!   cycle, with per-entry quarantine of records that fail typed
//!   validation on load.
//! - [`InMemoryStateStore`] - a HashMap-backed double for engine tests.
//!
//! [`IStateStore`]: nimbusdrive_core::ports::IStateStore

pub mod memory;
pub mod store;

pub use memory::InMemoryStateStore;
pub use store::JsonStateStore;
