//! Nimbusdrive Core - Domain model and port definitions
//!
//! This crate contains the hexagonal architecture core of the reconciliation
//! engine:
//! - **Domain types** - `SyncRecord`, `ItemPath`, `RemoteId`, the record
//!   status state machine
//! - **Port definitions** - Traits for adapters: `IRemoteStore`,
//!   `ILocalFileSystem`, `IStateStore`
//! - **Configuration** - YAML-backed `Config` with validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O. Ports define
//! trait interfaces that adapter crates implement. The reconciliation engine
//! itself lives in `nimbusdrive-sync` and depends only on these ports.

pub mod config;
pub mod domain;
pub mod ports;
