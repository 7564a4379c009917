//! State store port (driven/secondary port)
//!
//! This module defines the interface for the durable path-keyed table of
//! [`SyncRecord`]s. All mutation flows through the reconciler/executor
//! pair; the observer and enumerator never touch it.
//!
//! ## Design Notes
//!
//! - `snapshot` returns a consistent clone taken at cycle start; decisions
//!   for the whole cycle are computed against that snapshot while
//!   mutations land one by one as actions complete.
//! - `flush` makes the current contents durable; implementations persist
//!   atomically (temporary file + rename) so a crash mid-cycle never
//!   yields a half-written state file.
//! - `remove_subtree` exists because a folder's lifecycle dominates its
//!   descendants: clearing a folder record clears everything below it.

use crate::domain::newtypes::ItemPath;
use crate::domain::record::SyncRecord;

/// Port trait for the persisted synchronization state
#[async_trait::async_trait]
pub trait IStateStore: Send + Sync {
    /// Look up the record for one path
    async fn get(&self, path: &ItemPath) -> anyhow::Result<Option<SyncRecord>>;

    /// Insert or replace the record keyed by its path
    async fn put(&self, record: SyncRecord) -> anyhow::Result<()>;

    /// Remove the record for one path (no-op if absent)
    async fn delete(&self, path: &ItemPath) -> anyhow::Result<()>;

    /// Remove the record at `path` and every record strictly below it
    async fn remove_subtree(&self, path: &ItemPath) -> anyhow::Result<()>;

    /// A consistent snapshot of all records
    async fn snapshot(&self) -> anyhow::Result<Vec<SyncRecord>>;

    /// Persist the current contents durably and atomically
    async fn flush(&self) -> anyhow::Result<()>;
}
