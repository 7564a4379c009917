//! In-memory state store for tests
//!
//! Implements [`IStateStore`] over a plain map with no persistence.
//! `flush` is a no-op. Used by engine and reconciler tests that do not
//! care about durability.

use std::collections::BTreeMap;

use nimbusdrive_core::domain::{ItemPath, SyncRecord};
use nimbusdrive_core::ports::IStateStore;
use tokio::sync::Mutex;

/// Map-backed [`IStateStore`] double.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: Mutex<BTreeMap<ItemPath, SyncRecord>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = SyncRecord>) -> Self {
        Self {
            records: Mutex::new(
                records
                    .into_iter()
                    .map(|r| (r.path().clone(), r))
                    .collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl IStateStore for InMemoryStateStore {
    async fn get(&self, path: &ItemPath) -> anyhow::Result<Option<SyncRecord>> {
        Ok(self.records.lock().await.get(path).cloned())
    }

    async fn put(&self, record: SyncRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .insert(record.path().clone(), record);
        Ok(())
    }

    async fn delete(&self, path: &ItemPath) -> anyhow::Result<()> {
        self.records.lock().await.remove(path);
        Ok(())
    }

    async fn remove_subtree(&self, path: &ItemPath) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .retain(|key, _| key != path && !path.is_ancestor_of(key));
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<Vec<SyncRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
