//! Remote enumeration
//!
//! Drives the remote store's paged listing to a complete point-in-time
//! view of the remote tree. Pagination stays hidden from the reconciler;
//! a failure on any page fails the whole enumeration for this cycle so
//! decisions are never computed against a partial, inconsistent listing.

use std::collections::BTreeMap;
use std::sync::Arc;

use nimbusdrive_core::domain::ItemPath;
use nimbusdrive_core::ports::{IRemoteStore, RemoteEntry, RemoteStoreError};
use tracing::{debug, instrument, warn};

/// Guard against a listing cursor that never terminates.
const MAX_PAGES: usize = 10_000;

/// Produces complete remote listings from the paged port.
pub struct RemoteEnumerator {
    remote: Arc<dyn IRemoteStore>,
}

impl RemoteEnumerator {
    /// Create an enumerator over the given remote store.
    pub fn new(remote: Arc<dyn IRemoteStore>) -> Self {
        Self { remote }
    }

    /// Fetch the full remote tree, keyed by path.
    ///
    /// Duplicate paths within one enumeration keep the last entry seen
    /// and log a warning; the store is the authority on its own listing.
    #[instrument(skip(self))]
    pub async fn enumerate(&self) -> Result<BTreeMap<ItemPath, RemoteEntry>, RemoteStoreError> {
        let mut entries = BTreeMap::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.remote.list_page(cursor.as_deref()).await?;
            pages += 1;

            for entry in page.entries {
                if let Some(previous) = entries.insert(entry.path.clone(), entry) {
                    warn!(path = %previous.path, "duplicate path in remote listing; keeping later entry");
                }
            }

            match page.next {
                Some(next) if pages < MAX_PAGES => cursor = Some(next),
                Some(_) => {
                    return Err(RemoteStoreError::Network(format!(
                        "remote listing did not terminate after {MAX_PAGES} pages"
                    )))
                }
                None => break,
            }
        }

        debug!(entries = entries.len(), pages, "remote enumeration complete");
        Ok(entries)
    }
}
