//! JSON-file state store adapter (secondary/driven adapter)
//!
//! Implements [`IStateStore`] over a single JSON file.
//!
//! ## Design Decisions
//!
//! - **Atomic persistence**: `flush` serializes to a `.tmp` sibling in the
//!   same directory and renames it over the target, so a crash mid-cycle
//!   never yields a half-written state file.
//! - **Single writer**: all access goes through one `tokio::sync::Mutex`;
//!   `snapshot` clones a consistent view for the cycle.
//! - **Quarantine on load**: entries that fail typed validation are kept
//!   verbatim in a `quarantine` section of the file and logged, never
//!   silently coerced or dropped. A wholly unparseable file is moved
//!   aside to `<file>.corrupt-<timestamp>` and an empty store starts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nimbusdrive_core::domain::{ItemPath, SyncRecord};
use nimbusdrive_core::ports::IStateStore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Current on-disk schema version.
const SCHEMA_VERSION: u32 = 1;

/// On-disk shape of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    /// Schema version marker.
    version: u32,
    /// Path-keyed record table.
    #[serde(default)]
    records: BTreeMap<String, serde_json::Value>,
    /// Entries that failed typed validation, preserved verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    quarantine: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<ItemPath, SyncRecord>,
    quarantine: BTreeMap<String, serde_json::Value>,
}

/// File-backed [`IStateStore`] implementation.
#[derive(Debug)]
pub struct JsonStateStore {
    file: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonStateStore {
    /// Open the store at `file`, loading and validating any existing
    /// contents.
    ///
    /// A missing file yields an empty store. A file that is not valid
    /// JSON is moved aside and an empty store starts; individual records
    /// that fail validation are quarantined.
    #[instrument(skip_all, fields(file = %file.as_ref().display()))]
    pub async fn open(file: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = file.as_ref().to_path_buf();

        let inner = match tokio::fs::read(&file).await {
            Ok(bytes) => match serde_json::from_slice::<StateFile>(&bytes) {
                Ok(parsed) => Self::validate_entries(parsed),
                Err(e) => {
                    let aside = corrupt_sibling(&file);
                    error!(
                        error = %e,
                        moved_to = %aside.display(),
                        "state file is not valid JSON; moving aside and starting empty"
                    );
                    tokio::fs::rename(&file, &aside).await?;
                    Inner::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no state file yet; starting empty");
                Inner::default()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            records = inner.records.len(),
            quarantined = inner.quarantine.len(),
            "state store loaded"
        );

        Ok(Self {
            file,
            inner: Mutex::new(inner),
        })
    }

    /// Typed validation of raw entries; failures land in quarantine.
    fn validate_entries(parsed: StateFile) -> Inner {
        let mut inner = Inner {
            records: BTreeMap::new(),
            quarantine: parsed.quarantine,
        };

        for (key, value) in parsed.records {
            match serde_json::from_value::<SyncRecord>(value.clone()) {
                Ok(record) if record.path().as_str() == key => {
                    inner.records.insert(record.path().clone(), record);
                }
                Ok(record) => {
                    warn!(
                        key = %key,
                        record_path = %record.path(),
                        "state entry key does not match its record path; quarantining"
                    );
                    inner.quarantine.insert(key, value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "malformed state entry; quarantining");
                    inner.quarantine.insert(key, value);
                }
            }
        }

        inner
    }

    /// Number of quarantined entries currently held.
    pub async fn quarantined_count(&self) -> usize {
        self.inner.lock().await.quarantine.len()
    }

    async fn write_atomic(&self, contents: &StateFile) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(contents)?;

        // Temporary sibling in the same directory so the rename is atomic.
        let tmp_path = {
            let mut p = self.file.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };

        if let Some(parent) = self.file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.file).await?;
        debug!(bytes = json.len(), "state file written");
        Ok(())
    }
}

#[async_trait::async_trait]
impl IStateStore for JsonStateStore {
    async fn get(&self, path: &ItemPath) -> anyhow::Result<Option<SyncRecord>> {
        Ok(self.inner.lock().await.records.get(path).cloned())
    }

    async fn put(&self, record: SyncRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.records.insert(record.path().clone(), record);
        Ok(())
    }

    async fn delete(&self, path: &ItemPath) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.records.remove(path);
        Ok(())
    }

    async fn remove_subtree(&self, path: &ItemPath) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .retain(|key, _| key != path && !path.is_ancestor_of(key));
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<Vec<SyncRecord>> {
        Ok(self.inner.lock().await.records.values().cloned().collect())
    }

    #[instrument(skip(self), fields(file = %self.file.display()))]
    async fn flush(&self) -> anyhow::Result<()> {
        let contents = {
            let inner = self.inner.lock().await;
            StateFile {
                version: SCHEMA_VERSION,
                records: inner
                    .records
                    .iter()
                    .map(|(k, v)| {
                        serde_json::to_value(v).map(|value| (k.as_str().to_string(), value))
                    })
                    .collect::<Result<_, _>>()?,
                quarantine: inner.quarantine.clone(),
            }
        };
        self.write_atomic(&contents).await
    }
}

fn corrupt_sibling(file: &Path) -> PathBuf {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let mut p = file.as_os_str().to_owned();
    p.push(format!(".corrupt-{ts}"));
    PathBuf::from(p)
}
