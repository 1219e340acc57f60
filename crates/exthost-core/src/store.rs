//! Extension record store.
//!
//! Keeps two views of the installed extensions: the published in-memory map
//! read by lookups and snapshots, and the on-disk document. A reload writes
//! the disk document first ([`RecordStore::persist`]) and publishes to memory
//! afterwards ([`RecordStore::commit`]), so a failed write never exposes a
//! generation that would be lost on restart.
//!
//! On-disk layout:
//! ```text
//! {state_dir}/
//! └── extensions.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use exthost_protocols::{ExtensionError, ExtensionRecord};

use crate::error::StoreError;

/// File holding the persisted records.
pub const STORE_FILE_NAME: &str = "extensions.json";

const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    extensions: Vec<ExtensionRecord>,
}

/// Durable store of [`ExtensionRecord`]s keyed by name.
pub struct RecordStore {
    /// `None` keeps everything in memory.
    path: Option<PathBuf>,
    records: RwLock<BTreeMap<String, ExtensionRecord>>,
    disk: Mutex<BTreeMap<String, ExtensionRecord>>,
    next_seq: AtomicU64,
}

impl RecordStore {
    /// Create a store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(BTreeMap::new()),
            disk: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Open (or create) the store under `state_dir`.
    pub async fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir).await?;

        let path = state_dir.join(STORE_FILE_NAME);
        let records = match fs::read_to_string(&path).await {
            Ok(content) => {
                let doc: StoreDocument = serde_json::from_str(&content)?;
                if doc.version != STORE_FORMAT_VERSION {
                    return Err(StoreError::UnsupportedVersion(doc.version));
                }
                doc.extensions
                    .into_iter()
                    .map(|r| (r.name.clone(), r))
                    .collect::<BTreeMap<_, _>>()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let next_seq = records.values().map(|r| r.install_seq + 1).max().unwrap_or(0);
        debug!("Record store opened at {:?} with {} extensions", path, records.len());

        Ok(Self {
            path: Some(path),
            disk: Mutex::new(records.clone()),
            records: RwLock::new(records),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    /// Location of the state file, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a record by name.
    pub fn get(&self, name: &str) -> Result<ExtensionRecord, ExtensionError> {
        self.records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.read().contains_key(name)
    }

    /// All records in install order.
    pub fn list(&self) -> Vec<ExtensionRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.install_seq);
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Reserve the next install sequence number.
    pub fn next_install_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Write `record` to disk without publishing it.
    pub async fn persist(&self, record: &ExtensionRecord) -> Result<(), StoreError> {
        let mut disk = self.disk.lock().await;
        let previous = disk.insert(record.name.clone(), record.clone());

        if let Err(e) = self.write_document(&disk).await {
            match previous {
                Some(prev) => disk.insert(record.name.clone(), prev),
                None => disk.remove(&record.name),
            };
            return Err(e);
        }

        Ok(())
    }

    /// Publish a persisted record to readers.
    pub fn commit(&self, record: ExtensionRecord) {
        self.records.write().insert(record.name.clone(), record);
    }

    /// Persist and publish in one step.
    pub async fn upsert(&self, record: ExtensionRecord) -> Result<(), StoreError> {
        self.persist(&record).await?;
        self.commit(record);
        Ok(())
    }

    /// Remove a record from disk without unpublishing it.
    pub async fn persist_removal(&self, name: &str) -> Result<(), ExtensionError> {
        let mut disk = self.disk.lock().await;
        let Some(removed) = disk.remove(name) else {
            return Err(ExtensionError::NotFound(name.to_string()));
        };

        if let Err(e) = self.write_document(&disk).await {
            disk.insert(name.to_string(), removed);
            return Err(e.into());
        }

        Ok(())
    }

    /// Drop a record from readers.
    pub fn unpublish(&self, name: &str) -> Option<ExtensionRecord> {
        self.records.write().remove(name)
    }

    /// Remove a record from disk and memory.
    pub async fn remove(&self, name: &str) -> Result<ExtensionRecord, ExtensionError> {
        let record = self.get(name)?;
        self.persist_removal(name).await?;
        Ok(self.unpublish(name).unwrap_or(record))
    }

    /// Mutate the runtime-only fields of a published record.
    pub fn update_runtime(&self, name: &str, f: impl FnOnce(&mut ExtensionRecord)) -> bool {
        match self.records.write().get_mut(name) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    async fn write_document(
        &self,
        records: &BTreeMap<String, ExtensionRecord>,
    ) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let mut extensions: Vec<_> = records.values().cloned().collect();
        extensions.sort_by_key(|r| r.install_seq);
        let doc = StoreDocument {
            version: STORE_FORMAT_VERSION,
            extensions,
        };
        let content = serde_json::to_string_pretty(&doc)?;

        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, content).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!("Failed to remove temp file {:?}: {}", tmp, cleanup);
            }
            return Err(e.into());
        }

        debug!("Persisted {} extension records to {:?}", records.len(), path);
        Ok(())
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
