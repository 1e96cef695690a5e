use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::StorageError;
use crate::models::{NewRecord, Record};

/// Record table file name in the cache directory
pub const RECORDS_FILE: &str = "records.json";

/// Metadata table file name in the cache directory
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Default, Deserialize)]
struct RecordsFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Serialize)]
struct RecordsFileRef<'a> {
    next_id: u64,
    records: &'a [Record],
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    records: Vec<Record>,
    metadata: BTreeMap<String, String>,
}

/// Durable storage of records and a small metadata map.
///
/// Each write lands in a temporary file that is renamed over the previous one,
/// and the in-memory snapshot is swapped only once the rename succeeded, so a
/// batch is either fully visible to readers or not at all.
pub struct RecordStore {
    cache_dir: PathBuf,
    state: RwLock<StoreState>,
}

impl RecordStore {
    /// Open (or create) a store in `cache_dir`.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).map_err(|e| StorageError::io(&cache_dir, e))?;

        let records: RecordsFile = load(&cache_dir, RECORDS_FILE)?.unwrap_or_default();
        let metadata: BTreeMap<String, String> =
            load(&cache_dir, METADATA_FILE)?.unwrap_or_default();

        // Never hand out an id that is already on disk, even if next_id was lost
        let max_id = records.records.iter().map(|r| r.id + 1).max().unwrap_or(0);
        let next_id = records.next_id.max(max_id);

        debug!(
            dir = %cache_dir.display(),
            records = records.records.len(),
            metadata = metadata.len(),
            "Opened record store"
        );

        Ok(Self {
            cache_dir,
            state: RwLock::new(StoreState {
                next_id,
                records: records.records,
                metadata,
            }),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Append each record as a new entry. Duplicates are kept as independent entries.
    pub fn put(&self, records: Vec<NewRecord>) -> Result<Vec<Record>, StorageError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.write()?;
        let (stored, next_id) = assign_ids(records, state.next_id);

        let mut all = Vec::with_capacity(state.records.len() + stored.len());
        all.extend_from_slice(&state.records);
        all.extend_from_slice(&stored);

        self.save_records(next_id, &all)?;
        state.records = all;
        state.next_id = next_id;

        debug!(added = stored.len(), total = state.records.len(), "Appended records");
        Ok(stored)
    }

    /// Replace the whole record set with `records`. Ids keep increasing across replacements.
    pub fn replace_all(&self, records: Vec<NewRecord>) -> Result<Vec<Record>, StorageError> {
        let mut state = self.write()?;
        let (stored, next_id) = assign_ids(records, state.next_id);

        self.save_records(next_id, &stored)?;
        state.records = stored.clone();
        state.next_id = next_id;

        debug!(total = stored.len(), "Replaced record set");
        Ok(stored)
    }

    /// Every stored record in insertion order.
    pub fn all(&self) -> Result<Vec<Record>, StorageError> {
        Ok(self.read()?.records.clone())
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.read()?.records.is_empty())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read()?.metadata.get(key).cloned())
    }

    /// Upsert a metadata entry, overwriting any prior value for `key`.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let mut metadata = state.metadata.clone();
        metadata.insert(key.to_string(), value.to_string());

        save(&self.cache_dir, METADATA_FILE, &metadata)?;
        state.metadata = metadata;
        Ok(())
    }

    fn save_records(&self, next_id: u64, records: &[Record]) -> Result<(), StorageError> {
        save(&self.cache_dir, RECORDS_FILE, &RecordsFileRef { next_id, records })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StorageError> {
        self.state.read().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StorageError> {
        self.state.write().map_err(|_| StorageError::Poisoned)
    }
}

fn assign_ids(records: Vec<NewRecord>, mut next_id: u64) -> (Vec<Record>, u64) {
    let stored = records
        .into_iter()
        .map(|r| {
            let record = r.into_record(next_id);
            next_id += 1;
            record
        })
        .collect();
    (stored, next_id)
}

fn load<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Option<T>, StorageError> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
    let value = serde_json::from_str(&contents)
        .map_err(|source| StorageError::Corrupt { path, source })?;
    Ok(Some(value))
}

fn save<T: Serialize + ?Sized>(dir: &Path, name: &str, data: &T) -> Result<(), StorageError> {
    let path = dir.join(name);
    let tmp = dir.join(format!("{}.tmp", name));
    let contents = serde_json::to_string_pretty(data)?;

    std::fs::write(&tmp, contents).map_err(|e| StorageError::io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| StorageError::io(&path, e))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
