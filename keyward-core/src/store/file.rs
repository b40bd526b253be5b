//! Disk-backed preference storage.
//!
//! Preferences are kept in a single JSON object file and rewritten in full
//! on every change, mirroring the flat key/value layout of desktop
//! preference stores.
//!
//! # Storage Location
//!
//! `~/.local/share/keyward/preferences.json` on Linux,
//! `~/Library/Application Support/dev.keyward.keyward/preferences.json` on
//! macOS and `%APPDATA%\keyward\keyward\data\preferences.json` on Windows.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{PreferenceStore, PreferenceValue, StoreError};

/// File name used inside the data directory.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// JSON-file preference store.
///
/// # Thread Safety
///
/// The whole map is cached behind an `RwLock`; a write holds the lock until
/// the file has been rewritten, so single-key operations are serialized.
pub struct FilePreferenceStore {
    /// Path to the preferences JSON file.
    path: PathBuf,

    /// In-memory copy of the file contents.
    data: RwLock<BTreeMap<String, PreferenceValue>>,
}

impl FilePreferenceStore {
    /// Get the default storage path for preferences.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("dev", "keyward", "keyward").ok_or_else(|| {
            StoreError::Unavailable {
                message: "no home directory for preference storage".to_string(),
            }
        })?;

        Ok(dirs.data_dir().join(PREFERENCES_FILE))
    }

    /// Open the preference store at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(Self::default_path()?)
    }

    /// Open the preference store at a specific path.
    ///
    /// Creates parent directories if they don't exist. A missing file is an
    /// empty store; it is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, PreferenceValue>) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `change` to a copy of the map, persist it, then publish it.
    fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, PreferenceValue>),
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(StoreError::lock_poisoned)?;
        let mut next = data.clone();
        change(&mut next);
        if next == *data {
            return Ok(());
        }
        self.persist(&next)?;
        *data = next;
        Ok(())
    }
}

impl std::fmt::Debug for FilePreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePreferenceStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<PreferenceValue>, StoreError> {
        let data = self.data.read().map_err(StoreError::lock_poisoned)?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: PreferenceValue) -> Result<(), StoreError> {
        self.update(|data| {
            data.insert(key.to_string(), value);
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|data| {
            data.remove(key);
        })
    }
}
