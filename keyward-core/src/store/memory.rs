//! In-memory storage backends for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{PreferenceStore, PreferenceValue, SecureCredentialStore, StoreError};

/// In-memory stand-in for the OS secure credential store.
///
/// Besides plain storage it can simulate the failure modes of a real
/// keyring: refused access, failing writes or deletes, writes that report
/// success without persisting (as headless keyring daemons do), and slow
/// calls. Faults can be toggled at any time from a test.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and atomics and
/// is safe to share across threads.
#[derive(Default)]
pub struct MemorySecureStore {
    data: RwLock<HashMap<String, String>>,
    deny_access: AtomicBool,
    unavailable: AtomicBool,
    fail_saves: AtomicBool,
    fail_deletes: AtomicBool,
    drop_saves: AtomicBool,
    fail_after_saves: AtomicBool,
    latency_ms: AtomicUsize,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemorySecureStore {
    /// Create a new empty store with no faults enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every operation with `AccessDenied`, as a locked keychain does.
    pub fn set_deny_access(&self, deny: bool) {
        self.deny_access.store(deny, Ordering::SeqCst);
    }

    /// Behave as if no secure backend exists on this platform.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `save` fail with a backend error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` fail with a backend error.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make `save` report success without persisting anything.
    pub fn set_drop_saves(&self, drop: bool) {
        self.drop_saves.store(drop, Ordering::SeqCst);
    }

    /// Make `save` persist the value and then report a backend error, as a
    /// keyring call that times out after committing does.
    pub fn set_fail_after_saves(&self, fail: bool) {
        self.fail_after_saves.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by the given duration.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    /// Number of `load` calls that reached the backend.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `save` calls that reached the backend.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Read a record directly, bypassing faults and counters.
    pub fn raw(&self, account: &str) -> Option<String> {
        self.data
            .read()
            .ok()
            .and_then(|data| data.get(account).cloned())
    }

    /// Write a record directly, bypassing faults and counters.
    pub fn insert_raw(&self, account: &str, value: &str) {
        if let Ok(mut data) = self.data.write() {
            data.insert(account.to_string(), value.to_string());
        }
    }

    async fn gate(&self, account: &str) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency as u64)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "no secure backend configured".to_string(),
            });
        }
        if self.deny_access.load(Ordering::SeqCst) {
            return Err(StoreError::AccessDenied {
                key: account.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemorySecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.data.read().map(|d| d.len()).unwrap_or(0);
        f.debug_struct("MemorySecureStore")
            .field("records_count", &count)
            .finish()
    }
}

#[async_trait]
impl SecureCredentialStore for MemorySecureStore {
    async fn load(&self, account: &str) -> Result<Option<String>, StoreError> {
        self.gate(account).await?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        let data = self.data.read().map_err(StoreError::lock_poisoned)?;
        Ok(data.get(account).cloned())
    }

    async fn save(&self, account: &str, value: &str) -> Result<(), StoreError> {
        self.gate(account).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: format!("simulated write failure for {}", account),
            });
        }
        if self.drop_saves.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut data = self.data.write().map_err(StoreError::lock_poisoned)?;
            data.insert(account.to_string(), value.to_string());
        }
        if self.fail_after_saves.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: format!("simulated timeout after writing {}", account),
            });
        }
        Ok(())
    }

    async fn delete(&self, account: &str) -> Result<(), StoreError> {
        self.gate(account).await?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: format!("simulated delete failure for {}", account),
            });
        }
        let mut data = self.data.write().map_err(StoreError::lock_poisoned)?;
        data.remove(account);
        Ok(())
    }

    async fn is_accessible(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst) && !self.deny_access.load(Ordering::SeqCst)
    }
}

/// In-memory preference store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    data: RwLock<HashMap<String, PreferenceValue>>,
    fail_writes: AtomicBool,
}

impl MemoryPreferenceStore {
    /// Create a new empty preference store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `set` and `remove` fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .read()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn check_writable(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: format!("simulated write failure for {}", key),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryPreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.data.read().map(|d| d.len()).unwrap_or(0);
        f.debug_struct("MemoryPreferenceStore")
            .field("keys_count", &count)
            .finish()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<PreferenceValue>, StoreError> {
        let data = self.data.read().map_err(StoreError::lock_poisoned)?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: PreferenceValue) -> Result<(), StoreError> {
        self.check_writable(key)?;
        let mut data = self.data.write().map_err(StoreError::lock_poisoned)?;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable(key)?;
        let mut data = self.data.write().map_err(StoreError::lock_poisoned)?;
        data.remove(key);
        Ok(())
    }
}
