//! Unified-blob cache over the secure backend.
//!
//! All providers' secrets live in a single secure record (the unified blob),
//! a JSON object `{ "<provider_id>": "<secret>" }`. Reading the record may
//! prompt the user, so it is read once and cached; every mutation is a full
//! read-modify-write of the map, and the cache is only updated after the
//! backend write succeeds.
//!
//! Every operation runs under one `tokio::sync::Mutex`. The mutex is FIFO,
//! so it doubles as the serialized execution queue for the record: two
//! overlapping calls never interleave a read and a write of the blob and
//! never raise two authorization prompts at once.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::model::Provider;
use crate::store::{Secret, SecureCredentialStore, StoreError};

/// Account name of the unified record.
pub const UNIFIED_RECORD: &str = "api_keys";

/// Decoded contents of the unified record.
pub type SecretMap = BTreeMap<Provider, Secret>;

/// Account name of a per-provider record written by the older storage scheme.
pub fn legacy_record(provider: Provider) -> String {
    format!("{}_api_key", provider.as_str())
}

/// What the store knows about its ability to reach the secure backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    /// Nothing has been read yet.
    Unknown,
    /// The record was read successfully and is cached.
    Granted,
    /// The backend refused access; loads fail until a retry.
    Denied,
    /// The backend is missing or failing; loads fail until a retry.
    Unavailable,
}

struct CacheState {
    entries: Option<SecretMap>,
    access: AccessState,
    /// Providers folded in from legacy records whose metadata is not yet
    /// recorded.
    imported: Vec<Provider>,
}

/// Serialized, caching view of the unified secure record.
pub struct SecureStore {
    backend: Arc<dyn SecureCredentialStore>,
    record: String,
    state: Mutex<CacheState>,
}

impl SecureStore {
    pub fn new(backend: Arc<dyn SecureCredentialStore>) -> Self {
        Self {
            backend,
            record: UNIFIED_RECORD.to_string(),
            state: Mutex::new(CacheState {
                entries: None,
                access: AccessState::Unknown,
                imported: Vec::new(),
            }),
        }
    }

    /// Whether a secure backend binding exists on this platform.
    ///
    /// False for [`UnavailableStore`](crate::store::UnavailableStore) and for
    /// a backend that cannot currently be opened at all.
    pub async fn has_backend(&self) -> bool {
        self.backend.is_accessible().await
    }

    /// Providers imported from legacy records since the last call.
    pub async fn take_imported(&self) -> Vec<Provider> {
        std::mem::take(&mut self.state.lock().await.imported)
    }

    /// Current access state, without touching the backend.
    pub async fn access_state(&self) -> AccessState {
        self.state.lock().await.access
    }

    /// Every cached secret, loading the record on first use.
    ///
    /// A missing record is an empty map (after importing any legacy
    /// per-provider records). A refused read marks the store denied and is
    /// returned as [`StoreError::AccessDenied`]; later loads keep failing
    /// without re-prompting until a mutation or [`retry_access`](Self::retry_access).
    pub async fn load_all(&self) -> Result<SecretMap, StoreError> {
        let mut state = self.state.lock().await;
        let entries = self.ensure_loaded(&mut state, false).await?;
        Ok(entries.clone())
    }

    /// One provider's secret from the cache.
    pub async fn load(&self, provider: Provider) -> Result<Option<Secret>, StoreError> {
        let mut state = self.state.lock().await;
        let entries = self.ensure_loaded(&mut state, false).await?;
        Ok(entries.get(&provider).cloned())
    }

    /// Whether the cache holds a secret for `provider`.
    pub async fn contains(&self, provider: Provider) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let entries = self.ensure_loaded(&mut state, false).await?;
        Ok(entries.contains_key(&provider))
    }

    /// Store one provider's secret and re-persist the whole blob.
    ///
    /// A previously denied store is re-checked rather than failed, since the
    /// user may have unlocked the device in the meantime.
    pub async fn save(&self, provider: Provider, secret: &Secret) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entries = self.ensure_loaded(&mut state, true).await?;

        let mut next = entries.clone();
        next.insert(provider, secret.clone());
        self.write_record(&next).await?;
        *entries = next;

        tracing::debug!(
            "Saved {} to secure storage ({})",
            provider,
            secret.masked()
        );
        Ok(())
    }

    /// Remove one provider's secret and re-persist the blob.
    ///
    /// Removing an absent provider succeeds without writing.
    pub async fn remove(&self, provider: Provider) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entries = self.ensure_loaded(&mut state, true).await?;

        if !entries.contains_key(&provider) {
            return Ok(());
        }

        let mut next = entries.clone();
        next.remove(&provider);
        self.write_record(&next).await?;
        *entries = next;

        tracing::debug!("Removed {} from secure storage", provider);
        Ok(())
    }

    /// Read one provider's secret straight from the backend, bypassing and
    /// not touching the cache. Used to verify that a write is durable.
    pub async fn read_back(&self, provider: Provider) -> Result<Option<Secret>, StoreError> {
        let _state = self.state.lock().await;
        let raw = match self.backend.load(&self.record).await? {
            Some(raw) => Zeroizing::new(raw),
            None => return Ok(None),
        };
        let mut entries = decode(&raw)?;
        Ok(entries.remove(&provider))
    }

    /// Whether the store can currently be used.
    ///
    /// Answers from the recorded state when possible; only the very first
    /// call reads the record (and may prompt once).
    pub async fn is_accessible(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.access {
            AccessState::Granted => true,
            AccessState::Denied | AccessState::Unavailable => false,
            AccessState::Unknown => {
                if !self.backend.is_accessible().await {
                    state.access = AccessState::Unavailable;
                    return false;
                }
                self.ensure_loaded(&mut state, false).await.is_ok()
            }
        }
    }

    /// Forget a recorded denial and try to read the record again.
    pub async fn retry_access(&self) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state, true).await.is_ok()
    }

    async fn ensure_loaded<'a>(
        &self,
        state: &'a mut CacheState,
        retry: bool,
    ) -> Result<&'a mut SecretMap, StoreError> {
        if state.entries.is_none() {
            match state.access {
                AccessState::Denied if !retry => {
                    return Err(StoreError::AccessDenied {
                        key: self.record.clone(),
                    });
                }
                AccessState::Unavailable if !retry => {
                    return Err(StoreError::Unavailable {
                        message: "secure storage could not be read".to_string(),
                    });
                }
                _ => {}
            }

            match self.read_record().await {
                Ok((entries, imported)) => {
                    tracing::debug!("Loaded {} secrets from secure storage", entries.len());
                    if imported {
                        state.imported = entries.keys().copied().collect();
                    }
                    state.access = AccessState::Granted;
                    state.entries = Some(entries);
                }
                Err(e) => {
                    state.access = match e {
                        StoreError::AccessDenied { .. } => AccessState::Denied,
                        _ => AccessState::Unavailable,
                    };
                    tracing::warn!("Secure storage read failed: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(state.entries.get_or_insert_with(SecretMap::new))
    }

    /// The decoded record, and whether it came from legacy records.
    async fn read_record(&self) -> Result<(SecretMap, bool), StoreError> {
        match self.backend.load(&self.record).await? {
            Some(raw) => Ok((decode(&Zeroizing::new(raw))?, false)),
            None => Ok((self.import_legacy().await, true)),
        }
    }

    async fn write_record(&self, entries: &SecretMap) -> Result<(), StoreError> {
        let json = Zeroizing::new(serde_json::to_string(entries)?);
        self.backend.save(&self.record, &json).await
    }

    /// Fold per-provider records from the older scheme into the blob.
    ///
    /// Problems here are logged, never returned: the worst case is that the
    /// import is attempted again on the next start.
    async fn import_legacy(&self) -> SecretMap {
        let mut imported = SecretMap::new();
        for provider in Provider::ALL {
            match self.backend.load(&legacy_record(provider)).await {
                Ok(Some(value)) if !value.trim().is_empty() => {
                    imported.insert(provider, Secret::new(value));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Could not read legacy record for {}: {}", provider, e);
                }
            }
        }

        if imported.is_empty() {
            return imported;
        }

        if let Err(e) = self.write_record(&imported).await {
            tracing::warn!(
                "Could not persist {} imported legacy secrets: {}",
                imported.len(),
                e
            );
            return imported;
        }

        for provider in imported.keys() {
            if let Err(e) = self.backend.delete(&legacy_record(*provider)).await {
                tracing::warn!("Could not delete legacy record for {}: {}", provider, e);
            }
        }

        tracing::info!(
            "Imported {} legacy secrets into the unified record",
            imported.len()
        );
        imported
    }
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("record", &self.record)
            .finish()
    }
}

/// Decode the unified record, skipping providers this build doesn't know.
fn decode(raw: &str) -> Result<SecretMap, StoreError> {
    if raw.trim().is_empty() {
        return Ok(SecretMap::new());
    }
    let parsed: BTreeMap<String, Secret> = serde_json::from_str(raw)?;
    let mut entries = SecretMap::new();
    for (key, secret) in parsed {
        match key.parse::<Provider>() {
            Ok(provider) => {
                entries.insert(provider, secret);
            }
            Err(_) => tracing::warn!("Ignoring unknown provider {:?} in secure record", key),
        }
    }
    Ok(entries)
}
