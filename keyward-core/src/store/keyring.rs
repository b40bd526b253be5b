//! OS keyring-backed secure storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{SecureCredentialStore, StoreError};

/// OS keyring-backed secure store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service (GNOME Keyring, KWallet) over D-Bus
/// - Windows: Credential Manager
///
/// Each record is one keyring entry with service `service_name` and user
/// `account`. Keyring calls can block on an authorization prompt, so they
/// run on tokio's blocking pool.
///
/// # Example
///
/// ```rust,ignore
/// use keyward_core::store::{KeyringCredentialStore, SecureCredentialStore};
///
/// let store = KeyringCredentialStore::try_new("keyward").unwrap();
/// store.save("api_keys", r#"{"openai":"sk-..."}"#).await.unwrap();
/// ```
#[derive(Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        match Entry::new(service_name, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::Unavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    /// Get the keyring service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn with_entry<T, F>(&self, account: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service_name.clone();
        let account = account.to_string();
        let key = account.clone();

        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &account)?;
            op(entry)
        })
        .await
        .map_err(|e| StoreError::BackendError {
            message: format!("keyring task failed: {}", e),
        })?
        .map_err(|e| map_keyring_error(&key, e))
    }
}

/// Translate keyring errors into the storage taxonomy.
///
/// `NoEntry` never reaches this point; callers map it to `None` or a no-op.
fn map_keyring_error(key: &str, error: keyring::Error) -> StoreError {
    match error {
        keyring::Error::NoStorageAccess(e) => {
            tracing::debug!("Keyring refused access to {}: {}", key, e);
            StoreError::AccessDenied {
                key: key.to_string(),
            }
        }
        keyring::Error::PlatformFailure(e) => StoreError::Unavailable {
            message: format!("platform keyring failure: {}", e),
        },
        keyring::Error::Ambiguous(_) => StoreError::BackendError {
            message: format!("ambiguous keyring entry for {}", key),
        },
        keyring::Error::Invalid(attr, reason) => StoreError::BackendError {
            message: format!("invalid keyring attribute {}: {}", attr, reason),
        },
        e => StoreError::BackendError {
            message: format!("keyring error: {}", e),
        },
    }
}

impl std::fmt::Debug for KeyringCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringCredentialStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecureCredentialStore for KeyringCredentialStore {
    async fn load(&self, account: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(account, |entry| match entry.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn save(&self, account: &str, value: &str) -> Result<(), StoreError> {
        let value = zeroize::Zeroizing::new(value.to_string());
        self.with_entry(account, move |entry| entry.set_password(&value))
            .await
    }

    async fn delete(&self, account: &str) -> Result<(), StoreError> {
        self.with_entry(account, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }

    async fn is_accessible(&self) -> bool {
        Entry::new(&self.service_name, "availability_check").is_ok()
    }
}
