//! Storage backend abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecureCredentialStore`] - Trait for OS-level encrypted record storage
//! - [`PreferenceStore`] - Trait for plain, always-available key/value storage
//! - [`MemorySecureStore`] / [`MemoryPreferenceStore`] - In-memory implementations for testing
//! - [`FilePreferenceStore`] - JSON file preference storage
//! - [`KeyringCredentialStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_secure_backend`] - Helper to select a secure backend based on availability
//!
//! Backends deal in raw strings keyed by account/key name. The typed,
//! provider-aware views live in [`crate::secure_store`] and
//! [`crate::plain_store`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroize;

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::{FilePreferenceStore, PREFERENCES_FILE};
pub use memory::{MemoryPreferenceStore, MemorySecureStore};
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringCredentialStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    /// Whether the secret is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Fixed-width preview for operator-facing diagnostics.
    ///
    /// Shows the first and last four characters; anything of eight
    /// characters or fewer is fully masked.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}

impl Eq for Secret {}

/// Error type for storage backend operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Access to the backend was refused (user declined, device locked).
    #[error("access denied to {key}")]
    AccessDenied { key: String },

    /// No usable backend is configured on this platform.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error reading or writing a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn lock_poisoned(e: impl std::fmt::Display) -> Self {
        Self::BackendError {
            message: format!("lock poisoned: {}", e),
        }
    }
}

/// Abstraction over the platform secure credential facility.
///
/// A backend stores opaque string records under an account name. Keyward
/// only ever uses one record (the unified blob) plus the legacy
/// per-provider records it imports once.
///
/// Implementations include:
/// - [`MemorySecureStore`] - In-memory storage with fault injection for testing
/// - [`KeyringCredentialStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecureCredentialStore: Send + Sync {
    /// Read a record.
    ///
    /// Returns `Ok(None)` if the record doesn't exist.
    async fn load(&self, account: &str) -> Result<Option<String>, StoreError>;

    /// Write a record, replacing any existing value.
    async fn save(&self, account: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a record.
    ///
    /// Returns `Ok(())` even if the record didn't exist.
    async fn delete(&self, account: &str) -> Result<(), StoreError>;

    /// Whether the backend can be used at all, without prompting the user.
    async fn is_accessible(&self) -> bool;
}

/// A value held by a [`PreferenceStore`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Bool(bool),
    Text(String),
}

impl PreferenceValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bool(_) => None,
        }
    }
}

// Text values may be secrets.
impl std::fmt::Debug for PreferenceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Text(s) => write!(f, "Text(<{} chars>)", s.chars().count()),
        }
    }
}

/// Abstraction over plain key/value preference storage.
///
/// Implementations are expected to serialize single-key operations
/// internally; callers do not add their own locking.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Read a value. Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<PreferenceValue>, StoreError>;

    /// Write a value, replacing any existing one.
    async fn set(&self, key: &str, value: PreferenceValue) -> Result<(), StoreError>;

    /// Remove a key. Returns `Ok(())` even if the key didn't exist.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Secure backend used when no platform facility could be opened.
///
/// Every operation fails with [`StoreError::Unavailable`], so callers see
/// a retryable, actionable error instead of silently losing secrets.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> StoreError {
        StoreError::Unavailable {
            message: self.reason.clone(),
        }
    }
}

#[async_trait]
impl SecureCredentialStore for UnavailableStore {
    async fn load(&self, _account: &str) -> Result<Option<String>, StoreError> {
        Err(self.error())
    }

    async fn save(&self, _account: &str, _value: &str) -> Result<(), StoreError> {
        Err(self.error())
    }

    async fn delete(&self, _account: &str) -> Result<(), StoreError> {
        Err(self.error())
    }

    async fn is_accessible(&self) -> bool {
        false
    }
}

/// Create a secure backend with automatic selection.
///
/// # Backend Selection Logic
///
/// - If the `keyring-store` feature is enabled and the platform keyring can
///   be opened for `service_name`: returns a [`KeyringCredentialStore`]
/// - Otherwise: returns an [`UnavailableStore`], so secure operations report
///   `BackendUnavailable` while the plain backend keeps working
///
/// # Example
///
/// ```rust,ignore
/// use keyward_core::store::create_secure_backend;
///
/// let backend = create_secure_backend("keyward");
/// ```
#[cfg(feature = "keyring-store")]
pub fn create_secure_backend(service_name: &str) -> Arc<dyn SecureCredentialStore> {
    match KeyringCredentialStore::try_new(service_name) {
        Ok(store) => {
            tracing::info!("Using OS keyring for secure storage");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), secure storage disabled. \
                 Plain storage remains usable.",
                e
            );
            Arc::new(UnavailableStore::new(e.to_string()))
        }
    }
}

/// Create a secure backend with automatic selection.
///
/// Without the `keyring-store` feature there is no platform binding, so this
/// always returns an [`UnavailableStore`].
#[cfg(not(feature = "keyring-store"))]
pub fn create_secure_backend(service_name: &str) -> Arc<dyn SecureCredentialStore> {
    tracing::warn!(
        "Secure storage requested for {} but keyring-store feature not enabled",
        service_name
    );
    Arc::new(UnavailableStore::new("keyring-store feature not enabled"))
}
