//! Plain, always-available per-provider storage.
//!
//! # Key Convention
//!
//! For each provider the preference store holds up to three keys:
//! - `secret_<provider>` - the secret itself (string)
//! - `has_secret_<provider>` - existence flag (bool)
//! - `storage_method_<provider>` - `"secure"` or `"plain"`
//!
//! Writes happen in the order secret, flag, preference, so an interrupted
//! sequence never reports a secret as existing before it is persisted.

use std::sync::Arc;

use crate::model::{Provider, StorageMethod};
use crate::store::{PreferenceStore, PreferenceValue, Secret, StoreError};

pub fn secret_key(provider: Provider) -> String {
    format!("secret_{}", provider.as_str())
}

pub fn flag_key(provider: Provider) -> String {
    format!("has_secret_{}", provider.as_str())
}

pub fn method_key(provider: Provider) -> String {
    format!("storage_method_{}", provider.as_str())
}

/// Typed view over a [`PreferenceStore`].
#[derive(Clone)]
pub struct PlainStore {
    backend: Arc<dyn PreferenceStore>,
}

impl PlainStore {
    pub fn new(backend: Arc<dyn PreferenceStore>) -> Self {
        Self { backend }
    }

    pub async fn save_secret(&self, provider: Provider, secret: &Secret) -> Result<(), StoreError> {
        self.backend
            .set(
                &secret_key(provider),
                PreferenceValue::Text(secret.expose().to_string()),
            )
            .await
    }

    /// The stored secret, if any. Empty or non-text values count as absent.
    pub async fn load_secret(&self, provider: Provider) -> Result<Option<Secret>, StoreError> {
        let value = self.backend.get(&secret_key(provider)).await?;
        Ok(match value {
            Some(PreferenceValue::Text(s)) if !s.is_empty() => Some(Secret::new(s)),
            _ => None,
        })
    }

    pub async fn remove_secret(&self, provider: Provider) -> Result<(), StoreError> {
        self.backend.remove(&secret_key(provider)).await
    }

    /// Read the existence flag only; the secret itself is never read.
    pub async fn has_secret(&self, provider: Provider) -> Result<bool, StoreError> {
        let value = self.backend.get(&flag_key(provider)).await?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    pub async fn preference(&self, provider: Provider) -> Result<Option<StorageMethod>, StoreError> {
        let value = self.backend.get(&method_key(provider)).await?;
        Ok(value
            .as_ref()
            .and_then(|v| v.as_text())
            .and_then(|s| match s.parse::<StorageMethod>() {
                Ok(method) => Some(method),
                Err(e) => {
                    tracing::warn!("Ignoring stored preference for {}: {}", provider, e);
                    None
                }
            }))
    }

    pub async fn set_preference(
        &self,
        provider: Provider,
        method: StorageMethod,
    ) -> Result<(), StoreError> {
        self.backend
            .set(
                &method_key(provider),
                PreferenceValue::Text(method.as_str().to_string()),
            )
            .await
    }

    /// Record that `provider` now has a secret held by `method`.
    ///
    /// Writes the flag, then the preference. Callers persist the secret
    /// first.
    pub async fn mark_stored(
        &self,
        provider: Provider,
        method: StorageMethod,
    ) -> Result<(), StoreError> {
        self.backend
            .set(&flag_key(provider), PreferenceValue::Bool(true))
            .await?;
        self.set_preference(provider, method).await
    }

    /// Clear the flag and the preference.
    ///
    /// Both removals are attempted; the first error is returned.
    pub async fn clear_metadata(&self, provider: Provider) -> Result<(), StoreError> {
        let flag = self.backend.remove(&flag_key(provider)).await;
        let method = self.backend.remove(&method_key(provider)).await;
        flag.and(method)
    }
}

impl std::fmt::Debug for PlainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPreferenceStore;

    fn store() -> (PlainStore, Arc<MemoryPreferenceStore>) {
        let backend = Arc::new(MemoryPreferenceStore::new());
        (PlainStore::new(backend.clone()), backend)
    }

    #[test]
    fn test_key_names() {
        assert_eq!(secret_key(Provider::OpenAi), "secret_openai");
        assert_eq!(flag_key(Provider::Anthropic), "has_secret_anthropic");
        assert_eq!(method_key(Provider::Gemini), "storage_method_gemini");
    }

    #[tokio::test]
    async fn test_secret_roundtrip() {
        let (store, _backend) = store();
        store
            .save_secret(Provider::OpenAi, &Secret::new("sk-abc123"))
            .await
            .unwrap();

        let loaded = store.load_secret(Provider::OpenAi).await.unwrap().unwrap();
        assert_eq!(loaded.expose(), "sk-abc123");

        store.remove_secret(Provider::OpenAi).await.unwrap();
        assert!(store.load_secret(Provider::OpenAi).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saving_secret_does_not_set_flag() {
        let (store, _backend) = store();
        store
            .save_secret(Provider::Gemini, &Secret::new("g-1"))
            .await
            .unwrap();
        assert!(!store.has_secret(Provider::Gemini).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_stored_and_clear() {
        let (store, backend) = store();
        store
            .mark_stored(Provider::Anthropic, StorageMethod::Plain)
            .await
            .unwrap();

        assert!(store.has_secret(Provider::Anthropic).await.unwrap());
        assert_eq!(
            store.preference(Provider::Anthropic).await.unwrap(),
            Some(StorageMethod::Plain)
        );

        store.clear_metadata(Provider::Anthropic).await.unwrap();
        assert!(!store.has_secret(Provider::Anthropic).await.unwrap());
        assert!(store.preference(Provider::Anthropic).await.unwrap().is_none());
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_preference_is_ignored() {
        let (store, backend) = store();
        backend
            .set(
                &method_key(Provider::OpenAi),
                PreferenceValue::Text("cloud".to_string()),
            )
            .await
            .unwrap();

        assert!(store.preference(Provider::OpenAi).await.unwrap().is_none());
    }
}
