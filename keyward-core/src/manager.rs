//! The save/load/remove facade.
//!
//! [`CredentialManager`] keeps every provider's secret in exactly one
//! backend: the one recorded as its storage preference. Loads never fall
//! back to the other backend, since the backend choice is a security
//! decision made by the user.

use std::sync::Arc;

use crate::audit::{self, Backend};
use crate::backend::Backends;
use crate::error::CredentialError;
use crate::model::{CredentialStatus, Provider, StorageMethod};
use crate::plain_store::PlainStore;
use crate::secure_store::{AccessState, SecureStore};
use crate::store::Secret;

/// Public entry point for storing, reading and deleting secrets.
#[derive(Debug, Clone)]
pub struct CredentialManager {
    backends: Backends,
    default_method: StorageMethod,
}

impl CredentialManager {
    pub fn new(secure: Arc<SecureStore>, plain: Arc<PlainStore>) -> Self {
        Self {
            backends: Backends::new(secure, plain),
            default_method: StorageMethod::default(),
        }
    }

    /// Backend assumed for providers with no recorded preference.
    pub fn with_default_method(mut self, method: StorageMethod) -> Self {
        self.default_method = method;
        self
    }

    pub fn default_method(&self) -> StorageMethod {
        self.default_method
    }

    /// Store `secret` for `provider` in the backend chosen by `method`.
    ///
    /// The copy held by the other backend is removed, so on success the
    /// secret lives in exactly one place. Preference and existence flag are
    /// only written once the secret itself is persisted; a failed write
    /// leaves all previous state untouched.
    pub async fn save(
        &self,
        secret: Secret,
        provider: Provider,
        method: StorageMethod,
    ) -> Result<(), CredentialError> {
        let result = self.save_inner(&secret, provider, method).await;
        audit::record("save", provider, method, &result);
        result
    }

    async fn save_inner(
        &self,
        secret: &Secret,
        provider: Provider,
        method: StorageMethod,
    ) -> Result<(), CredentialError> {
        if secret.is_blank() {
            return Err(CredentialError::Validation {
                provider,
                message: "secret must not be empty".to_string(),
            });
        }

        // A recorded denial is re-checked here; the user may have unlocked
        // the device since.
        if method == StorageMethod::Secure && !self.backends.secure.retry_access().await {
            return Err(self.secure_unavailable_error().await);
        }

        let previous = self.backends.plain.preference(provider).await?;

        if previous == Some(method) {
            // The other backend holds no authoritative copy, so it is cleared
            // before anything is overwritten.
            self.clear_other_backend(provider, method, previous).await?;
            self.backends.write(method, provider, secret).await?;
        } else {
            self.backends.write(method, provider, secret).await?;
            if let Err(e) = self.clear_other_backend(provider, method, previous).await {
                // The other backend may still hold the authoritative copy.
                if let Err(rollback) = self.backends.delete(method, provider).await {
                    tracing::warn!(
                        "Rollback of {} write for {} failed: {}",
                        method,
                        provider,
                        rollback
                    );
                }
                return Err(e);
            }
        }

        self.backends.plain.mark_stored(provider, method).await?;

        tracing::debug!(
            "Stored {} secret ({}) in {} storage",
            provider,
            secret.masked(),
            method
        );
        Ok(())
    }

    /// Remove the copy held by the backend that is not `method`.
    async fn clear_other_backend(
        &self,
        provider: Provider,
        method: StorageMethod,
        previous: Option<StorageMethod>,
    ) -> Result<(), CredentialError> {
        let other = method.other();
        match self.backends.delete(other, provider).await {
            Err(e)
                if other == StorageMethod::Secure
                    && self.backends.secure_cleanup_tolerated(previous, &e).await =>
            {
                tracing::warn!("Skipping secure cleanup for {}: {}", provider, e);
                Ok(())
            }
            result => result,
        }
    }

    async fn secure_unavailable_error(&self) -> CredentialError {
        match self.backends.secure.access_state().await {
            AccessState::Denied => CredentialError::AccessDenied {
                message: "secure storage refused access".to_string(),
            },
            _ => CredentialError::BackendUnavailable {
                message: "secure storage is not available".to_string(),
            },
        }
    }

    /// Read the secret from the provider's preferred backend only.
    pub async fn load(&self, provider: Provider) -> Result<Secret, CredentialError> {
        let method = self
            .backends
            .preference_or(provider, self.default_method)
            .await?;
        self.load_from(provider, method).await
    }

    /// Query one specific backend, regardless of the recorded preference.
    pub async fn load_from(
        &self,
        provider: Provider,
        method: StorageMethod,
    ) -> Result<Secret, CredentialError> {
        self.backends
            .read(method, provider)
            .await?
            .ok_or(CredentialError::NotFound { provider, method })
    }

    /// Remove the secret from both backends and clear its metadata.
    ///
    /// Absence in either backend counts as success. When a backend fails,
    /// the other is still cleaned, the metadata is still cleared, and one
    /// error naming every failing backend is returned.
    pub async fn remove(&self, provider: Provider) -> Result<(), CredentialError> {
        let result = self.remove_inner(provider).await;
        audit::record("remove", provider, Backend::Both, &result);
        result
    }

    async fn remove_inner(&self, provider: Provider) -> Result<(), CredentialError> {
        let recorded = self.backends.plain.preference(provider).await.unwrap_or(None);

        let secure = match self.backends.delete(StorageMethod::Secure, provider).await {
            Err(e) if self.backends.secure_cleanup_tolerated(recorded, &e).await => {
                tracing::warn!(
                    "No secure storage while removing {}: {}",
                    provider,
                    e
                );
                Ok(())
            }
            result => result,
        };
        let plain = self.backends.delete(StorageMethod::Plain, provider).await;
        let metadata = self
            .backends
            .plain
            .clear_metadata(provider)
            .await
            .map_err(CredentialError::from);

        let mut failures: Vec<(&str, CredentialError)> = [
            ("secure", secure),
            ("plain", plain),
            ("metadata", metadata),
        ]
        .into_iter()
        .filter_map(|(label, result)| result.err().map(|e| (label, e)))
        .collect();

        if failures.len() <= 1 {
            return match failures.pop() {
                Some((_, error)) => Err(error),
                None => Ok(()),
            };
        }

        let denied = failures
            .iter()
            .all(|(_, e)| matches!(e, CredentialError::AccessDenied { .. }));
        let message = failures
            .iter()
            .map(|(label, e)| format!("{}: {}", label, e))
            .collect::<Vec<_>>()
            .join("; ");
        if denied {
            Err(CredentialError::AccessDenied { message })
        } else {
            Err(CredentialError::BackendUnavailable { message })
        }
    }

    /// Whether a secret is recorded for `provider`.
    ///
    /// Reads only the existence flag; never prompts.
    pub async fn exists(&self, provider: Provider) -> bool {
        match self.backends.plain.has_secret(provider).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("Could not read existence flag for {}: {}", provider, e);
                false
            }
        }
    }

    /// Prompt-free summary of the provider's credential.
    pub async fn status(&self, provider: Provider) -> Result<CredentialStatus, CredentialError> {
        let exists = self.backends.plain.has_secret(provider).await?;
        let method = self.backends.plain.preference(provider).await?;
        Ok(CredentialStatus {
            provider,
            exists,
            method,
        })
    }
}
