//! Method-addressed access to the two stores.
//!
//! [`Backends`] is shared by the manager, the migration coordinator and the
//! consistency validator so that each of them addresses a store by
//! [`StorageMethod`] and receives errors already translated into
//! [`CredentialError`].

use std::sync::Arc;

use crate::error::CredentialError;
use crate::model::{Provider, StorageMethod};
use crate::plain_store::PlainStore;
use crate::secure_store::SecureStore;
use crate::store::Secret;

#[derive(Debug, Clone)]
pub(crate) struct Backends {
    pub secure: Arc<SecureStore>,
    pub plain: Arc<PlainStore>,
}

impl Backends {
    pub fn new(secure: Arc<SecureStore>, plain: Arc<PlainStore>) -> Self {
        Self { secure, plain }
    }

    /// Read through the normal path (the secure cache for `Secure`).
    pub async fn read(
        &self,
        method: StorageMethod,
        provider: Provider,
    ) -> Result<Option<Secret>, CredentialError> {
        let secret = match method {
            StorageMethod::Secure => {
                let secret = self.secure.load(provider).await?;
                self.record_imported().await;
                secret
            }
            StorageMethod::Plain => self.plain.load_secret(provider).await?,
        };
        Ok(secret)
    }

    /// Read straight from the persisted data, bypassing any cache.
    pub async fn read_back(
        &self,
        method: StorageMethod,
        provider: Provider,
    ) -> Result<Option<Secret>, CredentialError> {
        let secret = match method {
            StorageMethod::Secure => self.secure.read_back(provider).await?,
            StorageMethod::Plain => self.plain.load_secret(provider).await?,
        };
        Ok(secret)
    }

    pub async fn write(
        &self,
        method: StorageMethod,
        provider: Provider,
        secret: &Secret,
    ) -> Result<(), CredentialError> {
        match method {
            StorageMethod::Secure => {
                self.secure.save(provider, secret).await?;
                self.record_imported().await;
            }
            StorageMethod::Plain => self.plain.save_secret(provider, secret).await?,
        }
        Ok(())
    }

    /// Delete one copy. Absence is a successful no-op.
    pub async fn delete(
        &self,
        method: StorageMethod,
        provider: Provider,
    ) -> Result<(), CredentialError> {
        match method {
            StorageMethod::Secure => {
                self.secure.remove(provider).await?;
                self.record_imported().await;
            }
            StorageMethod::Plain => self.plain.remove_secret(provider).await?,
        }
        Ok(())
    }

    /// The recorded preference, or `default` when none is recorded.
    pub async fn preference_or(
        &self,
        provider: Provider,
        default: StorageMethod,
    ) -> Result<StorageMethod, CredentialError> {
        Ok(self.plain.preference(provider).await?.unwrap_or(default))
    }

    /// Whether a failure to clean the secure copy can be ignored.
    ///
    /// Only when no secure backend exists at all, so no secure copy can
    /// exist either, and none is recorded. A refusal or a failing keyring
    /// leaves the secure copy's absence unconfirmed.
    pub async fn secure_cleanup_tolerated(
        &self,
        recorded: Option<StorageMethod>,
        error: &CredentialError,
    ) -> bool {
        recorded != Some(StorageMethod::Secure)
            && matches!(error, CredentialError::BackendUnavailable { .. })
            && !self.secure.has_backend().await
    }

    /// Give secrets imported from legacy records a flag and a `Secure`
    /// preference, unless a preference is already recorded.
    async fn record_imported(&self) {
        for provider in self.secure.take_imported().await {
            let result = match self.plain.preference(provider).await {
                Ok(Some(_)) => Ok(()),
                Ok(None) => self.plain.mark_stored(provider, StorageMethod::Secure).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => tracing::debug!("Recorded imported {} secret", provider),
                Err(e) => tracing::warn!("Could not record imported {} secret: {}", provider, e),
            }
        }
    }
}
