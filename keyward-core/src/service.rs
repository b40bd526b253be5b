//! The assembled engine.
//!
//! [`Keyward`] wires one [`SecureStore`] and one [`PlainStore`] into the
//! manager, migration coordinator and consistency validator. Construct it
//! once and share it for the lifetime of the process; the components it
//! hands out share the same stores, cache and in-flight registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::consistency::{ConsistencyOutcome, ConsistencyValidator};
use crate::error::CredentialError;
use crate::manager::CredentialManager;
use crate::migration::MigrationCoordinator;
use crate::model::{CredentialStatus, Provider, StorageMethod};
use crate::plain_store::PlainStore;
use crate::secure_store::SecureStore;
use crate::store::{PreferenceStore, Secret, SecureCredentialStore};

#[derive(Debug, Clone)]
pub struct Keyward {
    secure: Arc<SecureStore>,
    manager: CredentialManager,
    migrator: MigrationCoordinator,
    validator: ConsistencyValidator,
}

impl Keyward {
    pub fn new(
        secure_backend: Arc<dyn SecureCredentialStore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let secure = Arc::new(SecureStore::new(secure_backend));
        let plain = Arc::new(PlainStore::new(preferences));
        Self {
            manager: CredentialManager::new(secure.clone(), plain.clone()),
            migrator: MigrationCoordinator::new(secure.clone(), plain.clone()),
            validator: ConsistencyValidator::new(secure.clone(), plain),
            secure,
        }
    }

    /// Backend assumed for providers with no recorded preference.
    pub fn with_default_method(mut self, method: StorageMethod) -> Self {
        self.manager = self.manager.with_default_method(method);
        self.migrator = self.migrator.with_default_method(method);
        self
    }

    pub fn manager(&self) -> &CredentialManager {
        &self.manager
    }

    pub fn migrator(&self) -> &MigrationCoordinator {
        &self.migrator
    }

    pub fn validator(&self) -> &ConsistencyValidator {
        &self.validator
    }

    pub fn secure_store(&self) -> &Arc<SecureStore> {
        &self.secure
    }

    pub async fn save(
        &self,
        secret: Secret,
        provider: Provider,
        method: StorageMethod,
    ) -> Result<(), CredentialError> {
        self.manager.save(secret, provider, method).await
    }

    pub async fn load(&self, provider: Provider) -> Result<Secret, CredentialError> {
        self.manager.load(provider).await
    }

    pub async fn remove(&self, provider: Provider) -> Result<(), CredentialError> {
        self.manager.remove(provider).await
    }

    pub async fn exists(&self, provider: Provider) -> bool {
        self.manager.exists(provider).await
    }

    pub async fn status(&self, provider: Provider) -> Result<CredentialStatus, CredentialError> {
        self.manager.status(provider).await
    }

    pub async fn migrate(&self, provider: Provider, to: StorageMethod) -> Result<(), CredentialError> {
        self.migrator.migrate(provider, to).await
    }

    pub async fn migrate_all(
        &self,
        to: StorageMethod,
    ) -> BTreeMap<Provider, Result<(), CredentialError>> {
        self.migrator.migrate_all(to).await
    }

    pub async fn validate(&self, provider: Provider) -> ConsistencyOutcome {
        self.validator.validate(provider).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryPreferenceStore, MemorySecureStore};

    fn keyward() -> Keyward {
        Keyward::new(
            Arc::new(MemorySecureStore::new()),
            Arc::new(MemoryPreferenceStore::new()),
        )
    }

    #[tokio::test]
    async fn test_components_share_stores() {
        let keyward = keyward();
        keyward
            .save(Secret::new("sk-shared"), Provider::OpenAi, StorageMethod::Secure)
            .await
            .unwrap();

        keyward
            .migrate(Provider::OpenAi, StorageMethod::Plain)
            .await
            .unwrap();

        assert_eq!(keyward.load(Provider::OpenAi).await.unwrap().expose(), "sk-shared");
        assert!(keyward.secure_store().load(Provider::OpenAi).await.unwrap().is_none());
        assert_eq!(
            keyward.validate(Provider::OpenAi).await,
            ConsistencyOutcome::NoIssues
        );
    }

    #[tokio::test]
    async fn test_default_method_applies_to_components() {
        let keyward = keyward().with_default_method(StorageMethod::Plain);
        assert_eq!(keyward.manager().default_method(), StorageMethod::Plain);

        let result = keyward.load(Provider::Gemini).await;
        assert!(matches!(
            result,
            Err(CredentialError::NotFound {
                method: StorageMethod::Plain,
                ..
            })
        ));
    }
}
