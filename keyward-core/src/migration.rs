//! Verified relocation of a secret between backends.
//!
//! A migration walks a fixed sequence of steps:
//!
//! ```text
//! Idle -> ReadSource -> WriteTarget -> VerifyTarget -> DeleteSource -> Done
//! ```
//!
//! Any failure before the target copy is verified ends in `Failed` with the
//! source untouched and the target copy rolled back. The destructive step
//! only runs once the target copy has been read back from storage and
//! compared byte-for-byte with the source value. From then on the target is
//! authoritative: a source copy that cannot be deleted is left as a
//! duplicate for [`ConsistencyValidator`](crate::ConsistencyValidator).
//!
//! At most one migration per provider runs at a time; a concurrent request
//! for the same provider fails fast with [`CredentialError::MigrationBusy`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::audit;
use crate::backend::Backends;
use crate::error::CredentialError;
use crate::model::{Provider, StorageMethod};
use crate::plain_store::PlainStore;
use crate::secure_store::SecureStore;
use crate::store::Secret;

/// Step a migration is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    Idle,
    ReadSource,
    WriteTarget,
    VerifyTarget,
    DeleteSource,
    Done,
    Failed,
}

/// Record of one in-flight migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOperation {
    pub id: Uuid,
    pub provider: Provider,
    pub from: StorageMethod,
    pub to: StorageMethod,
    pub step: MigrationStep,
    pub started_at: DateTime<Utc>,
}

impl MigrationOperation {
    fn new(provider: Provider, to: StorageMethod) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            from: to.other(),
            to,
            step: MigrationStep::Idle,
            started_at: Utc::now(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<Provider, MigrationOperation>>>;

/// Registry slot held for the duration of one migration.
///
/// Dropping the guard frees the slot, including on early returns.
struct InFlightGuard {
    registry: Registry,
    provider: Provider,
    id: Uuid,
}

impl InFlightGuard {
    fn acquire(registry: &Registry, operation: MigrationOperation) -> Option<Self> {
        let mut in_flight = registry.lock();
        if in_flight.contains_key(&operation.provider) {
            return None;
        }
        let guard = Self {
            registry: registry.clone(),
            provider: operation.provider,
            id: operation.id,
        };
        in_flight.insert(operation.provider, operation);
        Some(guard)
    }

    fn advance(&self, step: MigrationStep) {
        if let Some(operation) = self.registry.lock().get_mut(&self.provider) {
            tracing::debug!(
                "Migration {} for {}: {:?} -> {:?}",
                self.id,
                self.provider,
                operation.step,
                step
            );
            operation.step = step;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.provider);
    }
}

/// Moves secrets between the secure and plain backends.
#[derive(Debug, Clone)]
pub struct MigrationCoordinator {
    backends: Backends,
    default_method: StorageMethod,
    in_flight: Registry,
}

impl MigrationCoordinator {
    pub fn new(secure: Arc<SecureStore>, plain: Arc<PlainStore>) -> Self {
        Self {
            backends: Backends::new(secure, plain),
            default_method: StorageMethod::default(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Backend assumed for providers with no recorded preference.
    pub fn with_default_method(mut self, method: StorageMethod) -> Self {
        self.default_method = method;
        self
    }

    /// Snapshot of the migration currently running for `provider`, if any.
    pub fn in_flight(&self, provider: Provider) -> Option<MigrationOperation> {
        self.in_flight.lock().get(&provider).cloned()
    }

    /// Move `provider`'s secret to the `to` backend.
    ///
    /// Succeeds without doing anything when `to` is already the recorded
    /// backend. Fails with [`CredentialError::MigrationBusy`] while another
    /// migration for the same provider is running.
    pub async fn migrate(&self, provider: Provider, to: StorageMethod) -> Result<(), CredentialError> {
        let result = self.migrate_inner(provider, to).await;
        audit::record("migrate", provider, to, &result);
        result
    }

    /// Migrate every provider that has a stored secret.
    ///
    /// Each provider is migrated independently; one failure does not undo
    /// the others. Providers without a secret are reported as `Ok(())`.
    pub async fn migrate_all(
        &self,
        to: StorageMethod,
    ) -> BTreeMap<Provider, Result<(), CredentialError>> {
        let mut results = BTreeMap::new();
        for provider in Provider::ALL {
            let has_secret = match self.has_secret(provider, to.other()).await {
                Ok(has_secret) => has_secret,
                Err(e) => {
                    results.insert(provider, Err(e));
                    continue;
                }
            };

            let result = if has_secret {
                self.migrate(provider, to).await
            } else {
                tracing::debug!("Skipping {}: nothing stored", provider);
                Ok(())
            };
            results.insert(provider, result);
        }

        let failed = results.values().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!("Migration to {} storage failed for {} providers", to, failed);
        } else {
            tracing::info!("All providers migrated to {} storage", to);
        }
        results
    }

    /// Whether `provider` has a secret to migrate.
    ///
    /// The existence flag answers when set. Otherwise the source backend is
    /// asked, and a secret found there without metadata gets it recorded.
    async fn has_secret(
        &self,
        provider: Provider,
        from: StorageMethod,
    ) -> Result<bool, CredentialError> {
        if self.backends.plain.has_secret(provider).await? {
            return Ok(true);
        }

        let found = match self.backends.read(from, provider).await {
            Ok(found) => found.is_some(),
            Err(e)
                if from == StorageMethod::Secure
                    && self.backends.secure_cleanup_tolerated(None, &e).await =>
            {
                false
            }
            Err(e) => return Err(e),
        };
        if !found {
            return Ok(false);
        }

        if self.backends.plain.has_secret(provider).await? {
            return Ok(true);
        }
        tracing::info!("Found unrecorded {} secret in {} storage", provider, from);
        self.backends.plain.mark_stored(provider, from).await?;
        Ok(true)
    }

    async fn migrate_inner(
        &self,
        provider: Provider,
        to: StorageMethod,
    ) -> Result<(), CredentialError> {
        let operation = MigrationOperation::new(provider, to);
        let from = operation.from;
        let guard = InFlightGuard::acquire(&self.in_flight, operation)
            .ok_or(CredentialError::MigrationBusy { provider })?;

        let current = self
            .backends
            .preference_or(provider, self.default_method)
            .await?;
        if current == to {
            tracing::debug!("{} already uses {} storage", provider, to);
            guard.advance(MigrationStep::Done);
            return Ok(());
        }

        let result = self.run_steps(&guard, provider, from, to).await;
        match &result {
            Ok(()) => {
                guard.advance(MigrationStep::Done);
                tracing::info!("Migrated {} from {} to {} storage", provider, from, to);
            }
            Err(e) => {
                guard.advance(MigrationStep::Failed);
                tracing::warn!(
                    "Migration of {} from {} to {} failed: {}",
                    provider,
                    from,
                    to,
                    e
                );
            }
        }
        result
    }

    async fn run_steps(
        &self,
        guard: &InFlightGuard,
        provider: Provider,
        from: StorageMethod,
        to: StorageMethod,
    ) -> Result<(), CredentialError> {
        guard.advance(MigrationStep::ReadSource);
        let secret = self
            .backends
            .read(from, provider)
            .await?
            .ok_or(CredentialError::NotFound {
                provider,
                method: from,
            })?;

        guard.advance(MigrationStep::WriteTarget);
        self.backends.write(to, provider, &secret).await?;

        guard.advance(MigrationStep::VerifyTarget);
        if let Err(e) = self.verify_target(provider, to, &secret).await {
            self.rollback_target(provider, to).await;
            return Err(e);
        }

        guard.advance(MigrationStep::DeleteSource);
        if let Err(e) = self.backends.plain.mark_stored(provider, to).await {
            self.rollback_target(provider, to).await;
            return Err(e.into());
        }
        if let Err(e) = self.backends.delete(from, provider).await {
            // The verified target copy stays authoritative. Whatever is left
            // in the source is an identical duplicate.
            tracing::warn!(
                "{} copy of {} may remain after moving it to {} storage: {}",
                from,
                provider,
                to,
                e
            );
            return Err(e);
        }

        Ok(())
    }

    async fn verify_target(
        &self,
        provider: Provider,
        to: StorageMethod,
        expected: &Secret,
    ) -> Result<(), CredentialError> {
        match self.backends.read_back(to, provider).await? {
            Some(actual) if actual == *expected => Ok(()),
            Some(actual) => {
                tracing::warn!(
                    "Read-back mismatch for {} in {} storage ({} != {})",
                    provider,
                    to,
                    actual.masked(),
                    expected.masked()
                );
                Err(CredentialError::MigrationVerificationFailed { provider, target: to })
            }
            None => {
                tracing::warn!("Read-back found no {} secret in {} storage", provider, to);
                Err(CredentialError::MigrationVerificationFailed { provider, target: to })
            }
        }
    }

    async fn rollback_target(&self, provider: Provider, to: StorageMethod) {
        if let Err(e) = self.backends.delete(to, provider).await {
            tracing::warn!(
                "Could not roll back {} copy of {}: {}",
                to,
                provider,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryPreferenceStore, MemorySecureStore};
    use std::time::Duration;

    struct Fixture {
        coordinator: MigrationCoordinator,
        secure: Arc<SecureStore>,
        plain: Arc<PlainStore>,
        secure_backend: Arc<MemorySecureStore>,
    }

    fn fixture() -> Fixture {
        let secure_backend = Arc::new(MemorySecureStore::new());
        let secure = Arc::new(SecureStore::new(secure_backend.clone()));
        let plain = Arc::new(PlainStore::new(Arc::new(MemoryPreferenceStore::new())));
        Fixture {
            coordinator: MigrationCoordinator::new(secure.clone(), plain.clone()),
            secure,
            plain,
            secure_backend,
        }
    }

    async fn seed(f: &Fixture, provider: Provider, value: &str, method: StorageMethod) {
        let secret = Secret::new(value);
        match method {
            StorageMethod::Secure => f.secure.save(provider, &secret).await.unwrap(),
            StorageMethod::Plain => f.plain.save_secret(provider, &secret).await.unwrap(),
        }
        f.plain.mark_stored(provider, method).await.unwrap();
    }

    #[tokio::test]
    async fn test_migrate_secure_to_plain() {
        let f = fixture();
        seed(&f, Provider::OpenAi, "sk-abc123", StorageMethod::Secure).await;

        f.coordinator
            .migrate(Provider::OpenAi, StorageMethod::Plain)
            .await
            .unwrap();

        assert!(f.secure.load(Provider::OpenAi).await.unwrap().is_none());
        assert_eq!(
            f.plain.load_secret(Provider::OpenAi).await.unwrap().unwrap().expose(),
            "sk-abc123"
        );
        assert_eq!(
            f.plain.preference(Provider::OpenAi).await.unwrap(),
            Some(StorageMethod::Plain)
        );
        assert!(f.coordinator.in_flight(Provider::OpenAi).is_none());
    }

    #[tokio::test]
    async fn test_migrate_to_current_method_is_noop() {
        let f = fixture();
        seed(&f, Provider::Gemini, "g-1", StorageMethod::Plain).await;
        let saves = f.secure_backend.save_count();

        f.coordinator
            .migrate(Provider::Gemini, StorageMethod::Plain)
            .await
            .unwrap();

        assert_eq!(f.secure_backend.save_count(), saves);
    }

    #[tokio::test]
    async fn test_migrate_missing_secret_fails_without_changes() {
        let f = fixture();
        f.plain
            .set_preference(Provider::Anthropic, StorageMethod::Secure)
            .await
            .unwrap();

        let result = f
            .coordinator
            .migrate(Provider::Anthropic, StorageMethod::Plain)
            .await;

        assert!(matches!(
            result,
            Err(CredentialError::NotFound {
                method: StorageMethod::Secure,
                ..
            })
        ));
        assert_eq!(
            f.plain.preference(Provider::Anthropic).await.unwrap(),
            Some(StorageMethod::Secure)
        );
    }

    #[tokio::test]
    async fn test_inaccessible_target_fails_cleanly() {
        let f = fixture();
        seed(&f, Provider::OpenAi, "sk-1", StorageMethod::Plain).await;
        f.secure_backend.set_deny_access(true);

        let result = f
            .coordinator
            .migrate(Provider::OpenAi, StorageMethod::Secure)
            .await;

        assert!(matches!(result, Err(CredentialError::AccessDenied { .. })));
        assert_eq!(
            f.plain.load_secret(Provider::OpenAi).await.unwrap().unwrap().expose(),
            "sk-1"
        );
    }

    #[tokio::test]
    async fn test_verification_failure_keeps_source() {
        let f = fixture();
        seed(&f, Provider::OpenAi, "sk-1", StorageMethod::Plain).await;
        f.secure_backend.set_drop_saves(true);

        let result = f
            .coordinator
            .migrate(Provider::OpenAi, StorageMethod::Secure)
            .await;

        assert!(matches!(
            result,
            Err(CredentialError::MigrationVerificationFailed {
                target: StorageMethod::Secure,
                ..
            })
        ));
        assert_eq!(
            f.plain.load_secret(Provider::OpenAi).await.unwrap().unwrap().expose(),
            "sk-1"
        );
        assert_eq!(
            f.plain.preference(Provider::OpenAi).await.unwrap(),
            Some(StorageMethod::Plain)
        );
        assert!(f.secure.load(Provider::OpenAi).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_source_delete_keeps_verified_target() {
        let f = fixture();
        seed(&f, Provider::Anthropic, "sk-ant-1", StorageMethod::Secure).await;
        f.secure_backend.set_fail_saves(true);

        let result = f
            .coordinator
            .migrate(Provider::Anthropic, StorageMethod::Plain)
            .await;

        assert!(matches!(
            result,
            Err(CredentialError::BackendUnavailable { .. })
        ));
        assert_eq!(
            f.plain.load_secret(Provider::Anthropic).await.unwrap().unwrap().expose(),
            "sk-ant-1"
        );
        assert_eq!(
            f.plain.preference(Provider::Anthropic).await.unwrap(),
            Some(StorageMethod::Plain)
        );
        assert_eq!(
            f.secure.load(Provider::Anthropic).await.unwrap().unwrap().expose(),
            "sk-ant-1"
        );
        assert!(f.coordinator.in_flight(Provider::Anthropic).is_none());
    }

    #[tokio::test]
    async fn test_migrate_all_finds_unrecorded_secure_secret() {
        let f = fixture();
        seed(&f, Provider::OpenAi, "sk-unrecorded", StorageMethod::Secure).await;
        assert!(!f.plain.has_secret(Provider::OpenAi).await.unwrap());

        let results = f.coordinator.migrate_all(StorageMethod::Plain).await;

        assert!(results.values().all(|r| r.is_ok()));
        assert_eq!(
            f.plain.load_secret(Provider::OpenAi).await.unwrap().unwrap().expose(),
            "sk-unrecorded"
        );
        assert_eq!(
            f.plain.preference(Provider::OpenAi).await.unwrap(),
            Some(StorageMethod::Plain)
        );
        assert!(f.plain.has_secret(Provider::OpenAi).await.unwrap());
        assert!(f.secure.load(Provider::OpenAi).await.unwrap().is_none());
        assert!(!f.plain.has_secret(Provider::Gemini).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_migration_is_rejected() {
        let f = fixture();
        seed(&f, Provider::OpenAi, "sk-1", StorageMethod::Plain).await;
        f.secure_backend.set_latency(Duration::from_millis(50));

        let coordinator = Arc::new(f.coordinator.clone());
        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .migrate(Provider::OpenAi, StorageMethod::Secure)
                    .await
            })
        };

        while coordinator.in_flight(Provider::OpenAi).is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = coordinator
            .migrate(Provider::OpenAi, StorageMethod::Secure)
            .await;
        assert!(matches!(
            second,
            Err(CredentialError::MigrationBusy {
                provider: Provider::OpenAi
            })
        ));

        first.await.unwrap().unwrap();
        assert_eq!(
            f.secure.load(Provider::OpenAi).await.unwrap().unwrap().expose(),
            "sk-1"
        );
        assert!(coordinator.in_flight(Provider::OpenAi).is_none());
    }

    #[tokio::test]
    async fn test_in_flight_reports_step() {
        let f = fixture();
        seed(&f, Provider::Gemini, "g-1", StorageMethod::Plain).await;
        f.secure_backend.set_latency(Duration::from_millis(50));

        let coordinator = Arc::new(f.coordinator.clone());
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .migrate(Provider::Gemini, StorageMethod::Secure)
                    .await
            })
        };

        let operation = loop {
            if let Some(op) = coordinator.in_flight(Provider::Gemini) {
                break op;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        assert_eq!(operation.from, StorageMethod::Plain);
        assert_eq!(operation.to, StorageMethod::Secure);
        assert_ne!(operation.step, MigrationStep::Done);

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_different_providers_migrate_concurrently() {
        let f = fixture();
        seed(&f, Provider::OpenAi, "sk-1", StorageMethod::Secure).await;
        seed(&f, Provider::Gemini, "g-1", StorageMethod::Secure).await;

        let (a, b) = tokio::join!(
            f.coordinator.migrate(Provider::OpenAi, StorageMethod::Plain),
            f.coordinator.migrate(Provider::Gemini, StorageMethod::Plain),
        );
        a.unwrap();
        b.unwrap();

        assert!(f.secure.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migrate_all_reports_per_provider() {
        let f = fixture();
        seed(&f, Provider::OpenAi, "sk-1", StorageMethod::Plain).await;
        seed(&f, Provider::Anthropic, "sk-ant-1", StorageMethod::Plain).await;

        // Fail the secure write for the second provider only.
        let results = {
            let first = f
                .coordinator
                .migrate(Provider::OpenAi, StorageMethod::Secure)
                .await;
            first.unwrap();
            f.secure_backend.set_fail_saves(true);
            f.coordinator.migrate_all(StorageMethod::Secure).await
        };

        assert!(results[&Provider::OpenAi].is_ok());
        assert!(results[&Provider::Anthropic].is_err());
        assert!(results[&Provider::Gemini].is_ok());

        assert_eq!(
            f.secure.load(Provider::OpenAi).await.unwrap().unwrap().expose(),
            "sk-1"
        );
        assert_eq!(
            f.plain.load_secret(Provider::Anthropic).await.unwrap().unwrap().expose(),
            "sk-ant-1"
        );
    }
}
