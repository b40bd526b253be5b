//! Detection and repair of secrets held by both backends.
//!
//! A secret can end up in both backends after a crash between migration
//! steps or through data left by older versions. Identical copies are
//! repaired automatically (the plain copy goes); differing copies are left
//! alone and reported so the user can choose.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::audit;
use crate::backend::Backends;
use crate::error::CredentialError;
use crate::model::{Provider, StorageMethod};
use crate::plain_store::PlainStore;
use crate::secure_store::SecureStore;

/// Result of checking one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyOutcome {
    /// At most one backend holds the secret.
    NoIssues,
    /// Both held identical copies; the plain copy was removed.
    FixedDuplicate,
    /// Both hold different values; nothing was changed.
    NeedsUserChoice,
    /// One backend could not be read, so nothing can be claimed.
    Unverifiable,
}

impl ConsistencyOutcome {
    /// Map a conflict to [`CredentialError::ConsistencyConflict`].
    pub fn to_error(self, provider: Provider) -> Option<CredentialError> {
        match self {
            Self::NeedsUserChoice => Some(CredentialError::ConsistencyConflict { provider }),
            _ => None,
        }
    }
}

/// Checks and repairs the "exactly one location" invariant.
#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    backends: Backends,
}

impl ConsistencyValidator {
    pub fn new(secure: Arc<SecureStore>, plain: Arc<PlainStore>) -> Self {
        Self {
            backends: Backends::new(secure, plain),
        }
    }

    /// Check one provider and repair what can be repaired safely.
    ///
    /// When only one backend holds the secret, missing or stale metadata is
    /// realigned with it; this never deletes anything.
    pub async fn validate(&self, provider: Provider) -> ConsistencyOutcome {
        let secure = self.backends.read(StorageMethod::Secure, provider).await;
        let plain = self.backends.read(StorageMethod::Plain, provider).await;

        let (secure, plain) = match (secure, plain) {
            (Ok(secure), Ok(plain)) => (secure, plain),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Cannot check {} for duplicates: {}", provider, e);
                return ConsistencyOutcome::Unverifiable;
            }
        };

        match (secure, plain) {
            (Some(secure), Some(plain)) if secure == plain => self.fix_duplicate(provider).await,
            (Some(_), Some(_)) => {
                tracing::warn!(
                    "{} has different secrets in secure and plain storage",
                    provider
                );
                ConsistencyOutcome::NeedsUserChoice
            }
            (Some(_), None) => {
                self.align_metadata(provider, StorageMethod::Secure).await;
                ConsistencyOutcome::NoIssues
            }
            (None, Some(_)) => {
                self.align_metadata(provider, StorageMethod::Plain).await;
                ConsistencyOutcome::NoIssues
            }
            (None, None) => ConsistencyOutcome::NoIssues,
        }
    }

    /// Check every known provider.
    pub async fn validate_all(&self) -> BTreeMap<Provider, ConsistencyOutcome> {
        let mut outcomes = BTreeMap::new();
        for provider in Provider::ALL {
            outcomes.insert(provider, self.validate(provider).await);
        }
        outcomes
    }

    /// Settle a conflict by keeping the copy in `keep` and deleting the other.
    pub async fn resolve_conflict(
        &self,
        provider: Provider,
        keep: StorageMethod,
    ) -> Result<(), CredentialError> {
        let result = self.resolve_inner(provider, keep).await;
        audit::record("resolve_conflict", provider, keep, &result);
        result
    }

    async fn resolve_inner(
        &self,
        provider: Provider,
        keep: StorageMethod,
    ) -> Result<(), CredentialError> {
        self.backends
            .read(keep, provider)
            .await?
            .ok_or(CredentialError::NotFound {
                provider,
                method: keep,
            })?;

        self.backends.delete(keep.other(), provider).await?;
        self.backends.plain.mark_stored(provider, keep).await?;
        tracing::info!("Resolved {} conflict in favour of {} storage", provider, keep);
        Ok(())
    }

    async fn fix_duplicate(&self, provider: Provider) -> ConsistencyOutcome {
        let result = async {
            self.backends.delete(StorageMethod::Plain, provider).await?;
            self.backends
                .plain
                .mark_stored(provider, StorageMethod::Secure)
                .await?;
            Ok::<(), CredentialError>(())
        }
        .await;
        audit::record("fix_duplicate", provider, StorageMethod::Plain, &result);

        match result {
            Ok(()) => {
                tracing::info!("Removed duplicate plain copy of {}", provider);
                ConsistencyOutcome::FixedDuplicate
            }
            Err(e) => {
                tracing::warn!("Could not remove duplicate plain copy of {}: {}", provider, e);
                ConsistencyOutcome::Unverifiable
            }
        }
    }

    async fn align_metadata(&self, provider: Provider, holder: StorageMethod) {
        let exists = self.backends.plain.has_secret(provider).await.unwrap_or(false);
        let recorded = self.backends.plain.preference(provider).await.unwrap_or(None);
        if exists && recorded == Some(holder) {
            return;
        }

        tracing::info!(
            "Recording {} storage for {} (was {:?}, flag {})",
            holder,
            provider,
            recorded,
            exists
        );
        if let Err(e) = self.backends.plain.mark_stored(provider, holder).await {
            tracing::warn!("Could not update metadata for {}: {}", provider, e);
        }
    }
}
