//! Top-level error types for Keyward.
//!
//! Every public operation returns [`CredentialError`]. Backend errors
//! ([`StoreError`], keyring and I/O failures) are translated into this
//! taxonomy at the component boundary, so callers never match on
//! platform-specific codes.

use thiserror::Error;

use crate::model::{Provider, StorageMethod};
use crate::store::StoreError;

/// Error type for credential operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The secret was rejected before any storage was touched.
    #[error("invalid secret for {provider}: {message}")]
    Validation { provider: Provider, message: String },

    /// The secure backend refused access (user declined, device locked,
    /// platform restriction).
    #[error("access to secure storage was denied: {message}")]
    AccessDenied { message: String },

    /// No secret for the provider in the backend that was queried.
    #[error("no secret stored for {provider} in {method} storage")]
    NotFound {
        provider: Provider,
        method: StorageMethod,
    },

    /// A backend could not be used.
    #[error("storage backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Another migration for the same provider is still running.
    #[error("a migration for {provider} is already in progress")]
    MigrationBusy { provider: Provider },

    /// The value read back from the migration target did not match.
    #[error("migration of {provider} to {target} storage failed verification")]
    MigrationVerificationFailed {
        provider: Provider,
        target: StorageMethod,
    },

    /// Both backends hold different values; a user decision is required.
    #[error("conflicting secrets for {provider} in secure and plain storage")]
    ConsistencyConflict { provider: Provider },
}

impl CredentialError {
    /// Whether retrying the same call later can succeed without user action
    /// on the data itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied { .. }
                | Self::BackendUnavailable { .. }
                | Self::MigrationBusy { .. }
                | Self::MigrationVerificationFailed { .. }
        )
    }

    /// Stable, snake_case name of the error kind, used in audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::AccessDenied { .. } => "access_denied",
            Self::NotFound { .. } => "not_found",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::MigrationBusy { .. } => "migration_busy",
            Self::MigrationVerificationFailed { .. } => "migration_verification_failed",
            Self::ConsistencyConflict { .. } => "consistency_conflict",
        }
    }
}

impl From<StoreError> for CredentialError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AccessDenied { key } => Self::AccessDenied {
                message: format!("authorization refused for {}", key),
            },
            StoreError::Unavailable { message } => Self::BackendUnavailable { message },
            StoreError::BackendError { message } => Self::BackendUnavailable { message },
            StoreError::SerializationError(e) => Self::BackendUnavailable {
                message: format!("stored data is unreadable: {}", e),
            },
            StoreError::Io(e) => Self::BackendUnavailable {
                message: format!("I/O error: {}", e),
            },
        }
    }
}
