//! Structured audit events for mutating operations.
//!
//! Every mutating call emits exactly one event on the `keyward::audit`
//! target with the fields `operation`, `provider`, `backend` and
//! `outcome`. Secret values never appear in these events.

use crate::error::CredentialError;
use crate::model::{Provider, StorageMethod};

/// Backend label used in audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Backend {
    Method(StorageMethod),
    Both,
}

impl Backend {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Method(method) => method.as_str(),
            Self::Both => "both",
        }
    }
}

impl From<StorageMethod> for Backend {
    fn from(method: StorageMethod) -> Self {
        Self::Method(method)
    }
}

/// Emit the audit event for one completed operation.
pub(crate) fn record<T>(
    operation: &'static str,
    provider: Provider,
    backend: impl Into<Backend>,
    result: &Result<T, CredentialError>,
) {
    let backend = backend.into();
    match result {
        Ok(_) => tracing::info!(
            target: "keyward::audit",
            operation,
            provider = provider.as_str(),
            backend = backend.as_str(),
            outcome = "ok"
        ),
        Err(e) => tracing::warn!(
            target: "keyward::audit",
            operation,
            provider = provider.as_str(),
            backend = backend.as_str(),
            outcome = e.kind(),
            error = %e
        ),
    }
}
