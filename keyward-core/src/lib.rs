//! # Keyward Core
//!
//! Storage engine for per-provider API keys.
//!
//! This crate provides:
//! - A secure backend holding every provider's secret in one cached keyring
//!   record, with import of older per-provider records
//! - A plain backend with per-provider secrets, existence flags and storage
//!   preferences
//! - [`CredentialManager`] for save/load/remove/exists
//! - [`MigrationCoordinator`] for verified moves between the two backends
//! - [`ConsistencyValidator`] for secrets found in both backends
//! - In-memory backends with fault injection for tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keyward_core::{Keyward, Provider, Secret, StorageMethod};
//! use keyward_core::store::{create_secure_backend, FilePreferenceStore};
//!
//! async fn store_key() -> Result<(), Box<dyn std::error::Error>> {
//!     let keyward = Keyward::new(
//!         create_secure_backend("keyward"),
//!         Arc::new(FilePreferenceStore::open_default()?),
//!     );
//!     keyward
//!         .save(Secret::new("sk-..."), Provider::OpenAi, StorageMethod::Secure)
//!         .await?;
//!     Ok(())
//! }
//! ```

mod audit;
mod backend;

pub mod consistency;
pub mod error;
pub mod manager;
pub mod migration;
pub mod model;
pub mod plain_store;
pub mod secure_store;
pub mod service;
pub mod store;

// Re-export commonly used types at crate root
pub use model::{CredentialStatus, ParseError, Provider, StorageMethod};

pub use store::{
    create_secure_backend,
    FilePreferenceStore,
    MemoryPreferenceStore,
    MemorySecureStore,
    PreferenceStore,
    PreferenceValue,
    Secret,
    SecureCredentialStore,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringCredentialStore;

pub use error::CredentialError;

pub use secure_store::{AccessState, SecureStore};
pub use plain_store::PlainStore;

pub use manager::CredentialManager;
pub use migration::{MigrationCoordinator, MigrationOperation, MigrationStep};
pub use consistency::{ConsistencyOutcome, ConsistencyValidator};

pub use service::Keyward;
