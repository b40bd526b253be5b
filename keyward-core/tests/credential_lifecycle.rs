//! Integration tests for the save/load/remove lifecycle.
//!
//! These tests drive the assembled engine end to end:
//! - Round trips through both backends
//! - The exactly-one-location rule
//! - Removal and existence checks
//! - Persistence through the JSON preference file
//! - Import of older per-provider keyring records

use std::sync::Arc;

use keyward_core::secure_store::{legacy_record, UNIFIED_RECORD};
use keyward_core::{
    ConsistencyOutcome, CredentialError, FilePreferenceStore, Keyward, MemoryPreferenceStore,
    MemorySecureStore, Provider, Secret, StorageMethod,
};
use tempfile::TempDir;

/// Helper to create an engine over in-memory backends.
fn memory_keyward() -> (Keyward, Arc<MemorySecureStore>) {
    let secure = Arc::new(MemorySecureStore::new());
    let keyward = Keyward::new(secure.clone(), Arc::new(MemoryPreferenceStore::new()));
    (keyward, secure)
}

#[tokio::test]
async fn test_round_trip_for_both_methods() {
    let (keyward, _secure) = memory_keyward();

    keyward
        .save(Secret::new("sk-openai-1234"), Provider::OpenAi, StorageMethod::Secure)
        .await
        .unwrap();
    keyward
        .save(Secret::new("sk-ant-5678"), Provider::Anthropic, StorageMethod::Plain)
        .await
        .unwrap();

    assert_eq!(
        keyward.load(Provider::OpenAi).await.unwrap().expose(),
        "sk-openai-1234"
    );
    assert_eq!(
        keyward.load(Provider::Anthropic).await.unwrap().expose(),
        "sk-ant-5678"
    );
    assert!(keyward.exists(Provider::OpenAi).await);
    assert!(keyward.exists(Provider::Anthropic).await);
    assert!(!keyward.exists(Provider::Gemini).await);
}

#[tokio::test]
async fn test_secret_lives_in_exactly_one_backend() {
    let (keyward, _secure) = memory_keyward();

    keyward
        .save(Secret::new("g-first"), Provider::Gemini, StorageMethod::Plain)
        .await
        .unwrap();
    keyward
        .save(Secret::new("g-second"), Provider::Gemini, StorageMethod::Secure)
        .await
        .unwrap();

    let manager = keyward.manager();
    assert_eq!(
        manager
            .load_from(Provider::Gemini, StorageMethod::Secure)
            .await
            .unwrap()
            .expose(),
        "g-second"
    );
    assert!(matches!(
        manager.load_from(Provider::Gemini, StorageMethod::Plain).await,
        Err(CredentialError::NotFound { .. })
    ));

    let status = keyward.status(Provider::Gemini).await.unwrap();
    assert!(status.exists);
    assert_eq!(status.method, Some(StorageMethod::Secure));
}

#[tokio::test]
async fn test_remove_then_load_is_not_found() {
    let (keyward, _secure) = memory_keyward();

    keyward
        .save(Secret::new("sk-gone"), Provider::OpenAi, StorageMethod::Secure)
        .await
        .unwrap();
    keyward.remove(Provider::OpenAi).await.unwrap();

    assert!(!keyward.exists(Provider::OpenAi).await);
    assert!(matches!(
        keyward.load(Provider::OpenAi).await,
        Err(CredentialError::NotFound { .. })
    ));

    // Removing again is a no-op.
    keyward.remove(Provider::OpenAi).await.unwrap();
}

#[tokio::test]
async fn test_blank_secret_is_rejected() {
    let (keyward, secure) = memory_keyward();

    let result = keyward
        .save(Secret::new("   "), Provider::Anthropic, StorageMethod::Secure)
        .await;

    assert!(matches!(result, Err(CredentialError::Validation { .. })));
    assert!(!keyward.exists(Provider::Anthropic).await);
    assert!(secure.raw(UNIFIED_RECORD).is_none());
}

#[tokio::test]
async fn test_missing_keyring_leaves_plain_usable() {
    let (keyward, secure) = memory_keyward();
    secure.set_unavailable(true);

    let result = keyward
        .save(Secret::new("sk-secure"), Provider::OpenAi, StorageMethod::Secure)
        .await;
    assert!(matches!(
        result,
        Err(CredentialError::BackendUnavailable { .. })
    ));

    keyward
        .save(Secret::new("sk-plain"), Provider::Anthropic, StorageMethod::Plain)
        .await
        .unwrap();
    assert_eq!(
        keyward.load(Provider::Anthropic).await.unwrap().expose(),
        "sk-plain"
    );
    keyward.remove(Provider::Anthropic).await.unwrap();
    assert!(!keyward.exists(Provider::Anthropic).await);
}

#[tokio::test]
async fn test_denied_keyring_rejects_secure_save() {
    let (keyward, secure) = memory_keyward();
    secure.set_deny_access(true);

    let result = keyward
        .save(Secret::new("sk-secure"), Provider::OpenAi, StorageMethod::Secure)
        .await;
    assert!(matches!(result, Err(CredentialError::AccessDenied { .. })));
    assert!(result.unwrap_err().is_retryable());
    assert!(!keyward.exists(Provider::OpenAi).await);
}

#[tokio::test]
async fn test_remove_reports_secure_copy_it_could_not_delete() {
    let (keyward, secure) = memory_keyward();
    secure.insert_raw(UNIFIED_RECORD, r#"{"openai":"sk-survivor-123"}"#);
    secure.set_deny_access(true);

    let result = keyward.remove(Provider::OpenAi).await;
    assert!(matches!(result, Err(CredentialError::AccessDenied { .. })));

    secure.set_deny_access(false);
    assert!(keyward.secure_store().retry_access().await);
    assert_eq!(
        keyward
            .manager()
            .load_from(Provider::OpenAi, StorageMethod::Secure)
            .await
            .unwrap()
            .expose(),
        "sk-survivor-123"
    );

    keyward.remove(Provider::OpenAi).await.unwrap();
    assert!(matches!(
        keyward.load(Provider::OpenAi).await,
        Err(CredentialError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_plain_save_is_undone_when_secure_copy_cannot_be_cleared() {
    let (keyward, secure) = memory_keyward();
    secure.insert_raw(UNIFIED_RECORD, r#"{"gemini":"g-old-secure-key"}"#);
    secure.set_deny_access(true);

    let result = keyward
        .save(Secret::new("g-new-plain-key"), Provider::Gemini, StorageMethod::Plain)
        .await;
    assert!(matches!(result, Err(CredentialError::AccessDenied { .. })));
    assert!(!keyward.exists(Provider::Gemini).await);
    assert!(matches!(
        keyward
            .manager()
            .load_from(Provider::Gemini, StorageMethod::Plain)
            .await,
        Err(CredentialError::NotFound { .. })
    ));

    secure.set_deny_access(false);
    assert!(keyward.secure_store().retry_access().await);
    assert_eq!(
        keyward.load(Provider::Gemini).await.unwrap().expose(),
        "g-old-secure-key"
    );
    assert_eq!(
        keyward.validate(Provider::Gemini).await,
        ConsistencyOutcome::NoIssues
    );
}

#[tokio::test]
async fn test_preferences_persist_in_json_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("preferences.json");
    let secure = Arc::new(MemorySecureStore::new());

    {
        let prefs = Arc::new(FilePreferenceStore::open(&path).unwrap());
        let keyward = Keyward::new(secure.clone(), prefs);
        keyward
            .save(Secret::new("sk-plain-disk"), Provider::OpenAi, StorageMethod::Plain)
            .await
            .unwrap();
        keyward
            .save(Secret::new("sk-ant-keyring"), Provider::Anthropic, StorageMethod::Secure)
            .await
            .unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(json["secret_openai"], "sk-plain-disk");
    assert_eq!(json["has_secret_openai"], true);
    assert_eq!(json["storage_method_openai"], "plain");
    assert_eq!(json["storage_method_anthropic"], "secure");
    assert!(json.get("secret_anthropic").is_none());

    let prefs = Arc::new(FilePreferenceStore::open(&path).unwrap());
    let reopened = Keyward::new(secure, prefs);
    assert_eq!(
        reopened.load(Provider::OpenAi).await.unwrap().expose(),
        "sk-plain-disk"
    );
    assert_eq!(
        reopened.load(Provider::Anthropic).await.unwrap().expose(),
        "sk-ant-keyring"
    );
}

#[tokio::test]
async fn test_unified_record_layout() {
    let (keyward, secure) = memory_keyward();

    keyward
        .save(Secret::new("sk-a"), Provider::OpenAi, StorageMethod::Secure)
        .await
        .unwrap();
    keyward
        .save(Secret::new("g-b"), Provider::Gemini, StorageMethod::Secure)
        .await
        .unwrap();

    let raw = secure.raw(UNIFIED_RECORD).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json, serde_json::json!({ "openai": "sk-a", "gemini": "g-b" }));
}

#[tokio::test]
async fn test_legacy_records_are_imported() {
    let secure = Arc::new(MemorySecureStore::new());
    secure.insert_raw(&legacy_record(Provider::OpenAi), "sk-legacy-openai");
    secure.insert_raw(&legacy_record(Provider::Gemini), "g-legacy");
    let keyward = Keyward::new(secure.clone(), Arc::new(MemoryPreferenceStore::new()));

    let openai = keyward
        .manager()
        .load_from(Provider::OpenAi, StorageMethod::Secure)
        .await
        .unwrap();
    assert_eq!(openai.expose(), "sk-legacy-openai");

    assert!(secure.raw(&legacy_record(Provider::OpenAi)).is_none());
    assert!(secure.raw(&legacy_record(Provider::Gemini)).is_none());
    assert!(secure.raw(UNIFIED_RECORD).is_some());

    // Every imported secret is recorded as held by secure storage.
    assert!(keyward.exists(Provider::OpenAi).await);
    assert!(keyward.exists(Provider::Gemini).await);
    assert!(!keyward.exists(Provider::Anthropic).await);
    assert_eq!(
        keyward.status(Provider::Gemini).await.unwrap().method,
        Some(StorageMethod::Secure)
    );
    assert_eq!(
        keyward.validate(Provider::Gemini).await,
        ConsistencyOutcome::NoIssues
    );
    assert_eq!(keyward.load(Provider::Gemini).await.unwrap().expose(), "g-legacy");
}
