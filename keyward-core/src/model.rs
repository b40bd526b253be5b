//! Domain model types for Keyward.
//!
//! This module defines the core types used throughout Keyward:
//! - [`Provider`] - The fixed set of services a secret can belong to
//! - [`StorageMethod`] - Which backend holds a provider's secret
//! - [`CredentialStatus`] - Cheap, prompt-free summary of a provider

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier for a third-party service whose API key Keyward manages.
///
/// The set is closed; the serialized form (`"openai"`, `"anthropic"`,
/// `"gemini"`) is used as the map key in every persisted layout.
///
/// # Examples
///
/// ```
/// use keyward_core::Provider;
///
/// let provider: Provider = "OpenAI".parse().unwrap();
/// assert_eq!(provider, Provider::OpenAi);
/// assert_eq!(provider.as_str(), "openai");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI.
    OpenAi,

    /// Anthropic.
    Anthropic,

    /// Google Gemini.
    Gemini,
}

impl Provider {
    /// Every known provider, in a stable order.
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Gemini];

    /// Get the provider id used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    /// Human-readable vendor name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Gemini => "Google Gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider or storage method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

impl FromStr for Provider {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == lowered)
            .ok_or_else(|| ParseError {
                kind: "provider",
                value: s.to_string(),
            })
    }
}

/// Backend that holds the authoritative copy of a provider's secret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMethod {
    /// OS secure credential store. May prompt the user for authorization.
    #[default]
    Secure,

    /// Unencrypted preference storage. Always available.
    Plain,
}

impl StorageMethod {
    /// Get the storage method as persisted in the preference store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secure => "secure",
            Self::Plain => "plain",
        }
    }

    /// The other backend.
    pub fn other(&self) -> Self {
        match self {
            Self::Secure => Self::Plain,
            Self::Plain => Self::Secure,
        }
    }
}

impl fmt::Display for StorageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "secure" => Ok(Self::Secure),
            "plain" => Ok(Self::Plain),
            _ => Err(ParseError {
                kind: "storage method",
                value: s.to_string(),
            }),
        }
    }
}

/// Summary of a provider's credential, built from plain-store metadata only.
///
/// Producing a status never touches the secure backend, so it can be shown
/// in settings screens without triggering an authorization prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatus {
    /// The provider this status describes.
    pub provider: Provider,

    /// Whether a secret is recorded as stored.
    pub exists: bool,

    /// The recorded backend, if any.
    pub method: Option<StorageMethod>,
}
