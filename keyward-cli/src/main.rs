//! Keyward CLI
//!
//! Command-line interface for storing provider API keys.
//!
//! # Usage
//!
//! ```bash
//! # Store a key in the OS keyring (the key is read from stdin)
//! keyward save openai
//!
//! # Show where each provider's key lives, without prompting
//! keyward status
//!
//! # Move every stored key to plain storage
//! keyward migrate-all plain
//! ```

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keyward_core::{
    ConsistencyOutcome, FilePreferenceStore, Keyward, Provider, Secret, StorageMethod,
    create_secure_backend,
};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

mod config;

use config::KeywardConfig;

#[derive(Parser)]
#[command(name = "keyward")]
#[command(about = "Per-provider API key storage with keyring and plain backends")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a provider's API key
    Save {
        /// Provider id (openai, anthropic, gemini)
        provider: Provider,

        /// Backend to store the key in (secure, plain)
        #[arg(short, long)]
        method: Option<StorageMethod>,

        /// The key itself; read from stdin when omitted
        #[arg(long)]
        value: Option<String>,
    },

    /// Print a provider's API key
    Load {
        /// Provider id
        provider: Provider,

        /// Print the full key instead of a masked preview
        #[arg(long)]
        reveal: bool,
    },

    /// Remove a provider's API key from both backends
    Remove {
        /// Provider id
        provider: Provider,
    },

    /// Exit successfully if a key is recorded for the provider
    Exists {
        /// Provider id
        provider: Provider,
    },

    /// Show which backend holds each provider's key
    Status {
        /// Only show this provider
        provider: Option<Provider>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Move one provider's key to another backend
    Migrate {
        /// Provider id
        provider: Provider,

        /// Target backend
        method: StorageMethod,
    },

    /// Move every stored key to another backend
    MigrateAll {
        /// Target backend
        method: StorageMethod,
    },

    /// Look for keys stored in both backends
    Check {
        /// Only check this provider
        provider: Option<Provider>,
    },

    /// Keep one copy of a key found in both backends
    Resolve {
        /// Provider id
        provider: Provider,

        /// Backend whose copy is kept
        keep: StorageMethod,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config, cli.verbose);
    debug!("Loaded configuration from {:?}", config.config_path);

    let keyward = build(&config)?;

    match cli.command {
        Commands::Save {
            provider,
            method,
            value,
        } => save(&keyward, provider, method, value).await,
        Commands::Load { provider, reveal } => load(&keyward, provider, reveal).await,
        Commands::Remove { provider } => remove(&keyward, provider).await,
        Commands::Exists { provider } => exists(&keyward, provider).await,
        Commands::Status { provider, format } => status(&keyward, provider, &format).await,
        Commands::Migrate { provider, method } => migrate(&keyward, provider, method).await,
        Commands::MigrateAll { method } => migrate_all(&keyward, method).await,
        Commands::Check { provider } => check(&keyward, provider).await,
        Commands::Resolve { provider, keep } => resolve(&keyward, provider, keep).await,
    }
}

fn init_logging(config: &KeywardConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build(config: &KeywardConfig) -> Result<Keyward> {
    let preferences_path = config.preferences_path();
    let preferences = FilePreferenceStore::open(&preferences_path)
        .with_context(|| format!("Failed to open preferences at {:?}", preferences_path))?;

    Ok(Keyward::new(
        create_secure_backend(&config.keyring_service),
        Arc::new(preferences),
    )
    .with_default_method(config.default_method))
}

async fn save(
    keyward: &Keyward,
    provider: Provider,
    method: Option<StorageMethod>,
    value: Option<String>,
) -> Result<()> {
    let method = method.unwrap_or(keyward.manager().default_method());
    let secret = match value {
        Some(value) => Secret::new(value),
        None => read_secret_from_stdin(provider)?,
    };

    keyward
        .save(secret, provider, method)
        .await
        .with_context(|| format!("Failed to save {} key", provider.display_name()))?;

    println!("Saved {} key in {} storage", provider.display_name(), method);
    Ok(())
}

fn read_secret_from_stdin(provider: Provider) -> Result<Secret> {
    eprintln!("Enter {} API key:", provider.display_name());
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read key from stdin")?;
    let secret = Secret::new(line.trim());
    line.clear();
    Ok(secret)
}

async fn load(keyward: &Keyward, provider: Provider, reveal: bool) -> Result<()> {
    let secret = keyward
        .load(provider)
        .await
        .with_context(|| format!("Failed to load {} key", provider.display_name()))?;

    if reveal {
        println!("{}", secret.expose());
    } else {
        println!("{}", secret.masked());
    }
    Ok(())
}

async fn remove(keyward: &Keyward, provider: Provider) -> Result<()> {
    keyward
        .remove(provider)
        .await
        .with_context(|| format!("Failed to remove {} key", provider.display_name()))?;

    println!("Removed {} key", provider.display_name());
    Ok(())
}

async fn exists(keyward: &Keyward, provider: Provider) -> Result<()> {
    if keyward.exists(provider).await {
        println!("{}: stored", provider);
        Ok(())
    } else {
        bail!("no key stored for {}", provider)
    }
}

async fn status(keyward: &Keyward, provider: Option<Provider>, format: &str) -> Result<()> {
    let providers = match provider {
        Some(provider) => vec![provider],
        None => Provider::ALL.to_vec(),
    };

    let mut statuses = Vec::with_capacity(providers.len());
    for provider in providers {
        statuses.push(keyward.status(provider).await?);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        _ => {
            for status in &statuses {
                let location = match (status.exists, status.method) {
                    (true, Some(method)) => method.to_string(),
                    (true, None) => "unknown".to_string(),
                    (false, _) => "-".to_string(),
                };
                println!("{:<10} {}", status.provider, location);
            }
        }
    }
    Ok(())
}

async fn migrate(keyward: &Keyward, provider: Provider, method: StorageMethod) -> Result<()> {
    keyward
        .migrate(provider, method)
        .await
        .with_context(|| {
            format!(
                "Failed to move {} key to {} storage",
                provider.display_name(),
                method
            )
        })?;

    println!("{} key is in {} storage", provider.display_name(), method);
    Ok(())
}

async fn migrate_all(keyward: &Keyward, method: StorageMethod) -> Result<()> {
    let results = keyward.migrate_all(method).await;

    let mut failed = 0;
    for (provider, result) in &results {
        match result {
            Ok(()) => println!("{:<10} ok", provider),
            Err(e) => {
                failed += 1;
                println!("{:<10} failed: {}", provider, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} providers could not be migrated", failed, results.len());
    }
    Ok(())
}

async fn check(keyward: &Keyward, provider: Option<Provider>) -> Result<()> {
    let outcomes: BTreeMap<Provider, ConsistencyOutcome> = match provider {
        Some(provider) => [(provider, keyward.validate(provider).await)].into_iter().collect(),
        None => keyward.validator().validate_all().await,
    };

    let mut conflicts = Vec::new();
    for (provider, outcome) in &outcomes {
        let label = match outcome {
            ConsistencyOutcome::NoIssues => "ok",
            ConsistencyOutcome::FixedDuplicate => "removed duplicate plain copy",
            ConsistencyOutcome::NeedsUserChoice => "different keys in both backends",
            ConsistencyOutcome::Unverifiable => "could not be checked",
        };
        println!("{:<10} {}", provider, label);
        if let Some(error) = outcome.to_error(*provider) {
            conflicts.push(error);
        }
    }

    if let Some(first) = conflicts.first() {
        bail!(
            "{} (run `keyward resolve <provider> <secure|plain>`)",
            first
        );
    }
    Ok(())
}

async fn resolve(keyward: &Keyward, provider: Provider, keep: StorageMethod) -> Result<()> {
    keyward
        .validator()
        .resolve_conflict(provider, keep)
        .await
        .with_context(|| format!("Failed to resolve {} conflict", provider.display_name()))?;

    println!("Kept the {} copy of the {} key", keep, provider.display_name());
    Ok(())
}
