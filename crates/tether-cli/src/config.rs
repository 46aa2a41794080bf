//! Layered CLI configuration.
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults.
//! 2. The TOML file given by `--config` (a missing file is not an error).
//! 3. Environment variables, after loading `.env` via `dotenvy`.
//! 4. Command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use tether_auth::{HandshakeConfig, IdentityConfig};

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/tether.toml";

/// Default loopback port for the OAuth callback listener.
const DEFAULT_CALLBACK_PORT: u16 = 8400;

const DEFAULT_SESSION_FILE: &str = "data/session.json";
const DEFAULT_VAULT_FILE: &str = "data/tether.db";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where the session token is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Nothing is persisted.
    None,
    /// Process memory only.
    Memory,
    /// Plain JSON file.
    #[default]
    File,
    /// OS keyring.
    Keyring,
    /// Encrypted SQLite vault.
    Vault,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| anyhow::anyhow!("unknown storage backend: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// File or database path; defaults depend on the backend.
    pub path: Option<PathBuf>,
    /// Keyring service name.
    pub service: String,
    /// Vault passphrase. Only read from the environment.
    #[serde(skip)]
    pub vault_passphrase: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: None,
            service: tether_vault::keychain::DEFAULT_SERVICE.to_string(),
            vault_passphrase: None,
        }
    }
}

impl StorageConfig {
    /// Effective path for file-based backends.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| match self.backend {
            StorageBackend::Vault => PathBuf::from(DEFAULT_VAULT_FILE),
            _ => PathBuf::from(DEFAULT_SESSION_FILE),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Loopback port for the callback listener; 0 picks a free port.
    pub callback_port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            callback_port: DEFAULT_CALLBACK_PORT,
        }
    }
}

/// Complete CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub identity: IdentityConfig,
    pub handshake: HandshakeConfig,
    pub browser: BrowserConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            identity: IdentityConfig::default(),
            handshake: HandshakeConfig::default(),
            browser: BrowserConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load the file at `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;

        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config file {}", path.display()))
            }
        }
    }

    /// Apply `TETHER_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = get("TETHER_IDENTITY_URL") {
            self.identity.base_url = url;
        }
        if let Some(backend) = get("TETHER_STORAGE") {
            self.storage.backend = backend.parse().context("invalid TETHER_STORAGE")?;
        }
        if let Some(path) = get("TETHER_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(level) = get("TETHER_LOG") {
            self.log_level = level;
        }
        if let Some(passphrase) = get("TETHER_VAULT_PASSPHRASE") {
            self.storage.vault_passphrase = Some(passphrase);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
