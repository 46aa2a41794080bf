//! Token store selection for the CLI.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use tether_auth::{DisabledTokenStore, MemoryTokenStore, TokenStore};
use tether_vault::{FileTokenStore, KeyringTokenStore, VaultTokenStore, crypto, keyring_master_key};

use crate::config::{StorageBackend, StorageConfig};

/// Open the configured token store.
///
/// The vault is keyed by `TETHER_VAULT_PASSPHRASE` when set, otherwise by a
/// master key kept in the OS keyring.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match config.backend {
        StorageBackend::None => Arc::new(DisabledTokenStore),
        StorageBackend::Memory => {
            tracing::warn!("memory storage does not outlive this process");
            Arc::new(MemoryTokenStore::new())
        }
        StorageBackend::File => Arc::new(FileTokenStore::new(config.resolved_path())),
        StorageBackend::Keyring => {
            let store = KeyringTokenStore::new(config.service.as_str());
            if !store.is_available() {
                tracing::warn!(service = %config.service, "keyring unavailable, session will not be stored");
            }
            Arc::new(store)
        }
        StorageBackend::Vault => Arc::new(open_vault(config).await?),
    };

    tracing::debug!(backend = store.backend_name(), "token store ready");
    Ok(store)
}

async fn open_vault(config: &StorageConfig) -> Result<VaultTokenStore> {
    let path = config.resolved_path();
    ensure_parent(&path)?;

    match config.vault_passphrase.clone() {
        Some(passphrase) => {
            let iterations: NonZeroU32 = crypto::DEFAULT_PBKDF2_ITERATIONS;
            tokio::task::spawn_blocking(move || {
                VaultTokenStore::open_with_passphrase(&path, &passphrase, iterations)
            })
            .await
            .context("vault open task failed")?
            .context("failed to open token vault")
        }
        None => {
            let key = keyring_master_key(&config.service)
                .await
                .context("no TETHER_VAULT_PASSPHRASE set and the OS keyring is unavailable")?;
            tokio::task::spawn_blocking(move || VaultTokenStore::open(&path, &key))
                .await
                .context("vault open task failed")?
                .context("failed to open token vault")
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}
