//! OS keyring integration.
//!
//! Uses the `keyring` crate to keep the session in the platform credential
//! store:
//!
//! - **macOS**: Keychain
//! - **Windows**: Credential Manager
//! - **Linux**: Secret Service (GNOME Keyring, KWallet)
//!
//! Two things live here: [`KeyringTokenStore`], which stores the session
//! token and user record directly, and [`keyring_master_key`], which keeps a
//! random master key for the SQLite vault.
//!
//! Keyring calls can block on IPC, so every call runs on the blocking pool.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use keyring::Entry;

use tether_auth::{StoreResult, TokenStore, UserRecord};

use crate::crypto;
use crate::error::{Result, VaultError};

const BACKEND: &str = "keyring";

/// Default keyring service name.
pub const DEFAULT_SERVICE: &str = "tether";

const TOKEN_ACCOUNT: &str = "session-token";
const USER_ACCOUNT: &str = "session-user";
const MASTER_KEY_ACCOUNT: &str = "vault-master-key";

// ---------------------------------------------------------------------------
// Blocking helpers
// ---------------------------------------------------------------------------

/// Map platform failures to [`VaultError::KeyringUnavailable`].
fn classify(err: keyring::Error) -> VaultError {
    match err {
        keyring::Error::NoStorageAccess(e) | keyring::Error::PlatformFailure(e) => {
            VaultError::KeyringUnavailable {
                reason: e.to_string(),
            }
        }
        other => VaultError::Keyring(other),
    }
}

fn read_entry(service: &str, account: &str) -> Result<Option<String>> {
    let entry = Entry::new(service, account).map_err(classify)?;
    match entry.get_password() {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(classify(e)),
    }
}

fn write_entry(service: &str, account: &str, secret: &str) -> Result<()> {
    Entry::new(service, account)
        .map_err(classify)?
        .set_password(secret)
        .map_err(classify)
}

fn delete_entry(service: &str, account: &str) -> Result<()> {
    let entry = Entry::new(service, account).map_err(classify)?;
    match entry.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(classify(e)),
    }
}

async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

// ---------------------------------------------------------------------------
// KeyringTokenStore
// ---------------------------------------------------------------------------

/// Token store in the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
    available: bool,
}

impl KeyringTokenStore {
    /// Create a store under `service`. Availability is probed once here.
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        let available = match Entry::new(&service, TOKEN_ACCOUNT) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "os keyring unavailable");
                false
            }
        };
        Self { service, available }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn read(&self, account: &'static str) -> Result<Option<String>> {
        let service = self.service.clone();
        blocking(move || read_entry(&service, account)).await
    }

    async fn write(&self, account: &'static str, secret: String) -> Result<()> {
        let service = self.service.clone();
        blocking(move || write_entry(&service, account, &secret)).await
    }

    async fn remove(&self, account: &'static str) -> Result<()> {
        let service = self.service.clone();
        blocking(move || delete_entry(&service, account)).await
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn get(&self) -> StoreResult<Option<String>> {
        self.read(TOKEN_ACCOUNT).await.map_err(store_err)
    }

    async fn set(&self, token: &str) -> StoreResult<()> {
        self.write(TOKEN_ACCOUNT, token.to_string())
            .await
            .map_err(store_err)
    }

    async fn delete(&self) -> StoreResult<()> {
        self.remove(TOKEN_ACCOUNT).await.map_err(store_err)
    }

    async fn set_user(&self, user: &UserRecord) -> StoreResult<()> {
        let json = serde_json::to_string(user)?;
        self.write(USER_ACCOUNT, json).await.map_err(store_err)
    }

    async fn get_user(&self) -> StoreResult<Option<UserRecord>> {
        match self.read(USER_ACCOUNT).await.map_err(store_err)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_user(&self) -> StoreResult<()> {
        self.remove(USER_ACCOUNT).await.map_err(store_err)
    }

    async fn clear(&self) -> StoreResult<()> {
        self.remove(TOKEN_ACCOUNT).await.map_err(store_err)?;
        self.remove(USER_ACCOUNT).await.map_err(store_err)
    }
}

fn store_err(err: VaultError) -> tether_auth::StoreError {
    err.into_store_error(BACKEND)
}

// ---------------------------------------------------------------------------
// Vault master key
// ---------------------------------------------------------------------------

/// Fetch the vault master key for `service`, creating and storing a random
/// one on first use.
///
/// # Errors
///
/// Returns [`VaultError::KeyringUnavailable`] when no keyring is reachable,
/// or [`VaultError::Internal`] if the stored key is not a valid key.
pub async fn keyring_master_key(service: &str) -> Result<Vec<u8>> {
    let service = service.to_string();
    blocking(move || {
        if let Some(encoded) = read_entry(&service, MASTER_KEY_ACCOUNT)? {
            return decode_master_key(&encoded);
        }

        let key = crypto::random_bytes(crypto::KEY_LEN)?;
        write_entry(&service, MASTER_KEY_ACCOUNT, &BASE64.encode(&key))?;
        tracing::info!(service = %service, "stored new vault master key in os keyring");
        Ok(key)
    })
    .await
}

fn decode_master_key(encoded: &str) -> Result<Vec<u8>> {
    let key = BASE64
        .decode(encoded.trim())
        .map_err(|e| VaultError::Internal(format!("stored master key is not base64: {e}")))?;
    if key.len() != crypto::KEY_LEN {
        return Err(VaultError::Internal(format!(
            "stored master key has {} bytes, expected {}",
            key.len(),
            crypto::KEY_LEN
        )));
    }
    Ok(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
