//! SQLite-backed encrypted token store.
//!
//! The [`VaultTokenStore`] keeps the session token and user record in two
//! encrypted slots of a small SQLite database. Each slot is sealed with
//! AES-256-GCM using the slot name as associated data, so ciphertexts cannot
//! be swapped between slots.
//!
//! # Schema
//!
//! - `vault_meta` holds the PBKDF2 salt, iteration count and a passphrase
//!   check value for passphrase-keyed vaults.
//! - `session_slots` holds one encrypted blob per slot (`token`, `user`).
//!
//! Schema migration is automatic on open.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use tether_auth::{StoreResult, TokenStore, UserRecord};

use crate::crypto;
use crate::error::{Result, VaultError};

const BACKEND: &str = "vault";

const TOKEN_SLOT: &str = "token";
const USER_SLOT: &str = "user";

const META_SALT: &str = "kdf_salt";
const META_ITERATIONS: &str = "kdf_iterations";
const META_CHECK: &str = "passphrase_check";

/// Plaintext sealed into `passphrase_check`.
const CHECK_PLAINTEXT: &[u8] = b"tether-vault";

// ---------------------------------------------------------------------------
// VaultTokenStore
// ---------------------------------------------------------------------------

/// Encrypted token store backed by SQLite.
///
/// The connection sits behind `Arc<Mutex<_>>` and every query runs on the
/// blocking pool via `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct VaultTokenStore {
    conn: Arc<Mutex<Connection>>,
    key: Arc<[u8; crypto::KEY_LEN]>,
}

impl VaultTokenStore {
    /// Open (or create) a vault at `path` sealed with a raw 256-bit key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] if `master_key` is not
    /// [`crypto::KEY_LEN`] bytes, or a database error if the file cannot be
    /// opened or migrated.
    pub fn open(path: impl AsRef<Path>, master_key: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening token vault");
        let conn = Connection::open(path)?;
        Self::with_key(conn, master_key)
    }

    /// Open an in-memory vault (useful for testing).
    pub fn open_in_memory(master_key: &[u8]) -> Result<Self> {
        Self::with_key(Connection::open_in_memory()?, master_key)
    }

    /// Open (or create) a vault at `path` keyed by `passphrase`.
    ///
    /// A new vault gets a random salt and records `iterations`; an existing
    /// vault uses the salt and iteration count it was created with.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::WrongPassphrase`] if the vault was created with
    /// a different passphrase.
    pub fn open_with_passphrase(
        path: impl AsRef<Path>,
        passphrase: &str,
        iterations: NonZeroU32,
    ) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening passphrase-keyed token vault");

        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        run_migrations(&conn)?;

        let key = passphrase_key(&conn, passphrase.as_bytes(), iterations)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key: Arc::new(key),
        })
    }

    fn with_key(conn: Connection, master_key: &[u8]) -> Result<Self> {
        let key: [u8; crypto::KEY_LEN] =
            master_key
                .try_into()
                .map_err(|_| VaultError::EncryptionFailed {
                    reason: format!(
                        "key must be {} bytes, got {}",
                        crypto::KEY_LEN,
                        master_key.len()
                    ),
                })?;

        configure_connection(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key: Arc::new(key),
        })
    }

    #[instrument(skip(self))]
    async fn read(&self, slot: &'static str) -> Result<Option<Vec<u8>>> {
        self.execute(move |conn, key| read_slot(conn, key, slot))
            .await
    }

    #[instrument(skip(self, plaintext), fields(len = plaintext.len()))]
    async fn write(&self, slot: &'static str, plaintext: Vec<u8>) -> Result<()> {
        self.execute(move |conn, key| write_slot(conn, key, slot, &plaintext))
            .await
    }

    #[instrument(skip(self))]
    async fn remove(&self, slots: &'static [&'static str]) -> Result<()> {
        self.execute(move |conn, _| {
            for slot in slots {
                conn.execute("DELETE FROM session_slots WHERE slot = ?1", params![slot])?;
            }
            Ok(())
        })
        .await
    }

    /// Run `f` against the connection and key on the blocking pool.
    async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &[u8]) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let key = Arc::clone(&self.key);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| VaultError::Internal(format!("mutex poisoned: {e}")))?;
            f(&conn, key.as_slice())
        })
        .await?
    }
}

impl std::fmt::Debug for VaultTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultTokenStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenStore for VaultTokenStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn get(&self) -> StoreResult<Option<String>> {
        let Some(bytes) = self.read(TOKEN_SLOT).await.map_err(store_err)? else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| store_err(VaultError::Internal(format!("stored token is not utf-8: {e}"))))
    }

    async fn set(&self, token: &str) -> StoreResult<()> {
        self.write(TOKEN_SLOT, token.as_bytes().to_vec())
            .await
            .map_err(store_err)
    }

    async fn delete(&self) -> StoreResult<()> {
        self.remove(&[TOKEN_SLOT]).await.map_err(store_err)
    }

    async fn set_user(&self, user: &UserRecord) -> StoreResult<()> {
        let json = serde_json::to_vec(user)?;
        self.write(USER_SLOT, json).await.map_err(store_err)
    }

    async fn get_user(&self) -> StoreResult<Option<UserRecord>> {
        match self.read(USER_SLOT).await.map_err(store_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_user(&self) -> StoreResult<()> {
        self.remove(&[USER_SLOT]).await.map_err(store_err)
    }

    async fn clear(&self) -> StoreResult<()> {
        self.remove(&[TOKEN_SLOT, USER_SLOT])
            .await
            .map_err(store_err)?;
        tracing::debug!("vault session slots cleared");
        Ok(())
    }
}

fn store_err(err: VaultError) -> tether_auth::StoreError {
    err.into_store_error(BACKEND)
}

// ---------------------------------------------------------------------------
// Schema and slots
// ---------------------------------------------------------------------------

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> Result<()> {
    tracing::debug!("running token vault migrations");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS vault_meta (
            key   TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_slots (
            slot       TEXT PRIMARY KEY,
            nonce      BLOB NOT NULL,
            data       BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    )
    .map_err(|e| VaultError::MigrationFailed {
        reason: e.to_string(),
    })
}

fn read_slot(conn: &Connection, key: &[u8], slot: &str) -> Result<Option<Vec<u8>>> {
    let row: Option<(Vec<u8>, Vec<u8>)> = conn
        .query_row(
            "SELECT nonce, data FROM session_slots WHERE slot = ?1",
            params![slot],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(nonce, data)| crypto::decrypt(&nonce, &data, key, slot.as_bytes()))
        .transpose()
}

fn write_slot(conn: &Connection, key: &[u8], slot: &str, plaintext: &[u8]) -> Result<()> {
    let (nonce, data) = crypto::encrypt(plaintext, key, slot.as_bytes())?;
    conn.execute(
        "INSERT INTO session_slots (slot, nonce, data, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(slot) DO UPDATE SET nonce = excluded.nonce, data = excluded.data,
                                         updated_at = excluded.updated_at",
        params![slot, nonce.as_slice(), data, Utc::now().timestamp()],
    )?;
    Ok(())
}

fn meta_get(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(conn
        .query_row(
            "SELECT value FROM vault_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn meta_set(conn: &Connection, key: &str, value: &[u8]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO vault_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Derive the vault key for `passphrase`, initializing KDF parameters on a
/// fresh vault and checking them on an existing one.
fn passphrase_key(
    conn: &Connection,
    passphrase: &[u8],
    iterations: NonZeroU32,
) -> Result<[u8; crypto::KEY_LEN]> {
    let salt = match meta_get(conn, META_SALT)? {
        Some(salt) => salt,
        None => {
            let salt = crypto::random_salt()?;
            meta_set(conn, META_SALT, &salt)?;
            meta_set(conn, META_ITERATIONS, &iterations.get().to_le_bytes())?;
            tracing::info!(iterations = iterations.get(), "initialized vault key derivation");
            salt.to_vec()
        }
    };

    let iterations = match meta_get(conn, META_ITERATIONS)? {
        Some(bytes) => {
            let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                VaultError::Internal("stored kdf_iterations is malformed".into())
            })?;
            NonZeroU32::new(u32::from_le_bytes(raw))
                .ok_or_else(|| VaultError::Internal("stored kdf_iterations is zero".into()))?
        }
        None => iterations,
    };

    let key = crypto::derive_key(passphrase, &salt, iterations);

    match meta_get(conn, META_CHECK)? {
        Some(check) => {
            let (nonce, data) = check.split_at(crypto::NONCE_LEN_BYTES.min(check.len()));
            match crypto::decrypt(nonce, data, &key, META_CHECK.as_bytes()) {
                Ok(plain) if plain == CHECK_PLAINTEXT => {}
                _ => return Err(VaultError::WrongPassphrase),
            }
        }
        None => {
            let (nonce, data) = crypto::encrypt(CHECK_PLAINTEXT, &key, META_CHECK.as_bytes())?;
            let mut check = nonce.to_vec();
            check.extend_from_slice(&data);
            meta_set(conn, META_CHECK, &check)?;
        }
    }

    Ok(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
