//! Vault error types.
//!
//! Every backend in this crate reports through [`VaultError`]. At the
//! [`TokenStore`](tether_auth::TokenStore) boundary it is folded into
//! [`StoreError`] so the auth layer sees one error type regardless of
//! backend.

use tether_auth::StoreError;

/// Unified error type for the tether token vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. invalid key length, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Decryption failed (e.g. wrong key, corrupted ciphertext, bad nonce).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Key derivation failed (e.g. random salt generation).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    /// The passphrase does not open this vault.
    #[error("wrong vault passphrase")]
    WrongPassphrase,

    // -- Keyring errors -----------------------------------------------------
    /// No platform keyring is reachable.
    #[error("keyring unavailable: {reason}")]
    KeyringUnavailable { reason: String },

    /// The platform keyring reported an error.
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    // -- Store errors -------------------------------------------------------
    /// Database schema migration failed.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// A session file exists but is not valid.
    #[error("malformed session file {path}: {reason}")]
    MalformedFile { path: String, reason: String },

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// Catch-all for unexpected internal errors.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl VaultError {
    /// Fold into the auth layer's [`StoreError`], tagging the backend.
    pub fn into_store_error(self, backend: &'static str) -> StoreError {
        match self {
            Self::KeyringUnavailable { reason } => StoreError::Unavailable { reason },
            Self::Serialization(e) => StoreError::Serialization(e),
            Self::Io(e) => StoreError::Io(e),
            Self::TaskJoin(reason) => StoreError::TaskJoin(reason),
            other => StoreError::Backend {
                backend,
                reason: other.to_string(),
            },
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
