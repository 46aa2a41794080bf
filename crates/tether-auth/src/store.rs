//! Token persistence contract.
//!
//! A [`TokenStore`] keeps the bearer token (and, where supported, the user
//! record) across process or page restarts. The manager decides *when* to
//! read or write; the backend decides *how*. Every backend implements the
//! same async contract even when its underlying storage is synchronous.
//!
//! Two in-process backends live here:
//!
//! - [`MemoryTokenStore`] — for server processes and tests.
//! - [`DisabledTokenStore`] — reports itself unavailable; used when the
//!   host has no storage at all.
//!
//! Persistent backends (file, OS keyring, encrypted vault) live in the
//! `tether-vault` crate.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::types::UserRecord;

/// Pluggable persistence for the session token.
///
/// Concurrent writers are not serialized across store instances; the last
/// write wins.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Whether this backend can be used in the current environment.
    fn is_available(&self) -> bool;

    /// Read the stored token, if any.
    async fn get(&self) -> StoreResult<Option<String>>;

    /// Persist `token`, replacing any previous value.
    async fn set(&self, token: &str) -> StoreResult<()>;

    /// Remove the stored token. Deleting an absent token is not an error.
    async fn delete(&self) -> StoreResult<()>;

    /// Persist the user record next to the token. Backends without user
    /// storage ignore it.
    async fn set_user(&self, _user: &UserRecord) -> StoreResult<()> {
        Ok(())
    }

    /// Read the stored user record, if the backend keeps one.
    async fn get_user(&self) -> StoreResult<Option<UserRecord>> {
        Ok(None)
    }

    /// Remove the stored user record, leaving the token in place.
    async fn delete_user(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Remove everything this backend persisted for the session.
    async fn clear(&self) -> StoreResult<()> {
        self.delete().await
    }
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
    user: RwLock<Option<UserRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            user: RwLock::new(None),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn get(&self) -> StoreResult<Option<String>> {
        Ok(self.token.read().await.clone())
    }

    async fn set(&self, token: &str) -> StoreResult<()> {
        *self.token.write().await = Some(token.to_string());
        Ok(())
    }

    async fn delete(&self) -> StoreResult<()> {
        *self.token.write().await = None;
        Ok(())
    }

    async fn set_user(&self, user: &UserRecord) -> StoreResult<()> {
        *self.user.write().await = Some(user.clone());
        Ok(())
    }

    async fn get_user(&self) -> StoreResult<Option<UserRecord>> {
        Ok(self.user.read().await.clone())
    }

    async fn delete_user(&self) -> StoreResult<()> {
        *self.user.write().await = None;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        *self.token.write().await = None;
        *self.user.write().await = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DisabledTokenStore
// ---------------------------------------------------------------------------

/// A store for hosts without any persistence. Never available; reads are
/// empty and writes are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTokenStore;

#[async_trait]
impl TokenStore for DisabledTokenStore {
    fn backend_name(&self) -> &'static str {
        "disabled"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn get(&self) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _token: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn delete(&self) -> StoreResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
