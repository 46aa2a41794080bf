//! Session lifecycle manager.
//!
//! The [`AuthenticationManager`] is the entry point for consuming code. It
//! picks a strategy for each [`AuthOptions`], runs it, publishes the
//! resulting user and token as the current session, and persists the token
//! through the configured [`TokenStore`].

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{AuthError, Result};
use crate::handshake::{HandshakeConfig, OAuthHandshakeController};
use crate::host::BrowserHost;
use crate::identity::IdentityClient;
use crate::store::TokenStore;
use crate::strategy::{AuthStrategy, StrategyContext};
use crate::types::{AuthOptions, AuthResult, UserRecord};

/// The in-memory session. User and token are always replaced together.
#[derive(Debug, Default)]
struct Session {
    user: Option<UserRecord>,
    token: Option<String>,
}

// ---------------------------------------------------------------------------
// AuthenticationManager
// ---------------------------------------------------------------------------

/// Owns the current session and the collaborators needed to establish it.
pub struct AuthenticationManager {
    identity: Arc<dyn IdentityClient>,
    store: Arc<dyn TokenStore>,
    handshake: Option<OAuthHandshakeController>,
    session: RwLock<Session>,
}

impl AuthenticationManager {
    /// Create a manager without browser support.
    pub fn new(identity: Arc<dyn IdentityClient>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            identity,
            store,
            handshake: None,
            session: RwLock::new(Session::default()),
        }
    }

    /// Enable the browser OAuth strategy on `host`.
    pub fn with_browser(mut self, host: Arc<dyn BrowserHost>, config: HandshakeConfig) -> Self {
        self.handshake = Some(OAuthHandshakeController::new(
            Arc::clone(&self.identity),
            host,
            config,
        ));
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// The handshake controller, when browser support is enabled.
    pub fn handshake(&self) -> Option<&OAuthHandshakeController> {
        self.handshake.as_ref()
    }

    /// The strategy `authenticate` would run for `options`.
    pub fn select_strategy(&self, options: &AuthOptions) -> Option<AuthStrategy> {
        AuthStrategy::select(options, &self.context())
    }

    /// Establish a session.
    ///
    /// On success the session is replaced and, unless `options.no_store` is
    /// set or the store is unavailable, the token and user are persisted
    /// before this returns. A failed persist is logged and does not fail the
    /// call. On failure the session is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoApplicableStrategy`] when no strategy matches,
    /// otherwise the selected strategy's error.
    pub async fn authenticate(&self, options: &AuthOptions) -> Result<AuthResult> {
        let ctx = self.context();
        let strategy = AuthStrategy::select(options, &ctx).ok_or_else(|| {
            tracing::warn!("no authentication strategy matched the given options");
            AuthError::NoApplicableStrategy
        })?;

        tracing::info!(strategy = strategy.name(), "authenticating");

        let result = match strategy.authenticate(options, &ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(strategy = strategy.name(), error = %e, "authentication failed");
                return Err(e);
            }
        };

        {
            let mut session = self.write_session();
            session.user = Some(result.user.clone());
            session.token = Some(result.token.clone());
        }

        if options.no_store {
            tracing::debug!("persistence disabled for this session");
        } else {
            self.persist(&result).await;
        }

        tracing::info!(
            strategy = strategy.name(),
            user = %result.user.display_name(),
            "authenticated"
        );
        Ok(result)
    }

    /// The authenticated user, if any.
    pub fn current_user(&self) -> Option<UserRecord> {
        self.read_session().user.clone()
    }

    /// The current session token, if any.
    pub fn current_token(&self) -> Option<String> {
        self.read_session().token.clone()
    }

    /// Whether a session token is set.
    pub fn is_authenticated(&self) -> bool {
        self.read_session().token.is_some()
    }

    /// Make `token` the current token and persist it when the store is
    /// available.
    ///
    /// The token is not validated. If it differs from the current token the
    /// current user is cleared, in memory and in the store, since it no
    /// longer describes this token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if a backend write fails. The
    /// in-memory token is updated regardless.
    pub async fn store_token(&self, token: &str) -> Result<()> {
        let replaced = {
            let mut session = self.write_session();
            let replaced = session.token.as_deref() != Some(token);
            if replaced {
                session.user = None;
            }
            session.token = Some(token.to_string());
            replaced
        };

        if self.store.is_available() {
            if replaced {
                self.store.delete_user().await?;
            }
            self.store.set(token).await?;
            tracing::debug!(backend = self.store.backend_name(), replaced, "token stored");
        }
        Ok(())
    }

    /// Read the persisted token without touching the session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the backend read fails.
    pub async fn stored_token(&self) -> Result<Option<String>> {
        if !self.store.is_available() {
            return Ok(None);
        }
        Ok(self.store.get().await?)
    }

    /// End the session: clear the in-memory user and token, then everything
    /// the store persisted.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the backend delete fails. The
    /// in-memory session is cleared regardless.
    pub async fn clear_stored_token(&self) -> Result<()> {
        *self.write_session() = Session::default();

        if self.store.is_available() {
            self.store.clear().await?;
        }
        tracing::info!(backend = self.store.backend_name(), "session cleared");
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    fn context(&self) -> StrategyContext<'_> {
        StrategyContext {
            identity: self.identity.as_ref(),
            store: self.store.as_ref(),
            handshake: self.handshake.as_ref(),
        }
    }

    async fn persist(&self, result: &AuthResult) {
        let backend = self.store.backend_name();
        if !self.store.is_available() {
            tracing::debug!(backend, "token store unavailable, not persisting");
            return;
        }

        if let Err(e) = self.store.set(&result.token).await {
            tracing::warn!(backend, error = %e, "failed to persist token");
            return;
        }
        if let Err(e) = self.store.set_user(&result.user).await {
            tracing::warn!(backend, error = %e, "failed to persist user record");
        }
    }

    fn read_session(&self) -> RwLockReadGuard<'_, Session> {
        // Session fields are replaced wholesale, so a poisoned lock still
        // holds a consistent value.
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Session> {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for AuthenticationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationManager")
            .field("store", &self.store.backend_name())
            .field("browser", &self.handshake.is_some())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::{StoreError, StoreResult};
    use crate::identity::{AuthorizationUrl, LoginResponse, UserProfile};
    use crate::store::{DisabledTokenStore, MemoryTokenStore};
    use crate::types::OAuthProvider;

    /// Identity double with a fixed token -> handle table.
    #[derive(Default)]
    struct TableIdentity {
        users: HashMap<&'static str, &'static str>,
        login: LoginResponse,
        calls: Mutex<Vec<String>>,
    }

    impl TableIdentity {
        fn with_user(mut self, token: &'static str, handle: &'static str) -> Self {
            self.users.insert(token, handle);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IdentityClient for TableIdentity {
        async fn validate(&self, token: &str) -> Result<Option<UserProfile>> {
            self.calls.lock().unwrap().push(format!("validate:{token}"));
            match self.users.get(token) {
                Some(handle) => Ok(Some(json!({"id": token, "handle_s": handle}))),
                None => Err(AuthError::Identity {
                    status: 401,
                    reason: "unauthorized".into(),
                }),
            }
        }

        async fn login(&self, handle: &str, _password: &str) -> Result<LoginResponse> {
            self.calls.lock().unwrap().push(format!("login:{handle}"));
            Ok(self.login.clone())
        }

        async fn authorization_url(
            &self,
            _provider: OAuthProvider,
            _callback_uri: &str,
            _nonce: &str,
        ) -> Result<AuthorizationUrl> {
            self.calls.lock().unwrap().push("authorization_url".into());
            Ok(AuthorizationUrl {
                login_url: "https://idp/authorize".into(),
            })
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl TokenStore for BrokenStore {
        fn backend_name(&self) -> &'static str {
            "broken"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn get(&self) -> StoreResult<Option<String>> {
            Ok(None)
        }

        async fn set(&self, _token: &str) -> StoreResult<()> {
            Err(StoreError::Backend {
                backend: "broken",
                reason: "read-only".into(),
            })
        }

        async fn delete(&self) -> StoreResult<()> {
            Err(StoreError::Backend {
                backend: "broken",
                reason: "read-only".into(),
            })
        }
    }

    fn manager(identity: TableIdentity, store: Arc<dyn TokenStore>) -> (Arc<TableIdentity>, AuthenticationManager) {
        let identity = Arc::new(identity);
        let manager = AuthenticationManager::new(identity.clone(), store);
        (identity, manager)
    }

    #[tokio::test]
    async fn token_login_publishes_and_persists() {
        let store = Arc::new(MemoryTokenStore::new());
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), store.clone());

        let result = manager.authenticate(&AuthOptions::with_token("T1")).await.unwrap();

        assert_eq!(result.user.handle, "ada");
        assert_eq!(manager.current_token().as_deref(), Some("T1"));
        assert_eq!(manager.current_user().unwrap().handle, "ada");
        assert!(manager.is_authenticated());
        assert_eq!(store.get().await.unwrap().as_deref(), Some("T1"));
        assert_eq!(store.get_user().await.unwrap().unwrap().handle, "ada");
    }

    #[tokio::test]
    async fn no_store_keeps_session_in_memory_only() {
        let store = Arc::new(MemoryTokenStore::new());
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), store.clone());

        manager
            .authenticate(&AuthOptions::with_token("T1").no_store())
            .await
            .unwrap();

        assert!(manager.is_authenticated());
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_token_leaves_session_empty() {
        let store = Arc::new(MemoryTokenStore::new());
        let (_, manager) = manager(TableIdentity::default(), store.clone());

        let err = manager
            .authenticate(&AuthOptions::with_token("nope"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidToken { .. }));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.current_token(), None);
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failure_preserves_previous_session() {
        let store = Arc::new(MemoryTokenStore::new());
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), store);

        manager.authenticate(&AuthOptions::with_token("T1")).await.unwrap();
        manager
            .authenticate(&AuthOptions::with_token("expired"))
            .await
            .unwrap_err();

        assert_eq!(manager.current_token().as_deref(), Some("T1"));
        assert_eq!(manager.current_user().unwrap().handle, "ada");
    }

    #[tokio::test]
    async fn bad_credentials_surface_server_message() {
        let identity = TableIdentity {
            login: LoginResponse {
                success: false,
                token: None,
                message: Some("bad credentials".into()),
            },
            ..TableIdentity::default()
        };
        let (identity, manager) = manager(identity, Arc::new(DisabledTokenStore));

        let err = manager
            .authenticate(&AuthOptions::with_credentials("a@b.com", "x"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::LoginFailed { ref message } if message == "bad credentials"));
        assert!(!manager.is_authenticated());
        assert_eq!(identity.calls(), ["login:a@b.com"]);
    }

    #[tokio::test]
    async fn credentials_login_validates_issued_token() {
        let identity = TableIdentity {
            login: LoginResponse {
                success: true,
                token: Some("issued".into()),
                message: None,
            },
            ..TableIdentity::default()
        }
        .with_user("issued", "grace");
        let (identity, manager) = manager(identity, Arc::new(MemoryTokenStore::new()));

        let result = manager
            .authenticate(&AuthOptions::with_credentials("grace", "pw"))
            .await
            .unwrap();

        assert_eq!(result.token, "issued");
        assert_eq!(result.user.handle, "grace");
        assert_eq!(identity.calls(), ["login:grace", "validate:issued"]);
    }

    #[tokio::test]
    async fn empty_options_resume_stored_session() {
        let store = Arc::new(MemoryTokenStore::with_token("saved"));
        let (_, manager) = manager(TableIdentity::default().with_user("saved", "ada"), store);

        let result = manager.authenticate(&AuthOptions::default()).await.unwrap();
        assert_eq!(result.token, "saved");
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn empty_options_with_empty_store() {
        let (_, manager) = manager(TableIdentity::default(), Arc::new(MemoryTokenStore::new()));
        let err = manager.authenticate(&AuthOptions::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::NoStoredSession));
    }

    #[tokio::test]
    async fn nothing_applicable_without_store() {
        let (identity, manager) = manager(TableIdentity::default(), Arc::new(DisabledTokenStore));
        let err = manager.authenticate(&AuthOptions::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::NoApplicableStrategy));
        assert!(identity.calls().is_empty());
    }

    #[tokio::test]
    async fn browser_without_host_is_unavailable() {
        let (identity, manager) = manager(TableIdentity::default(), Arc::new(MemoryTokenStore::new()));
        assert_eq!(
            manager.select_strategy(&AuthOptions::with_browser(None)),
            Some(AuthStrategy::BrowserOAuth)
        );
        let err = manager
            .authenticate(&AuthOptions::with_browser(Some(OAuthProvider::LinkedIn)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BrowserUnavailable));
        assert!(identity.calls().is_empty());
    }

    #[tokio::test]
    async fn persist_failure_does_not_fail_authentication() {
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), Arc::new(BrokenStore));

        let result = manager.authenticate(&AuthOptions::with_token("T1")).await;
        assert!(result.is_ok());
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn store_token_replaces_token_and_drops_stale_user() {
        let store = Arc::new(MemoryTokenStore::new());
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), store.clone());
        manager.authenticate(&AuthOptions::with_token("T1")).await.unwrap();

        // Same token: the user still describes it.
        manager.store_token("T1").await.unwrap();
        assert!(manager.is_authenticated());

        manager.store_token("T2").await.unwrap();
        assert_eq!(manager.current_token().as_deref(), Some("T2"));
        assert_eq!(manager.current_user(), None);
        assert!(manager.is_authenticated());
        assert_eq!(manager.stored_token().await.unwrap().as_deref(), Some("T2"));
        assert_eq!(store.get_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_token_alone_authenticates() {
        let store = Arc::new(MemoryTokenStore::new());
        let (identity, manager) = manager(TableIdentity::default(), store.clone());
        assert!(!manager.is_authenticated());

        manager.store_token("T").await.unwrap();

        assert!(manager.is_authenticated());
        assert_eq!(manager.current_token().as_deref(), Some("T"));
        assert_eq!(manager.current_user(), None);
        assert_eq!(store.get().await.unwrap().as_deref(), Some("T"));
        assert!(identity.calls().is_empty());
    }

    #[tokio::test]
    async fn same_token_keeps_stored_user() {
        let store = Arc::new(MemoryTokenStore::new());
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), store.clone());
        manager.authenticate(&AuthOptions::with_token("T1")).await.unwrap();

        manager.store_token("T1").await.unwrap();

        assert_eq!(store.get_user().await.unwrap().map(|u| u.handle), Some("ada".to_string()));
    }

    #[tokio::test]
    async fn store_token_reports_backend_failure() {
        let (_, manager) = manager(TableIdentity::default(), Arc::new(BrokenStore));
        let err = manager.store_token("T").await.unwrap_err();
        assert!(matches!(err, AuthError::Store(_)));
        assert_eq!(manager.current_token().as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn clear_ends_the_session_everywhere() {
        let store = Arc::new(MemoryTokenStore::new());
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), store.clone());
        manager.authenticate(&AuthOptions::with_token("T1")).await.unwrap();

        manager.clear_stored_token().await.unwrap();

        assert!(!manager.is_authenticated());
        assert_eq!(manager.current_token(), None);
        assert_eq!(manager.stored_token().await.unwrap(), None);
        assert_eq!(store.get_user().await.unwrap(), None);

        let err = manager.authenticate(&AuthOptions::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::NoStoredSession));
    }

    #[tokio::test]
    async fn disabled_store_is_never_touched() {
        let (_, manager) = manager(TableIdentity::default().with_user("T1", "ada"), Arc::new(DisabledTokenStore));
        manager.authenticate(&AuthOptions::with_token("T1")).await.unwrap();
        manager.store_token("T1").await.unwrap();
        assert_eq!(manager.stored_token().await.unwrap(), None);
        manager.clear_stored_token().await.unwrap();
        assert!(!manager.is_authenticated());
    }

    #[test]
    fn manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthenticationManager>();
    }
}
