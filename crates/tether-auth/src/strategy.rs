//! Authentication strategies.
//!
//! The four ways to establish a session form a closed set, tried in a fixed
//! order so that the most explicit input wins:
//!
//! | Strategy       | Runs when                                               |
//! |----------------|---------------------------------------------------------|
//! | `Token`        | a token is given                                        |
//! | `Credentials`  | both handle and password are given                      |
//! | `Storage`      | the store is available and no explicit method was named |
//! | `BrowserOAuth` | `use_browser` is set                                    |
//!
//! Once a strategy is selected its failure is final; there is no fallback to
//! the next one.

use std::fmt;

use crate::error::{AuthError, Result};
use crate::handshake::{HandshakeRequest, OAuthHandshakeController};
use crate::identity::IdentityClient;
use crate::store::TokenStore;
use crate::types::{AuthOptions, AuthResult, UserRecord};

/// Collaborators a strategy may use.
pub struct StrategyContext<'a> {
    pub identity: &'a dyn IdentityClient,
    pub store: &'a dyn TokenStore,
    pub handshake: Option<&'a OAuthHandshakeController>,
}

/// One way of establishing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStrategy {
    Token,
    Credentials,
    Storage,
    BrowserOAuth,
}

impl AuthStrategy {
    /// Selection order.
    pub const PRECEDENCE: [AuthStrategy; 4] = [
        Self::Token,
        Self::Credentials,
        Self::Storage,
        Self::BrowserOAuth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Credentials => "credentials",
            Self::Storage => "storage",
            Self::BrowserOAuth => "browser_oauth",
        }
    }

    /// First strategy in [`PRECEDENCE`](Self::PRECEDENCE) able to handle
    /// `options`.
    pub fn select(options: &AuthOptions, ctx: &StrategyContext<'_>) -> Option<Self> {
        Self::PRECEDENCE
            .into_iter()
            .find(|strategy| strategy.can_handle(options, ctx))
    }

    /// Whether this strategy applies to `options`.
    pub fn can_handle(&self, options: &AuthOptions, ctx: &StrategyContext<'_>) -> bool {
        match self {
            Self::Token => options.token().is_some(),
            Self::Credentials => options.credentials().is_some(),
            Self::Storage => ctx.store.is_available() && !options.has_explicit_method(),
            Self::BrowserOAuth => options.use_browser,
        }
    }

    /// Run the strategy.
    ///
    /// # Errors
    ///
    /// - `Token`: [`AuthError::InvalidToken`].
    /// - `Credentials`: [`AuthError::LoginFailed`], then
    ///   [`AuthError::InvalidToken`] if the issued token does not validate.
    /// - `Storage`: [`AuthError::NoStoredSession`], [`AuthError::Store`],
    ///   [`AuthError::InvalidToken`].
    /// - `BrowserOAuth`: [`AuthError::UnsupportedProvider`],
    ///   [`AuthError::BrowserUnavailable`], and every handshake failure.
    pub async fn authenticate(
        &self,
        options: &AuthOptions,
        ctx: &StrategyContext<'_>,
    ) -> Result<AuthResult> {
        match self {
            Self::Token => {
                let token = options.token().ok_or(AuthError::NoApplicableStrategy)?;
                validate_token(ctx.identity, token).await
            }
            Self::Credentials => {
                let (handle, password) = options
                    .credentials()
                    .ok_or(AuthError::NoApplicableStrategy)?;
                login(ctx.identity, handle, password).await
            }
            Self::Storage => {
                let token = ctx
                    .store
                    .get()
                    .await?
                    .filter(|t| !t.is_empty())
                    .ok_or(AuthError::NoStoredSession)?;
                tracing::debug!(backend = ctx.store.backend_name(), "found stored token");
                validate_token(ctx.identity, &token).await
            }
            Self::BrowserOAuth => {
                let request = HandshakeRequest::from_options(options)?;
                let handshake = ctx.handshake.ok_or(AuthError::BrowserUnavailable)?;
                handshake.run(request).await
            }
        }
    }
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve `token` to a user through the identity service.
async fn validate_token(identity: &dyn IdentityClient, token: &str) -> Result<AuthResult> {
    match identity.validate(token).await {
        Ok(Some(profile)) => Ok(AuthResult {
            user: UserRecord::from_profile(&profile),
            token: token.to_string(),
        }),
        Ok(None) => Err(AuthError::InvalidToken {
            reason: "identity service returned no profile".to_string(),
        }),
        Err(e) => Err(AuthError::InvalidToken {
            reason: e.to_string(),
        }),
    }
}

/// Log in, then look the user up with the issued token. The login response
/// is never trusted to carry the profile.
async fn login(identity: &dyn IdentityClient, handle: &str, password: &str) -> Result<AuthResult> {
    let response = identity.login(handle, password).await?;

    let token = match response.token.filter(|t| !t.is_empty()) {
        Some(token) if response.success => token,
        _ => {
            return Err(AuthError::LoginFailed {
                message: response
                    .message
                    .unwrap_or_else(|| "login failed".to_string()),
            });
        }
    };

    validate_token(identity, &token).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::identity::{AuthorizationUrl, LoginResponse, UserProfile};
    use crate::store::{DisabledTokenStore, MemoryTokenStore};
    use crate::types::OAuthProvider;

    /// Identity double: accepts exactly `valid_token`.
    struct StubIdentity {
        valid_token: &'static str,
        login: LoginResponse,
        validated: Mutex<Vec<String>>,
    }

    impl StubIdentity {
        fn new(valid_token: &'static str) -> Self {
            Self {
                valid_token,
                login: LoginResponse::default(),
                validated: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IdentityClient for StubIdentity {
        async fn validate(&self, token: &str) -> Result<Option<UserProfile>> {
            self.validated.lock().unwrap().push(token.to_string());
            if token == self.valid_token {
                Ok(Some(json!({"id": "1", "handle_s": "ada"})))
            } else {
                Err(AuthError::Identity {
                    status: 401,
                    reason: "expired".into(),
                })
            }
        }

        async fn login(&self, _handle: &str, _password: &str) -> Result<LoginResponse> {
            Ok(self.login.clone())
        }

        async fn authorization_url(
            &self,
            _provider: OAuthProvider,
            _callback_uri: &str,
            _nonce: &str,
        ) -> Result<AuthorizationUrl> {
            Ok(AuthorizationUrl {
                login_url: "https://idp/authorize".into(),
            })
        }
    }

    fn ctx<'a>(identity: &'a StubIdentity, store: &'a dyn TokenStore) -> StrategyContext<'a> {
        StrategyContext {
            identity,
            store,
            handshake: None,
        }
    }

    #[test]
    fn token_takes_precedence_over_everything() {
        let identity = StubIdentity::new("T");
        let store = MemoryTokenStore::with_token("stored");
        let options = AuthOptions {
            token: Some("T".into()),
            handle: Some("h".into()),
            password: Some("p".into()),
            use_browser: true,
            ..AuthOptions::default()
        };
        assert_eq!(
            AuthStrategy::select(&options, &ctx(&identity, &store)),
            Some(AuthStrategy::Token)
        );
    }

    #[test]
    fn credentials_beat_browser() {
        let identity = StubIdentity::new("T");
        let options = AuthOptions {
            use_browser: true,
            ..AuthOptions::with_credentials("h", "p")
        };
        assert_eq!(
            AuthStrategy::select(&options, &ctx(&identity, &DisabledTokenStore)),
            Some(AuthStrategy::Credentials)
        );
    }

    #[test]
    fn handle_without_password_is_not_credentials() {
        let identity = StubIdentity::new("T");
        let store = MemoryTokenStore::new();
        let options = AuthOptions {
            handle: Some("h".into()),
            ..AuthOptions::default()
        };
        // An explicit (if incomplete) method also rules out storage.
        assert_eq!(AuthStrategy::select(&options, &ctx(&identity, &store)), None);
    }

    #[test]
    fn storage_is_the_fallback_only_when_available() {
        let identity = StubIdentity::new("T");
        let store = MemoryTokenStore::new();
        let empty = AuthOptions::default();
        assert_eq!(
            AuthStrategy::select(&empty, &ctx(&identity, &store)),
            Some(AuthStrategy::Storage)
        );
        assert_eq!(
            AuthStrategy::select(&empty, &ctx(&identity, &DisabledTokenStore)),
            None
        );
    }

    #[test]
    fn browser_flag_selects_browser_even_with_store() {
        let identity = StubIdentity::new("T");
        let store = MemoryTokenStore::with_token("stored");
        let options = AuthOptions::with_browser(None);
        assert_eq!(
            AuthStrategy::select(&options, &ctx(&identity, &store)),
            Some(AuthStrategy::BrowserOAuth)
        );
    }

    #[test]
    fn irrelevant_fields_are_ignored() {
        let identity = StubIdentity::new("T");
        let options = AuthOptions {
            token: Some("T".into()),
            oauth_provider: Some("not-a-provider".into()),
            callback_uri: Some("::::".into()),
            ..AuthOptions::default()
        };
        assert_eq!(
            AuthStrategy::select(&options, &ctx(&identity, &DisabledTokenStore)),
            Some(AuthStrategy::Token)
        );
    }

    #[tokio::test]
    async fn token_strategy_validates() {
        let identity = StubIdentity::new("T1");
        let result = AuthStrategy::Token
            .authenticate(&AuthOptions::with_token("T1"), &ctx(&identity, &DisabledTokenStore))
            .await
            .unwrap();
        assert_eq!(result.token, "T1");
        assert_eq!(result.user.handle, "ada");
    }

    #[tokio::test]
    async fn token_strategy_maps_validation_failure() {
        let identity = StubIdentity::new("other");
        let err = AuthStrategy::Token
            .authenticate(&AuthOptions::with_token("T1"), &ctx(&identity, &DisabledTokenStore))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn credentials_failure_carries_server_message() {
        let mut identity = StubIdentity::new("T");
        identity.login = LoginResponse {
            success: false,
            token: None,
            message: Some("bad credentials".into()),
        };
        let err = AuthStrategy::Credentials
            .authenticate(
                &AuthOptions::with_credentials("a@b.com", "x"),
                &ctx(&identity, &DisabledTokenStore),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LoginFailed { message } if message == "bad credentials"));
    }

    #[tokio::test]
    async fn credentials_success_without_token_fails() {
        let mut identity = StubIdentity::new("T");
        identity.login = LoginResponse {
            success: true,
            token: None,
            message: None,
        };
        let err = AuthStrategy::Credentials
            .authenticate(
                &AuthOptions::with_credentials("a", "b"),
                &ctx(&identity, &DisabledTokenStore),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LoginFailed { message } if message == "login failed"));
    }

    #[tokio::test]
    async fn credentials_validate_the_issued_token() {
        let mut identity = StubIdentity::new("issued");
        identity.login = LoginResponse {
            success: true,
            token: Some("issued".into()),
            message: None,
        };
        let result = AuthStrategy::Credentials
            .authenticate(
                &AuthOptions::with_credentials("a", "b"),
                &ctx(&identity, &DisabledTokenStore),
            )
            .await
            .unwrap();
        assert_eq!(result.token, "issued");
        assert_eq!(identity.validated.lock().unwrap().as_slice(), ["issued"]);
    }

    #[tokio::test]
    async fn storage_strategy_resumes_stored_token() {
        let identity = StubIdentity::new("stored");
        let store = MemoryTokenStore::with_token("stored");
        let result = AuthStrategy::Storage
            .authenticate(&AuthOptions::default(), &ctx(&identity, &store))
            .await
            .unwrap();
        assert_eq!(result.token, "stored");
    }

    #[tokio::test]
    async fn storage_strategy_without_token() {
        let identity = StubIdentity::new("T");
        let store = MemoryTokenStore::new();
        let err = AuthStrategy::Storage
            .authenticate(&AuthOptions::default(), &ctx(&identity, &store))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoStoredSession));
    }

    #[tokio::test]
    async fn browser_strategy_checks_provider_before_host() {
        let identity = StubIdentity::new("T");
        let options = AuthOptions {
            use_browser: true,
            oauth_provider: Some("gitlab".into()),
            ..AuthOptions::default()
        };
        let err = AuthStrategy::BrowserOAuth
            .authenticate(&options, &ctx(&identity, &DisabledTokenStore))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedProvider { .. }));

        let err = AuthStrategy::BrowserOAuth
            .authenticate(&AuthOptions::with_browser(None), &ctx(&identity, &DisabledTokenStore))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BrowserUnavailable));
    }

    #[test]
    fn precedence_order_and_names() {
        let names: Vec<_> = AuthStrategy::PRECEDENCE.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, ["token", "credentials", "storage", "browser_oauth"]);
    }
}
