//! Identity service boundary.
//!
//! [`IdentityClient`] is the three-call surface the auth subsystem needs from
//! the remote identity service: validate a token ("who am I"), exchange a
//! handle/password for a token, and obtain a third-party authorization URL.
//! [`HttpIdentityClient`] implements it over HTTPS with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{AuthError, Result};
use crate::types::OAuthProvider;

/// Default identity service base URL.
const DEFAULT_BASE_URL: &str = "http://localhost:9700";

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const WHOAMI_PATH: &str = "/api/iam/v1/whoami";
const LOGIN_PATH: &str = "/api/iam/v1/login";
const AUTHZ_URL_PATH: &str = "/api/iam/v1/oauth2/authz/url";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Raw user profile as returned by the identity service. Field names vary;
/// normalize with [`UserRecord::from_profile`](crate::UserRecord::from_profile).
pub type UserProfile = Value;

/// Response to a handle/password login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response to an authorization-URL request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationUrl {
    #[serde(rename = "loginURL")]
    pub login_url: String,
}

/// Response body of the "who am I" endpoint.
#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    #[serde(default)]
    profile: Option<Value>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The identity service calls the auth subsystem depends on.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Resolve a token to its user profile.
    ///
    /// `Ok(None)` means the service answered but carried no profile; callers
    /// treat that the same as a rejected token.
    async fn validate(&self, token: &str) -> Result<Option<UserProfile>>;

    /// Exchange credentials for a token.
    async fn login(&self, handle: &str, password: &str) -> Result<LoginResponse>;

    /// Ask for the provider's authorization URL for this callback and nonce.
    async fn authorization_url(
        &self,
        provider: OAuthProvider,
        callback_uri: &str,
        nonce: &str,
    ) -> Result<AuthorizationUrl>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for [`HttpIdentityClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Base URL of the identity service, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: concat!("tether/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`IdentityClient`] over the identity service's REST API.
pub struct HttpIdentityClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpIdentityClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UrlParse`] if `base_url` is not a valid URL, or
    /// [`AuthError::Network`] if the HTTP client cannot be constructed.
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { base_url, client })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Turn a non-success response into [`AuthError::Identity`].
    async fn status_error(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            body
        };
        AuthError::Identity {
            status: status.as_u16(),
            reason,
        }
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn validate(&self, token: &str) -> Result<Option<UserProfile>> {
        tracing::debug!(url = %self.endpoint(WHOAMI_PATH), "validating token");

        let response = self
            .client
            .get(self.endpoint(WHOAMI_PATH))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: WhoamiResponse = response.json().await?;
        Ok(body.profile.filter(|p| !p.is_null()))
    }

    async fn login(&self, handle: &str, password: &str) -> Result<LoginResponse> {
        tracing::debug!(url = %self.endpoint(LOGIN_PATH), handle = handle, "logging in");

        let response = self
            .client
            .post(self.endpoint(LOGIN_PATH))
            .json(&serde_json::json!({ "handle": handle, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<LoginResponse>(&body) {
            Ok(parsed) if status.is_success() => Ok(parsed),
            // Rejections keep the server's own message when it sent one.
            Ok(parsed) => Ok(LoginResponse {
                success: false,
                token: None,
                message: parsed.message,
            }),
            Err(_) if status.is_success() => Err(AuthError::Identity {
                status: status.as_u16(),
                reason: format!("unexpected login response: {body}"),
            }),
            Err(_) => Ok(LoginResponse {
                success: false,
                token: None,
                message: Some(
                    status
                        .canonical_reason()
                        .unwrap_or("login rejected")
                        .to_string(),
                ),
            }),
        }
    }

    async fn authorization_url(
        &self,
        provider: OAuthProvider,
        callback_uri: &str,
        nonce: &str,
    ) -> Result<AuthorizationUrl> {
        let mut url = Url::parse(&self.endpoint(AUTHZ_URL_PATH))?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("callback_uri", callback_uri)
            .append_pair("nonce", nonce);

        tracing::debug!(provider = %provider, "requesting authorization url");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        Ok(response.json().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
