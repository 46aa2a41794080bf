//! Core data model: options in, results out, and the normalized user record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthError;

// ---------------------------------------------------------------------------
// UserRecord
// ---------------------------------------------------------------------------

/// Identity fields of the authenticated user in one stable shape.
///
/// The identity service returns several field spellings (`handle_s` vs
/// `handle`, `first_name_t` vs `firstName`, ...). [`UserRecord::from_profile`]
/// folds all of them into this struct; missing text fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    pub id: String,
    pub uid: String,
    pub handle: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
}

/// Candidate keys per field, in lookup order.
const ID_KEYS: &[&str] = &["id"];
const UID_KEYS: &[&str] = &["uid"];
const HANDLE_KEYS: &[&str] = &["handle_s", "handle"];
const EMAIL_KEYS: &[&str] = &["email_s", "email"];
const FIRST_NAME_KEYS: &[&str] = &["first_name_t", "first_name", "firstName"];
const LAST_NAME_KEYS: &[&str] = &["last_name_t", "last_name", "lastName"];
const AVATAR_KEYS: &[&str] = &["avatar_url_s", "avatar_url", "avatarUrl"];

impl UserRecord {
    /// Normalize an identity-service profile into a [`UserRecord`].
    ///
    /// Total over all JSON inputs: non-object values yield an all-empty
    /// record, and numeric ids are rendered as strings.
    pub fn from_profile(profile: &Value) -> Self {
        let pick = |keys: &[&str]| -> String {
            keys.iter()
                .filter_map(|k| profile.get(*k))
                .filter_map(|v| match v {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .next()
                .unwrap_or_default()
        };

        Self {
            id: pick(ID_KEYS),
            uid: pick(UID_KEYS),
            handle: pick(HANDLE_KEYS),
            email: pick(EMAIL_KEYS),
            first_name: pick(FIRST_NAME_KEYS),
            last_name: pick(LAST_NAME_KEYS),
            avatar_url: pick(AVATAR_KEYS),
        }
    }

    /// "First Last", or the handle when no name is known.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.handle.clone()
        } else {
            full.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// AuthResult
// ---------------------------------------------------------------------------

/// A successfully established session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub user: UserRecord,
    pub token: String,
}

// ---------------------------------------------------------------------------
// OAuthProvider
// ---------------------------------------------------------------------------

/// Third-party identity providers supported by the browser flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    #[default]
    GitHub,
    LinkedIn,
}

impl OAuthProvider {
    /// Every supported provider.
    pub const ALL: [OAuthProvider; 2] = [Self::GitHub, Self::LinkedIn];

    /// Wire name sent to the identity service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::LinkedIn => "linkedin",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AuthError::UnsupportedProvider {
                provider: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// AuthOptions
// ---------------------------------------------------------------------------

/// Input to [`AuthenticationManager::authenticate`](crate::AuthenticationManager::authenticate).
///
/// Every field is optional. Only the fields consulted by the selected
/// strategy matter; the rest are ignored rather than rejected. Empty strings
/// count as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthOptions {
    pub token: Option<String>,
    pub handle: Option<String>,
    pub password: Option<String>,
    pub use_browser: bool,
    /// Provider name; parsed only when the browser strategy runs.
    pub oauth_provider: Option<String>,
    pub callback_uri: Option<String>,
    pub nonce: Option<String>,
    /// Open a popup (default) instead of navigating the whole page.
    pub use_popup: bool,
    /// Keep the result in memory only.
    pub no_store: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            token: None,
            handle: None,
            password: None,
            use_browser: false,
            oauth_provider: None,
            callback_uri: None,
            nonce: None,
            use_popup: true,
            no_store: false,
        }
    }
}

impl AuthOptions {
    /// Options for the token strategy.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Options for the credentials strategy.
    pub fn with_credentials(handle: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            handle: Some(handle.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Options for the browser OAuth strategy.
    pub fn with_browser(provider: Option<OAuthProvider>) -> Self {
        Self {
            use_browser: true,
            oauth_provider: provider.map(|p| p.as_str().to_string()),
            ..Self::default()
        }
    }

    /// Disable persistence of the resulting session.
    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    pub(crate) fn token(&self) -> Option<&str> {
        present(&self.token)
    }

    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        Some((present(&self.handle)?, present(&self.password)?))
    }

    /// True when the caller named an explicit method.
    pub(crate) fn has_explicit_method(&self) -> bool {
        self.use_browser
            || present(&self.token).is_some()
            || present(&self.handle).is_some()
            || present(&self.password).is_some()
    }

    /// Resolve the requested provider, defaulting to GitHub.
    pub(crate) fn provider(&self) -> Result<OAuthProvider, AuthError> {
        match present(&self.oauth_provider) {
            Some(name) => name.parse(),
            None => Ok(OAuthProvider::default()),
        }
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
