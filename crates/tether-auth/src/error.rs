//! Error types for the auth crate.
//!
//! Every session-establishment failure surfaces through [`AuthError`]. The
//! first group of variants is the strategy/handshake taxonomy callers are
//! expected to show to users; the rest are transport and persistence
//! failures. Token-store backends report through [`StoreError`], which is
//! carried by [`AuthError::Store`].

/// Unified error type for the tether auth subsystem.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // -- Strategy failures --------------------------------------------------
    /// The identity service rejected the token or returned no profile.
    #[error("invalid token: {reason}")]
    InvalidToken {
        /// Why validation failed.
        reason: String,
    },

    /// The identity service refused the handle/password pair.
    #[error("login failed: {message}")]
    LoginFailed {
        /// Message reported by the identity service.
        message: String,
    },

    /// The storage strategy found nothing to resume.
    #[error("no stored session")]
    NoStoredSession,

    /// The requested OAuth provider is outside the supported set.
    #[error("unsupported oauth provider: {provider}")]
    UnsupportedProvider {
        /// The provider name as supplied by the caller.
        provider: String,
    },

    /// No option combination matched any strategy.
    #[error("no applicable authentication strategy")]
    NoApplicableStrategy,

    // -- Handshake failures -------------------------------------------------
    /// The host refused to open the authorization popup.
    #[error("authorization popup was blocked")]
    PopupBlocked,

    /// The callback carried an `error` field.
    #[error("oauth error: {error}")]
    OAuthError {
        /// Error string relayed from the callback page.
        error: String,
    },

    /// A same-origin callback arrived without both `user` and `token`.
    #[error("oauth callback is missing user or token")]
    IncompleteCallback,

    /// The popup was closed before a callback arrived.
    #[error("authorization cancelled by user")]
    UserCancelled,

    /// Nothing settled the handshake before the deadline.
    #[error("oauth handshake timed out after {timeout_secs} seconds")]
    HandshakeTimeout {
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// The callback URI is not an absolute URL with a tuple origin.
    #[error("invalid callback uri: {uri}")]
    InvalidCallbackUri {
        /// The offending URI.
        uri: String,
    },

    /// Browser authentication was requested on a manager without a host.
    #[error("no browser host is configured")]
    BrowserUnavailable,

    // -- Ambient failures ---------------------------------------------------
    /// The identity service answered with a non-success status.
    #[error("identity service returned HTTP {status}: {reason}")]
    Identity {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        reason: String,
    },

    /// Transport failure talking to the identity service.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A token-store backend failed.
    #[error("token store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error (e.g. from a loopback listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload-free discriminant of [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    InvalidToken,
    LoginFailed,
    NoStoredSession,
    UnsupportedProvider,
    NoApplicableStrategy,
    PopupBlocked,
    OAuthError,
    IncompleteCallback,
    UserCancelled,
    HandshakeTimeout,
    InvalidCallbackUri,
    BrowserUnavailable,
    Identity,
    Network,
    Store,
    Serialization,
    UrlParse,
    Io,
}

impl AuthError {
    /// The kind of this error, for callers that only branch on the category.
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::InvalidToken { .. } => AuthErrorKind::InvalidToken,
            Self::LoginFailed { .. } => AuthErrorKind::LoginFailed,
            Self::NoStoredSession => AuthErrorKind::NoStoredSession,
            Self::UnsupportedProvider { .. } => AuthErrorKind::UnsupportedProvider,
            Self::NoApplicableStrategy => AuthErrorKind::NoApplicableStrategy,
            Self::PopupBlocked => AuthErrorKind::PopupBlocked,
            Self::OAuthError { .. } => AuthErrorKind::OAuthError,
            Self::IncompleteCallback => AuthErrorKind::IncompleteCallback,
            Self::UserCancelled => AuthErrorKind::UserCancelled,
            Self::HandshakeTimeout { .. } => AuthErrorKind::HandshakeTimeout,
            Self::InvalidCallbackUri { .. } => AuthErrorKind::InvalidCallbackUri,
            Self::BrowserUnavailable => AuthErrorKind::BrowserUnavailable,
            Self::Identity { .. } => AuthErrorKind::Identity,
            Self::Network(_) => AuthErrorKind::Network,
            Self::Store(_) => AuthErrorKind::Store,
            Self::Serialization(_) => AuthErrorKind::Serialization,
            Self::UrlParse(_) => AuthErrorKind::UrlParse,
            Self::Io(_) => AuthErrorKind::Io,
        }
    }

    /// Whether this error ended an OAuth handshake (as opposed to failing
    /// before one started).
    pub fn is_handshake_terminal(&self) -> bool {
        matches!(
            self.kind(),
            AuthErrorKind::OAuthError
                | AuthErrorKind::IncompleteCallback
                | AuthErrorKind::UserCancelled
                | AuthErrorKind::HandshakeTimeout
        )
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Token store errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`TokenStore`](crate::store::TokenStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be used in this environment.
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// The backend reported an error of its own.
    #[error("{backend} backend failed: {reason}")]
    Backend {
        /// Backend name, e.g. `"keyring"`.
        backend: &'static str,
        reason: String,
    },

    /// Stored data could not be (de)serialized.
    #[error("stored data is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
