//! Browser-mediated OAuth handshake.
//!
//! The [`OAuthHandshakeController`] drives one third-party login through a
//! popup window:
//!
//! ```text
//! Idle -> AuthorizationRequested -> PopupOpened -> AwaitingCallback
//!      -> Completed | Failed | Cancelled | TimedOut
//! ```
//!
//! While awaiting the callback three signals race inside a single
//! `tokio::select!`:
//!
//! 1. a cross-window message from the callback origin (carries the result),
//! 2. a periodic check of whether the popup was closed (user cancel),
//! 3. an overall deadline.
//!
//! The first to settle wins. Messages from any other origin are dropped
//! without settling anything. Whatever the outcome, the listener, timers and
//! popup are released exactly once by [`HandshakeResources`], including when
//! the handshake future itself is dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use crate::error::{AuthError, Result};
use crate::host::{BrowserHost, MessageListener, PopupFeatures, PopupWindow, WindowMessage};
use crate::identity::IdentityClient;
use crate::types::{AuthOptions, AuthResult, OAuthProvider, UserRecord};

/// Default interval between popup-closed checks.
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default overall handshake deadline (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

const DEFAULT_POPUP_WIDTH: u32 = 600;
const DEFAULT_POPUP_HEIGHT: u32 = 700;
const DEFAULT_CALLBACK_PATH: &str = "/oauth/callback";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing and geometry of the browser handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// How often to check whether the popup was closed, in milliseconds.
    pub poll_interval_ms: u64,
    /// Overall deadline in seconds.
    pub timeout_secs: u64,
    pub popup_width: u32,
    pub popup_height: u32,
    /// Path appended to the host origin when no callback URI is given.
    pub callback_path: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            popup_width: DEFAULT_POPUP_WIDTH,
            popup_height: DEFAULT_POPUP_HEIGHT,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
        }
    }
}

impl HandshakeConfig {
    pub fn poll_interval(&self) -> Duration {
        // A zero period would make `tokio::time::interval` panic.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn popup_features(&self) -> PopupFeatures {
        PopupFeatures {
            width: self.popup_width,
            height: self.popup_height,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of one handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    Idle,
    AuthorizationRequested,
    PopupOpened,
    AwaitingCallback,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Terminal state reached by a finished race.
    fn settled_by(outcome: &Result<AuthResult>) -> Self {
        match outcome {
            Ok(_) => Self::Completed,
            Err(AuthError::UserCancelled) => Self::Cancelled,
            Err(AuthError::HandshakeTimeout { .. }) => Self::TimedOut,
            Err(_) => Self::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Parameters of one handshake, extracted from [`AuthOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub provider: OAuthProvider,
    /// Callback URI; defaults to the host origin plus the configured path.
    pub callback_uri: Option<String>,
    /// Correlation nonce; generated when absent.
    pub nonce: Option<String>,
    pub use_popup: bool,
}

impl HandshakeRequest {
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedProvider`] if `oauth_provider` names a
    /// provider outside the supported set.
    pub fn from_options(options: &AuthOptions) -> Result<Self> {
        Ok(Self {
            provider: options.provider()?,
            callback_uri: options.callback_uri.clone().filter(|s| !s.is_empty()),
            nonce: options.nonce.clone().filter(|s| !s.is_empty()),
            use_popup: options.use_popup,
        })
    }
}

/// Shape of a callback message payload.
#[derive(Debug, Deserialize)]
struct CallbackPayload {
    #[serde(default)]
    user: Option<Value>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Everything a live handshake holds onto. Released once, on the first call
/// to [`release`](Self::release) or on drop.
struct HandshakeResources {
    listener: Option<MessageListener>,
    popup: Option<Box<dyn PopupWindow>>,
    released: bool,
}

impl HandshakeResources {
    fn new(listener: MessageListener, popup: Box<dyn PopupWindow>) -> Self {
        Self {
            listener: Some(listener),
            popup: Some(popup),
            released: false,
        }
    }

    /// Remove the listener and close the popup if it is still open. Returns
    /// `false` when already released.
    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.listener.take();
        if let Some(popup) = self.popup.take()
            && !popup.is_closed()
        {
            popup.close();
        }
        tracing::debug!("handshake resources released");
        true
    }
}

impl Drop for HandshakeResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// Next message from the listener; pends forever once it is gone.
async fn next_message(listener: &mut Option<MessageListener>) -> Option<WindowMessage> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Runs browser OAuth handshakes against one identity service and host.
///
/// Concurrent handshakes on one controller are not serialized; callers
/// should run one at a time. [`state`](Self::state) reports the most recent
/// attempt.
pub struct OAuthHandshakeController {
    identity: Arc<dyn IdentityClient>,
    host: Arc<dyn BrowserHost>,
    config: HandshakeConfig,
    state: Mutex<HandshakeState>,
}

impl OAuthHandshakeController {
    pub fn new(
        identity: Arc<dyn IdentityClient>,
        host: Arc<dyn BrowserHost>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            identity,
            host,
            config,
            state: Mutex::new(HandshakeState::Idle),
        }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// State of the most recent handshake.
    pub fn state(&self) -> HandshakeState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, next: HandshakeState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::debug!(from = ?*state, to = ?next, "handshake state");
        *state = next;
    }

    /// Callback URI used when the caller supplies none.
    pub fn default_callback_uri(&self) -> String {
        format!(
            "{}{}",
            self.host.origin().trim_end_matches('/'),
            self.config.callback_path
        )
    }

    /// Run one handshake to a terminal outcome.
    ///
    /// With `use_popup == false` the host navigates away to the authorization
    /// URL and the returned future never completes; the flow resumes in
    /// whatever loads at the callback URI.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCallbackUri`] if the callback URI has no tuple origin.
    /// - [`AuthError::PopupBlocked`] if the host refuses the popup.
    /// - [`AuthError::OAuthError`], [`AuthError::IncompleteCallback`],
    ///   [`AuthError::UserCancelled`], [`AuthError::HandshakeTimeout`] from
    ///   the race.
    /// - Identity service errors while requesting the authorization URL.
    pub async fn run(&self, request: HandshakeRequest) -> Result<AuthResult> {
        self.transition(HandshakeState::Idle);

        let callback_uri = request
            .callback_uri
            .unwrap_or_else(|| self.default_callback_uri());
        let expected_origin = match callback_origin(&callback_uri) {
            Ok(origin) => origin,
            Err(e) => {
                self.transition(HandshakeState::Failed);
                return Err(e);
            }
        };
        let nonce = request
            .nonce
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        tracing::info!(
            provider = %request.provider,
            callback_uri = %callback_uri,
            "starting browser oauth handshake"
        );

        let authorization = match self
            .identity
            .authorization_url(request.provider, &callback_uri, &nonce)
            .await
        {
            Ok(authorization) => authorization,
            Err(e) => {
                self.transition(HandshakeState::Failed);
                return Err(e);
            }
        };
        self.transition(HandshakeState::AuthorizationRequested);

        if !request.use_popup {
            tracing::info!("navigating to authorization url");
            self.host.navigate(&authorization.login_url);
            return std::future::pending().await;
        }

        let listener = self.host.subscribe();
        let Some(popup) = self
            .host
            .open_popup(&authorization.login_url, self.config.popup_features())
        else {
            tracing::warn!("authorization popup was blocked");
            self.transition(HandshakeState::Failed);
            return Err(AuthError::PopupBlocked);
        };
        self.transition(HandshakeState::PopupOpened);

        let mut resources = HandshakeResources::new(listener, popup);
        self.transition(HandshakeState::AwaitingCallback);

        let outcome = self.race(&mut resources, &expected_origin).await;
        resources.release();

        let terminal = HandshakeState::settled_by(&outcome);
        self.transition(terminal);
        tracing::info!(state = ?terminal, "browser oauth handshake finished");
        outcome
    }

    /// Race message, popup-closed and deadline signals; first to settle wins.
    async fn race(
        &self,
        resources: &mut HandshakeResources,
        expected_origin: &str,
    ) -> Result<AuthResult> {
        let period = self.config.poll_interval();
        let mut close_poll = tokio::time::interval_at(Instant::now() + period, period);
        close_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = tokio::time::sleep(self.config.timeout());
        tokio::pin!(deadline);

        let listener = &mut resources.listener;
        let popup = &resources.popup;
        let mut listening = true;

        loop {
            tokio::select! {
                biased;

                message = next_message(listener), if listening => match message {
                    Some(message) => {
                        if let Some(outcome) = evaluate_message(&message, expected_origin) {
                            return outcome;
                        }
                    }
                    None => {
                        tracing::warn!("host message channel closed; waiting on popup and deadline");
                        listening = false;
                    }
                },

                _ = close_poll.tick() => {
                    if popup.as_ref().is_none_or(|p| p.is_closed()) {
                        tracing::info!("authorization popup closed before callback");
                        return Err(AuthError::UserCancelled);
                    }
                }

                () = &mut deadline => {
                    tracing::warn!(timeout_secs = self.config.timeout_secs, "handshake deadline reached");
                    return Err(AuthError::HandshakeTimeout {
                        timeout_secs: self.config.timeout_secs,
                    });
                }
            }
        }
    }
}

/// Serialized origin of `callback_uri`.
fn callback_origin(callback_uri: &str) -> Result<String> {
    let invalid = || AuthError::InvalidCallbackUri {
        uri: callback_uri.to_string(),
    };
    let url = Url::parse(callback_uri).map_err(|_| invalid())?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(invalid());
    }
    Ok(origin.ascii_serialization())
}

/// Decide what a message means. `None` means "ignore and keep waiting".
fn evaluate_message(message: &WindowMessage, expected_origin: &str) -> Option<Result<AuthResult>> {
    if message.origin != expected_origin {
        tracing::warn!(
            origin = %message.origin,
            expected = %expected_origin,
            "ignoring message from unexpected origin"
        );
        return None;
    }

    let Ok(payload) = serde_json::from_value::<CallbackPayload>(message.data.clone()) else {
        return Some(Err(AuthError::IncompleteCallback));
    };

    if let Some(error) = payload.error {
        return Some(Err(AuthError::OAuthError { error }));
    }

    match (payload.user, payload.token) {
        (Some(user), Some(token)) if user.is_object() && !token.is_empty() => Some(Ok(AuthResult {
            user: UserRecord::from_profile(&user),
            token,
        })),
        _ => Some(Err(AuthError::IncompleteCallback)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
