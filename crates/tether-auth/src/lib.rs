//! Client authentication and session lifecycle for tether.
//!
//! This crate establishes a user session against a remote identity service
//! and keeps it for the life of the process:
//!
//! - **Four strategies**, tried in a fixed order: explicit token,
//!   handle/password, stored token, browser OAuth
//! - **Browser OAuth handshake** racing a callback message against popup
//!   closure and a deadline, with guaranteed cleanup
//! - **Pluggable token stores** behind one async [`TokenStore`] contract
//!
//! # Architecture
//!
//! ```text
//! AuthenticationManager
//! ├── AuthStrategy              (Token | Credentials | Storage | BrowserOAuth)
//! ├── IdentityClient            (whoami / login / authorization URL)
//! ├── OAuthHandshakeController  (popup + message/poll/timeout race)
//! │   └── BrowserHost           (popup, navigation, MessageBus)
//! └── TokenStore                (memory, disabled, or a tether-vault backend)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tether_auth::{
//!     AuthOptions, AuthenticationManager, HttpIdentityClient, IdentityConfig, MemoryTokenStore,
//! };
//!
//! # async fn example() -> tether_auth::Result<()> {
//! let identity = Arc::new(HttpIdentityClient::new(&IdentityConfig::default())?);
//! let manager = AuthenticationManager::new(identity, Arc::new(MemoryTokenStore::new()));
//!
//! let session = manager
//!     .authenticate(&AuthOptions::with_credentials("ada", "secret"))
//!     .await?;
//! println!("signed in as {}", session.user.display_name());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handshake;
pub mod host;
pub mod identity;
pub mod manager;
pub mod store;
pub mod strategy;
pub mod types;

// Re-export key types at the crate root for convenience.
pub use error::{AuthError, AuthErrorKind, Result, StoreError, StoreResult};
pub use handshake::{HandshakeConfig, HandshakeRequest, HandshakeState, OAuthHandshakeController};
pub use host::{BrowserHost, MessageBus, MessageListener, PopupFeatures, PopupWindow, WindowMessage};
pub use identity::{
    AuthorizationUrl, HttpIdentityClient, IdentityClient, IdentityConfig, LoginResponse,
    UserProfile,
};
pub use manager::AuthenticationManager;
pub use store::{DisabledTokenStore, MemoryTokenStore, TokenStore};
pub use strategy::AuthStrategy;
pub use types::{AuthOptions, AuthResult, OAuthProvider, UserRecord};
