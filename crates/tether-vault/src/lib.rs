//! Persistent token stores for tether.
//!
//! Each backend implements [`tether_auth::TokenStore`], so the
//! authentication manager can persist a session without knowing where it
//! goes.
//!
//! # Modules
//!
//! - [`store`]: SQLite vault with AES-256-GCM sealed slots.
//! - [`keychain`]: OS keyring store and vault master key.
//! - [`file`]: plain JSON session file.
//! - [`crypto`]: AES-256-GCM and PBKDF2 primitives.
//! - [`error`]: unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether_auth::TokenStore;
//! use tether_vault::{VaultTokenStore, crypto};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = VaultTokenStore::open_with_passphrase(
//!     "data/tether.db",
//!     "correct horse battery staple",
//!     crypto::DEFAULT_PBKDF2_ITERATIONS,
//! )?;
//! store.set("session-token").await?;
//! assert_eq!(store.get().await?.as_deref(), Some("session-token"));
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod file;
pub mod keychain;
pub mod store;

pub use error::{Result, VaultError};
pub use file::FileTokenStore;
pub use keychain::{KeyringTokenStore, keyring_master_key};
pub use store::VaultTokenStore;
