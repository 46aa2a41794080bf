//! Browser host abstraction for the OAuth handshake.
//!
//! The handshake needs four things from whatever environment it runs in: the
//! environment's own origin (for the default callback URI), a way to open a
//! popup at a URL, a way to listen for cross-window messages, and a way to
//! navigate the whole page. [`BrowserHost`] names those capabilities;
//! implementations exist for a native loopback listener (in the CLI) and for
//! scripted test doubles.
//!
//! Message listeners are registered through a [`MessageBus`]. A listener is
//! removed when its [`MessageListener`] is dropped, so releasing the
//! handshake's resources cannot leave a stale callback behind.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Geometry requested for the authorization popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupFeatures {
    pub width: u32,
    pub height: u32,
}

/// A cross-window message as delivered to a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMessage {
    /// Serialized origin of the sending document, e.g. `https://app.example.com`.
    pub origin: String,
    /// Message payload.
    pub data: Value,
}

impl WindowMessage {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// A window opened by [`BrowserHost::open_popup`].
pub trait PopupWindow: Send + Sync {
    /// Whether the window has been closed, by the user or by [`close`](Self::close).
    fn is_closed(&self) -> bool;

    /// Close the window. Closing an already-closed window is a no-op.
    fn close(&self);
}

/// The host environment the browser handshake runs in.
pub trait BrowserHost: Send + Sync {
    /// Serialized origin of the hosting document (scheme, host, port).
    fn origin(&self) -> String;

    /// Open a popup at `url`. Returns `None` when the host blocks it.
    fn open_popup(&self, url: &str, features: PopupFeatures) -> Option<Box<dyn PopupWindow>>;

    /// Register a listener for cross-window messages.
    fn subscribe(&self) -> MessageListener;

    /// Navigate the hosting document itself to `url`.
    fn navigate(&self, url: &str);
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

/// Registry of live message listeners that hosts post into.
#[derive(Debug, Default)]
pub struct MessageBus {
    listeners: Mutex<Vec<mpsc::UnboundedSender<WindowMessage>>>,
}

/// Receiving end of a [`MessageBus`] subscription. Dropping it removes the
/// listener.
#[derive(Debug)]
pub struct MessageListener {
    rx: mpsc::UnboundedReceiver<WindowMessage>,
}

impl MessageListener {
    /// Wait for the next message. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<WindowMessage> {
        self.rx.recv().await
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> MessageListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        MessageListener { rx }
    }

    /// Deliver `message` to every live listener and return how many received
    /// it. Listeners that have been dropped are pruned.
    pub fn post(&self, message: WindowMessage) -> usize {
        let mut listeners = self.lock();
        listeners.retain(|tx| !tx.is_closed());
        listeners
            .iter()
            .filter(|tx| tx.send(message.clone()).is_ok())
            .count()
    }

    /// Number of listeners still registered.
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.lock();
        listeners.retain(|tx| !tx.is_closed());
        listeners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<WindowMessage>>> {
        // A panic while holding this lock cannot leave the Vec inconsistent.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
