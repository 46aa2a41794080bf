//! Integration tests for the tether-auth crate.
//!
//! These tests drive the public [`AuthenticationManager`] API against a real
//! HTTP identity client talking to a mock identity service (via wiremock),
//! with the browser handshake running on a host double that answers the
//! popup immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use wiremock::matchers::{bearer_token, body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tether_auth::{
    AuthError, AuthOptions, AuthenticationManager, BrowserHost, HandshakeConfig, HandshakeState,
    HttpIdentityClient, IdentityConfig, MemoryTokenStore, MessageBus, MessageListener,
    OAuthProvider, PopupFeatures, PopupWindow, TokenStore, WindowMessage,
};

const APP_ORIGIN: &str = "https://app.example.com";

fn identity_for(server: &MockServer) -> Arc<HttpIdentityClient> {
    let config = IdentityConfig {
        base_url: server.uri(),
        ..IdentityConfig::default()
    };
    Arc::new(HttpIdentityClient::new(&config).unwrap())
}

async fn mount_whoami(server: &MockServer, token: &str, profile: Value) {
    Mock::given(method("GET"))
        .and(path("/api/iam/v1/whoami"))
        .and(bearer_token(token))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "profile": profile })))
        .mount(server)
        .await;
}

/// Host whose "identity provider" posts `reply` as soon as the popup opens.
struct AnsweringHost {
    bus: MessageBus,
    reply: Value,
}

struct Tab(AtomicBool);

impl PopupWindow for Tab {
    fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl BrowserHost for AnsweringHost {
    fn origin(&self) -> String {
        APP_ORIGIN.to_string()
    }

    fn open_popup(&self, _url: &str, _features: PopupFeatures) -> Option<Box<dyn PopupWindow>> {
        self.bus
            .post(WindowMessage::new(APP_ORIGIN, self.reply.clone()));
        Some(Box::new(Tab(AtomicBool::new(false))))
    }

    fn subscribe(&self) -> MessageListener {
        self.bus.subscribe()
    }

    fn navigate(&self, _url: &str) {}
}

fn fast_handshake() -> HandshakeConfig {
    HandshakeConfig {
        poll_interval_ms: 10,
        timeout_secs: 5,
        ..HandshakeConfig::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Token and credentials
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn credentials_login_then_resume_from_store() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/iam/v1/login"))
        .and(body_json(json!({"handle": "ada", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "token": "tok-1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_whoami(
        &server,
        "tok-1",
        json!({"id": "u1", "handle_s": "ada", "first_name_t": "Ada", "last_name_t": "Lovelace"}),
    )
    .await;

    let store = Arc::new(MemoryTokenStore::new());
    let identity = identity_for(&server);

    let first = AuthenticationManager::new(identity.clone(), store.clone());
    let result = first
        .authenticate(&AuthOptions::with_credentials("ada", "pw"))
        .await
        .unwrap();
    assert_eq!(result.token, "tok-1");
    assert_eq!(result.user.display_name(), "Ada Lovelace");
    assert_eq!(store.get().await.unwrap().as_deref(), Some("tok-1"));

    // A fresh manager on the same store resumes without credentials.
    let second = AuthenticationManager::new(identity, store);
    let resumed = second.authenticate(&AuthOptions::default()).await.unwrap();
    assert_eq!(resumed.token, "tok-1");
    assert_eq!(resumed.user.handle, "ada");
    assert!(second.is_authenticated());
}

#[tokio::test]
async fn rejected_login_surfaces_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/iam/v1/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "success": false,
            "message": "bad credentials"
        })))
        .mount(&server)
        .await;

    let manager = AuthenticationManager::new(identity_for(&server), Arc::new(MemoryTokenStore::new()));
    let err = manager
        .authenticate(&AuthOptions::with_credentials("a@b.com", "x"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::LoginFailed { ref message } if message == "bad credentials"));
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn expired_token_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/iam/v1/whoami"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let manager = AuthenticationManager::new(identity_for(&server), store.clone());
    let err = manager
        .authenticate(&AuthOptions::with_token("expired"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidToken { .. }));
    assert_eq!(manager.current_token(), None);
    assert_eq!(store.get().await.unwrap(), None);
}

// ═══════════════════════════════════════════════════════════════════════
//  Browser OAuth
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn browser_login_completes_through_popup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/iam/v1/oauth2/authz/url"))
        .and(query_param("provider", "linkedin"))
        .and(query_param("callback_uri", "https://app.example.com/oauth/callback"))
        .and(query_param("nonce", "n-42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"loginURL": "https://www.linkedin.com/oauth/v2/authorization"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let host = Arc::new(AnsweringHost {
        bus: MessageBus::new(),
        reply: json!({"user": {"id": "u7", "handle": "grace"}, "token": "oauth-tok"}),
    });
    let store = Arc::new(MemoryTokenStore::new());
    let manager = AuthenticationManager::new(identity_for(&server), store.clone())
        .with_browser(host.clone(), fast_handshake());

    let options = AuthOptions {
        nonce: Some("n-42".into()),
        ..AuthOptions::with_browser(Some(OAuthProvider::LinkedIn))
    };
    let result = manager.authenticate(&options).await.unwrap();

    assert_eq!(result.token, "oauth-tok");
    assert_eq!(result.user.handle, "grace");
    assert!(manager.is_authenticated());
    assert_eq!(store.get().await.unwrap().as_deref(), Some("oauth-tok"));
    assert_eq!(manager.handshake().unwrap().state(), HandshakeState::Completed);
    assert_eq!(host.bus.listener_count(), 0);
}

#[tokio::test]
async fn browser_login_relays_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/iam/v1/oauth2/authz/url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"loginURL": "https://github.com/login"})))
        .mount(&server)
        .await;

    let host = Arc::new(AnsweringHost {
        bus: MessageBus::new(),
        reply: json!({"error": "access_denied"}),
    });
    let manager = AuthenticationManager::new(identity_for(&server), Arc::new(MemoryTokenStore::new()))
        .with_browser(host.clone(), fast_handshake());

    let err = manager
        .authenticate(&AuthOptions::with_browser(None))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::OAuthError { ref error } if error == "access_denied"));
    assert!(!manager.is_authenticated());
    assert_eq!(manager.handshake().unwrap().state(), HandshakeState::Failed);
    assert_eq!(host.bus.listener_count(), 0);
}

#[tokio::test]
async fn logout_clears_memory_and_store() {
    let server = MockServer::start().await;
    mount_whoami(&server, "T", json!({"id": "1", "handle": "ada"})).await;

    let store = Arc::new(MemoryTokenStore::new());
    let manager = AuthenticationManager::new(identity_for(&server), store.clone());
    manager.authenticate(&AuthOptions::with_token("T")).await.unwrap();
    assert!(manager.is_authenticated());

    manager.clear_stored_token().await.unwrap();
    assert!(!manager.is_authenticated());
    assert_eq!(store.get().await.unwrap(), None);
}
