//! Loopback browser host for the OAuth handshake.
//!
//! The CLI has no window to open popups from, so it stands in for one: a
//! small HTTP listener on `127.0.0.1` receives the identity service's
//! redirect to the callback URI and turns it into a [`WindowMessage`] on a
//! [`MessageBus`]. The authorization URL is opened in the system browser.
//!
//! The redirect carries `token`, `user` (JSON) and `error` as query
//! parameters. The message origin is taken from what the browser says about
//! the sender: a request carrying an `Origin` header comes from that origin,
//! and a subresource or script request (`Sec-Fetch-Mode` other than
//! `navigate`) without one is opaque (`null`). Only a top-level navigation,
//! which is what the provider's redirect is, gets the listener's own origin
//! `http://{Host}`. Requests from other pages therefore fail the
//! handshake's origin check.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tether_auth::{BrowserHost, MessageBus, MessageListener, PopupFeatures, PopupWindow, WindowMessage};

/// The HTML page returned to the browser after a callback.
const DONE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>tether</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }
        .card {
            text-align: center;
            padding: 3rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.08);
        }
        p { color: #666; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Sign-in received</h1>
        <p>You can close this tab and return to the terminal.</p>
    </div>
</body>
</html>"#;

/// Callback requests are small GETs.
const MAX_REQUEST_BYTES: usize = 8192;

/// How long a connection may take to send its request head.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Origin given to requests whose sender the browser does not disclose.
const OPAQUE_ORIGIN: &str = "null";

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// A parsed redirect to the callback path.
#[derive(Debug, PartialEq)]
struct CallbackRequest {
    origin: String,
    data: Value,
}

/// Parse an HTTP request. Returns `None` for anything other than a GET to
/// `callback_path` with a `Host` header.
fn parse_callback_request(request: &str, callback_path: &str) -> Option<CallbackRequest> {
    let mut lines = request.lines();
    let mut parts = lines.next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != callback_path {
        return None;
    }

    let headers: Vec<(&str, &str)> = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
        .collect();
    let header = |wanted: &str| {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| *value)
    };

    let host = header("host")?;
    let origin = match (header("origin"), header("sec-fetch-mode")) {
        (Some(origin), _) => origin.to_string(),
        (None, Some(mode)) if !mode.eq_ignore_ascii_case("navigate") => OPAQUE_ORIGIN.to_string(),
        (None, _) => format!("http://{host}"),
    };

    let mut data = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()).into_owned() {
        if key == "token" || key == "error" {
            data.insert(key, Value::String(value));
        } else if key == "user" {
            let user = serde_json::from_str(&value).unwrap_or(Value::String(value));
            data.insert(key, user);
        }
    }

    Some(CallbackRequest {
        origin,
        data: Value::Object(data),
    })
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

// ---------------------------------------------------------------------------
// LoopbackHost
// ---------------------------------------------------------------------------

/// [`BrowserHost`] backed by a loopback HTTP listener and the system browser.
pub struct LoopbackHost {
    addr: SocketAddr,
    bus: Arc<MessageBus>,
    server: JoinHandle<()>,
}

impl LoopbackHost {
    /// Bind `127.0.0.1:{port}` (0 picks a free port) and start serving
    /// `callback_path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the port cannot be bound.
    pub async fn bind(port: u16, callback_path: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let bus = Arc::new(MessageBus::new());

        tracing::info!(addr = %addr, path = callback_path, "callback listener ready");

        let server = tokio::spawn(serve(listener, Arc::clone(&bus), callback_path.to_string()));
        Ok(Self { addr, bus, server })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for LoopbackHost {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(listener: TcpListener, bus: Arc<MessageBus>, callback_path: String) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(peer = %peer, "accepted callback connection");
                let bus = Arc::clone(&bus);
                let callback_path = callback_path.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &bus, &callback_path).await {
                        tracing::warn!(error = %e, "callback connection failed");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "callback listener accept failed");
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    bus: &MessageBus,
    callback_path: &str,
) -> std::io::Result<()> {
    let buf = match tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream)).await {
        Ok(buf) => buf?,
        Err(_) => {
            tracing::debug!("callback connection sent no request in time");
            return Ok(());
        }
    };
    let request = String::from_utf8_lossy(&buf);

    let response = match parse_callback_request(&request, callback_path) {
        Some(callback) => {
            tracing::info!(origin = %callback.origin, "oauth callback received");
            let delivered = bus.post(WindowMessage::new(callback.origin, callback.data));
            tracing::debug!(listeners = delivered, "callback posted");
            http_response("200 OK", DONE_HTML)
        }
        None => http_response("404 Not Found", "not found"),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Read until the end of the request head, EOF, or [`MAX_REQUEST_BYTES`].
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= MAX_REQUEST_BYTES || buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    buf.truncate(MAX_REQUEST_BYTES);
    Ok(buf)
}

/// Tab opened in the system browser. The CLI cannot observe the user
/// closing it, so only [`close`](PopupWindow::close) marks it closed.
struct BrowserTab {
    closed: AtomicBool,
}

impl PopupWindow for BrowserTab {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl BrowserHost for LoopbackHost {
    fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn open_popup(&self, url: &str, _features: PopupFeatures) -> Option<Box<dyn PopupWindow>> {
        match webbrowser::open(url) {
            Ok(()) => {
                eprintln!("Opened your browser to sign in. If nothing happened, visit:\n  {url}");
                Some(Box::new(BrowserTab {
                    closed: AtomicBool::new(false),
                }))
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not launch a browser");
                None
            }
        }
    }

    fn subscribe(&self) -> MessageListener {
        self.bus.subscribe()
    }

    fn navigate(&self, url: &str) {
        if let Err(e) = webbrowser::open(url) {
            tracing::warn!(error = %e, "could not launch a browser");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
