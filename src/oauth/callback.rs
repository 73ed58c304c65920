//! Local callback listener
//!
//! A minimal HTTP server on `127.0.0.1` that receives the authorization code
//! after the user approves the login in the browser.
//!
//! Binding and serving are separate steps: the redirect URI (which needs the
//! bound port) goes into the authorize URL, and the authorize URL is what the
//! listener redirects `/` to.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use url::Url;

use crate::{Error, Result};

/// Path the provider redirects back to
pub const CALLBACK_PATH: &str = "/auth";

/// Callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (for CSRF protection)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// State shared with the callback handler
struct CallbackState {
    expected_state: String,
    authorize_url: String,
    tx: Mutex<Option<oneshot::Sender<Result<String>>>>,
}

impl CallbackState {
    /// Deliver the outcome; only the first delivery counts.
    fn deliver(&self, result: Result<String>) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

/// A bound but not yet serving callback socket
pub struct CallbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackListener {
    /// Bind `127.0.0.1:port`; `0` picks an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind callback server: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Internal(format!("Failed to get callback server address: {e}")))?;
        Ok(Self { listener, addr })
    }

    /// Bound address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Redirect URI to register with the authorize request
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.addr.port())
    }

    /// Start serving; the returned server yields exactly one outcome.
    #[must_use]
    pub fn serve(self, expected_state: String, authorize_url: &Url) -> CallbackServer {
        let (tx, rx) = oneshot::channel();

        let state = Arc::new(CallbackState {
            expected_state,
            authorize_url: authorize_url.to_string(),
            tx: Mutex::new(Some(tx)),
        });

        let app = Router::new()
            .route("/", get(handle_root))
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let local_url = format!("http://127.0.0.1:{}/", self.addr.port());
        info!(url = %local_url, "Callback server listening");

        let listener = self.listener;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Callback server error");
            }
        });

        CallbackServer {
            local_url,
            rx,
            server: Some(server),
        }
    }
}

/// A running callback server. Dropping it stops the server.
pub struct CallbackServer {
    local_url: String,
    rx: oneshot::Receiver<Result<String>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Local URL that redirects to the authorize URL
    #[must_use]
    pub fn local_url(&self) -> &str {
        &self.local_url
    }

    /// Wait for the callback outcome (the authorization code on success).
    ///
    /// Cancel-safe: dropping this future and calling again keeps waiting for
    /// the same outcome.
    pub async fn code(&mut self) -> Result<String> {
        (&mut self.rx)
            .await
            .map_err(|_| Error::Internal("Callback channel closed unexpectedly".to_string()))?
    }

    /// Stop the server and wait until the socket is released.
    pub async fn shutdown(mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
            debug!(url = %self.local_url, "Callback server stopped");
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// `/` sends the browser on to the provider
async fn handle_root(State(state): State<Arc<CallbackState>>) -> Response {
    debug!("Redirecting to authorize URL");
    (StatusCode::FOUND, [(header::LOCATION, state.authorize_url.clone())]).into_response()
}

/// Handle the provider redirect
async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    debug!(
        has_code = params.code.is_some(),
        has_error = params.error.is_some(),
        "Received callback"
    );

    let (result, page) = evaluate(&state.expected_state, params);
    if state.deliver(result) {
        Html(page)
    } else {
        Html(status_page("Authentication already completed"))
    }
}

/// Map callback parameters to an outcome and the page shown to the user.
fn evaluate(expected_state: &str, params: CallbackParams) -> (Result<String>, String) {
    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        let description = params.error_description.filter(|d| !d.is_empty()).unwrap_or(error);
        error!(error = %description, "Authentication failed");
        let page = status_page(&format!("Authentication failed: {description}"));
        return (Err(Error::ProviderError(format!("authentication failed: {description}"))), page);
    }

    if params.state.as_deref() != Some(expected_state) {
        error!("Authentication error: state mismatch");
        return (Err(Error::StateMismatch), status_page("Authentication error: state mismatch"));
    }

    match params.code.filter(|c| !c.is_empty()) {
        Some(code) => (Ok(code), status_page("Authentication successful")),
        None => (
            Err(Error::ProviderError("no code received from auth server".to_string())),
            status_page("Authentication failed: no code received"),
        ),
    }
}

fn status_page(message: &str) -> String {
    let message = html_escape(message);
    format!(r#"<!DOCTYPE html>
<html>
<head>
    <title>Fabric | Authentication Status</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: linear-gradient(to right, #1e3c72, #2a5298);
            color: white;
        }}
        .container {{ text-align: center; }}
        .status-message {{ font-size: 2em; margin-bottom: 1em; }}
        .close-link {{ cursor: pointer; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Fabric</h1>
        <p class="status-message">{message}</p>
        <p class="close-link" onclick="window.close()">You can close this window.</p>
    </div>
</body>
</html>"#)
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
