//! Loopback redirect listener.
//!
//! Receives the authorization response from the browser, validates the CSRF
//! state, redeems the code and hands the resulting session to the waiting
//! login over a oneshot channel. At most one result is ever delivered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::state_matches;
use crate::session::IdentitySession;
use crate::{Error, Result};

/// How long to let the listener finish in-flight responses on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Authorization response query parameters
#[derive(Debug, Default, Deserialize)]
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

/// Turns an authorization code into an identity session.
#[async_trait]
pub trait CodeRedeemer: Send + Sync {
    /// Exchange `code` and verify the result.
    async fn redeem(&self, code: &str) -> Result<IdentitySession>;
}

/// State shared with the callback handler
struct CallbackState {
    expected_state: String,
    redeemer: Arc<dyn CodeRedeemer>,
    tx: Mutex<Option<oneshot::Sender<Result<IdentitySession>>>>,
}

/// A bound, not yet serving, redirect listener.
pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: Url,
}

impl CallbackListener {
    /// Bind the address of `redirect_uri`. Port `0` picks an ephemeral port,
    /// which is then reflected in [`redirect_uri`](Self::redirect_uri).
    pub async fn bind(redirect_uri: &str) -> Result<Self> {
        let mut url = Url::parse(redirect_uri)
            .map_err(|e| Error::Config(format!("Invalid redirect URI {redirect_uri}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("Redirect URI has no host: {redirect_uri}")))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(0);

        let listener = TcpListener::bind((host.as_str(), port)).await.map_err(|e| {
            Error::Internal(format!("Failed to bind callback listener on {host}:{port}: {e}"))
        })?;

        let actual = listener.local_addr()?;
        if port == 0 {
            url.set_port(Some(actual.port()))
                .map_err(|()| Error::Config(format!("Cannot set port on {redirect_uri}")))?;
        }

        info!(url = %url, "Callback listener bound");
        Ok(Self {
            listener,
            redirect_uri: url,
        })
    }

    /// Redirect URI the provider must send the browser back to
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        self.redirect_uri.as_str()
    }

    /// Serve the redirect path until one result arrives or `timeout` elapses.
    /// The listener is shut down on every exit path.
    pub async fn wait(
        self,
        expected_state: String,
        redeemer: Arc<dyn CodeRedeemer>,
        timeout: Duration,
    ) -> Result<IdentitySession> {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            expected_state,
            redeemer,
            tx: Mutex::new(Some(tx)),
        });

        let app = Router::new()
            .route(self.redirect_uri.path(), get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let outcome = tokio::time::timeout(timeout, rx).await;

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => debug!("Callback listener stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "Callback listener error"),
            Ok(Err(e)) => warn!(error = %e, "Callback listener task failed"),
            Err(_) => {
                warn!("Callback listener did not stop in time, aborting");
                server.abort();
            }
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Internal(
                "Callback channel closed unexpectedly".to_string(),
            )),
            Err(_) => Err(Error::Authentication(format!(
                "Login terminated before completing request (no response within {})",
                broker_core::format_duration(timeout)
            ))),
        }
    }
}

/// A callback that cannot produce a session
struct Rejection {
    status: StatusCode,
    code: &'static str,
    error: Error,
}

impl Rejection {
    fn new(status: StatusCode, code: &'static str, error: Error) -> Self {
        Self {
            status,
            code,
            error,
        }
    }
}

/// Handle the redirect from the identity provider
async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    debug!(
        has_code = params.code.is_some(),
        error = ?params.error,
        "Received authorization callback"
    );

    let Some(tx) = state.tx.lock().take() else {
        return (
            StatusCode::CONFLICT,
            Html(error_page("already_handled", "This login request was already completed")),
        )
            .into_response();
    };

    let (result, response) = match complete(&state, params).await {
        Ok(session) => (Ok(session), Html(success_page()).into_response()),
        Err(rejection) => {
            warn!(error = %rejection.error, "Authorization callback rejected");
            let page = error_page(rejection.code, &rejection.error.to_string());
            (
                Err(rejection.error),
                (rejection.status, Html(page)).into_response(),
            )
        }
    };

    if tx.send(result).is_err() {
        debug!("Login no longer waiting for the callback");
    }
    response
}

async fn complete(
    state: &CallbackState,
    params: CallbackParams,
) -> std::result::Result<IdentitySession, Rejection> {
    let received = params.state.unwrap_or_default();
    if !state_matches(&state.expected_state, &received) {
        return Err(Rejection::new(
            StatusCode::NOT_FOUND,
            "state_mismatch",
            Error::Authentication("State mismatch, possible CSRF attack".to_string()),
        ));
    }

    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "provider_error",
            Error::Authentication(format!("Identity provider error: {error} - {description}")),
        ));
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "missing_code",
            Error::Authentication("Authorization code not provided".to_string()),
        ));
    };

    state.redeemer.redeem(&code).await.map_err(|e| {
        Rejection::new(StatusCode::INTERNAL_SERVER_ERROR, "exchange_failed", e)
    })
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Login Successful</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }
        .container { text-align: center; padding: 2rem; }
        h1 { margin: 0 0 0.5rem 0; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Login Successful</h1>
        <p>You can close this window and return to your terminal.</p>
    </div>
    <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    let error = escape_html(error);
    let description = escape_html(description);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Login Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }}
        .container {{ text-align: center; padding: 2rem; max-width: 480px; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.7; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Login Failed</h1>
        <p>{description}</p>
        <p class="error-code">Error: {error}</p>
    </div>
</body>
</html>"#
    )
}
