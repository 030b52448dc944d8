//! One-shot localhost listener that captures the OAuth authorization redirect.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    axum::{
        Router,
        extract::{Query, State},
        http::StatusCode,
        response::Html,
        routing::get,
    },
    subtle::ConstantTimeEq,
    tokio::{
        net::{TcpListener, ToSocketAddrs},
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
    url::Url,
};

use crate::error::AuthError;

/// How long login waits for the browser before giving up.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Upper bound on graceful shutdown before the server task is aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const SUCCESS_HTML: &str = "<html><body><h1>Authentication successful</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const ERROR_HTML: &str = "<html><body><h1>Authentication failed</h1>\
    <p>Return to the terminal for details.</p></body></html>";

/// What a single callback request amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code(String),
    StateMismatch,
    Denied { description: String },
    MissingCode,
}

impl CallbackOutcome {
    fn into_error(self) -> Option<AuthError> {
        match self {
            Self::Code(_) => None,
            Self::StateMismatch => Some(AuthError::StateMismatch),
            Self::Denied { description } => Some(AuthError::AuthorizationDenied { description }),
            Self::MissingCode => Some(AuthError::MissingCode),
        }
    }
}

/// Classify callback query parameters. The state check comes first so a
/// forged request can never deliver a code or an error.
pub fn classify_callback(params: &HashMap<String, String>, expected_state: &str) -> CallbackOutcome {
    let state_ok = params
        .get("state")
        .is_some_and(|s| constant_time_eq(s.as_bytes(), expected_state.as_bytes()));
    if !state_ok {
        return CallbackOutcome::StateMismatch;
    }

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .filter(|d| !d.is_empty())
            .unwrap_or(error)
            .clone();
        return CallbackOutcome::Denied { description };
    }

    match params.get("code") {
        Some(code) if !code.is_empty() => CallbackOutcome::Code(code.clone()),
        _ => CallbackOutcome::MissingCode,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    code_tx: mpsc::Sender<String>,
    error_tx: mpsc::Sender<AuthError>,
    settled: Arc<AtomicBool>,
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = classify_callback(&params, &state.expected_state);
    let success = matches!(outcome, CallbackOutcome::Code(_));

    // Only the first request is delivered; retries still get a page back.
    if state
        .settled
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        match outcome {
            CallbackOutcome::Code(code) => {
                let _ = state.code_tx.try_send(code);
            },
            other => {
                if let Some(err) = other.into_error() {
                    warn!(error = %err, "rejected OAuth callback");
                    let _ = state.error_tx.try_send(err);
                }
            },
        }
    } else {
        debug!("ignoring repeated OAuth callback");
    }

    if success {
        (StatusCode::OK, Html(SUCCESS_HTML))
    } else {
        (StatusCode::BAD_REQUEST, Html(ERROR_HTML))
    }
}

/// Local HTTP server that waits for the identity provider's redirect.
///
/// The server runs on a spawned task; results reach [`CallbackServer::wait`]
/// through two single-slot channels so the handler never blocks.
pub struct CallbackServer {
    local_addr: SocketAddr,
    code_rx: mpsc::Receiver<String>,
    error_rx: mpsc::Receiver<AuthError>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Listen on the host, port, and path of the registered redirect URI.
    pub async fn bind(redirect_uri: &str, expected_state: &str) -> Result<Self, AuthError> {
        let url = Url::parse(redirect_uri)
            .map_err(|_| AuthError::InvalidRedirectUri(redirect_uri.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| AuthError::InvalidRedirectUri(redirect_uri.to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AuthError::InvalidRedirectUri(redirect_uri.to_string()))?;

        Self::start((host.as_str(), port), url.path(), expected_state).await
    }

    /// Listen on an explicit address. Port 0 picks a free port.
    pub async fn start(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        path: &str,
        expected_state: &str,
    ) -> Result<Self, AuthError> {
        let addr_label = format!("{addr:?}");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AuthError::CallbackBind {
                addr: addr_label.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| AuthError::CallbackBind {
                addr: addr_label,
                source,
            })?;

        let (code_tx, code_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = CallbackState {
            expected_state: Arc::from(expected_state),
            code_tx,
            error_tx,
            settled: Arc::new(AtomicBool::new(false)),
        };
        let app = Router::new()
            .route(path, get(handle_callback))
            .with_state(state);

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "OAuth callback server failed");
            }
        });

        info!(%local_addr, path, "listening for OAuth callback");
        Ok(Self {
            local_addr,
            code_rx,
            error_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first of: an authorization code, a callback error, or
    /// `timeout` elapsing.
    pub async fn wait(&mut self, timeout: Duration) -> Result<String, AuthError> {
        tokio::select! {
            Some(code) = self.code_rx.recv() => Ok(code),
            Some(err) = self.error_rx.recv() => Err(err),
            () = tokio::time::sleep(timeout) => Err(AuthError::LoginTimeout),
        }
    }

    /// Stop the server, waiting at most [`SHUTDOWN_GRACE`]. Safe to call
    /// more than once.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("OAuth callback server did not stop in time, aborting");
                task.abort();
            }
            debug!(local_addr = %self.local_addr, "OAuth callback server stopped");
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
