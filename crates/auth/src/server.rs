//! Ephemeral loopback HTTP server for OAuth redirect callbacks.
//!
//! The server owns socket lifecycle only: it binds an OS-assigned port on
//! `127.0.0.1`, forwards every inbound request to an injected
//! [`LoopbackHandler`], and reports serve errors and shutdown to the same
//! handler. Path and method dispatch are the handler's concern.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use nimbus_domain::{NimbusError, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handler interface the server delegates to.
#[async_trait]
pub trait LoopbackHandler: Send + Sync {
    /// Handle one inbound request.
    async fn handle_request(&self, request: Request) -> Response;

    /// Observe a socket-level serve error. Errors here never reject an
    /// in-flight flow; the default implementation does nothing (the server
    /// logs them regardless).
    fn handle_error(&self, error: &std::io::Error) {
        let _ = error;
    }

    /// Observe the listener closing.
    fn handle_close(&self) {}
}

/// Disposable local HTTP listener bound to `127.0.0.1:0`.
pub struct LoopbackServer {
    handler: Arc<dyn LoopbackHandler>,
    shutdown: CancellationToken,
    port: tokio::sync::OnceCell<u16>,
}

impl LoopbackServer {
    #[must_use]
    pub fn new(handler: Arc<dyn LoopbackHandler>) -> Self {
        Self { handler, shutdown: CancellationToken::new(), port: tokio::sync::OnceCell::new() }
    }

    /// Bind and start serving, returning the OS-assigned port.
    ///
    /// Idempotent: concurrent and repeated calls share the one bind — the
    /// first caller performs it, the rest await the same result.
    pub async fn start(&self) -> Result<u16> {
        if self.shutdown.is_cancelled() {
            return Err(NimbusError::Internal("loopback server disposed".to_string()));
        }

        self.port
            .get_or_try_init(|| async {
                let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(|err| {
                    NimbusError::Network(format!("failed to bind loopback server: {err}"))
                })?;

                let port = listener
                    .local_addr()
                    .map_err(|_| {
                        NimbusError::Internal(
                            "loopback server reported no usable address".to_string(),
                        )
                    })?
                    .port();

                let app = Router::new().fallback(dispatch).with_state(self.handler.clone());

                let handler = self.handler.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    let serve = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown.cancelled_owned())
                        .await;
                    if let Err(err) = serve {
                        // Close errors are swallowed here; nothing upstream
                        // can act on them.
                        warn!(error = %err, "loopback server closed with error");
                        handler.handle_error(&err);
                    }
                    handler.handle_close();
                });

                debug!(port = port, "loopback server listening");
                Ok(port)
            })
            .await
            .copied()
    }

    /// Stop serving. Idempotent; a server that never started is a no-op.
    pub fn dispose(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if let Some(port) = self.port.get() {
            debug!(port = *port, "disposing loopback server");
        }
        self.shutdown.cancel();
    }

    /// The bound port, once `start` has succeeded.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port.get().copied()
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch(
    State(handler): State<Arc<dyn LoopbackHandler>>,
    request: Request,
) -> Response {
    handler.handle_request(request).await
}
