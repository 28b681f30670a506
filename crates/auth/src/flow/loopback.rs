//! Loopback flow: callback delivery via an ephemeral local HTTP server.
//!
//! Each trigger allocates its own server on `127.0.0.1:0`; the redirect URI
//! is built from the bound port. The server deliberately outlives code
//! resolution because the browser keeps requesting auxiliary assets (the
//! favicon) after the redirect — teardown happens when the attempt fails or
//! when the flow itself is disposed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use nimbus_domain::{NimbusError, Result};
use tracing::{debug, error};

use super::{build_authorization_url, FlowResult, PkceFlow, TriggerOptions};
use crate::code_manager::CodeManager;
use crate::config::AuthSettings;
use crate::ports::HostEnvironment;
use crate::server::{LoopbackHandler, LoopbackServer};

const SUCCESS_HTML: &str = r"<!DOCTYPE html>
<html>
<head><title>Signed in</title></head>
<body><h1>Signed in to Nimbus</h1><p>You can close this tab.</p></body>
</html>";

const FAILURE_HTML: &str = r"<!DOCTYPE html>
<html>
<head><title>Sign in failed</title></head>
<body><h1>Sign in failed</h1><p>Return to the editor and try again.</p></body>
</html>";

/// Flow variant backed by per-attempt loopback servers.
pub struct LoopbackFlow {
    settings: Arc<AuthSettings>,
    host: Arc<dyn HostEnvironment>,
    codes: Arc<CodeManager>,
    servers: Mutex<Vec<Arc<LoopbackServer>>>,
    disposed: AtomicBool,
}

impl LoopbackFlow {
    #[must_use]
    pub fn new(settings: Arc<AuthSettings>, host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            settings,
            host,
            codes: Arc::new(CodeManager::new()),
            servers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Number of loopback servers still owned by this flow (primarily for
    /// tests).
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.servers.lock().expect("loopback servers poisoned").len()
    }

    fn release_server(&self, server: &Arc<LoopbackServer>) {
        server.dispose();
        self.servers
            .lock()
            .expect("loopback servers poisoned")
            .retain(|tracked| !Arc::ptr_eq(tracked, server));
    }
}

#[async_trait]
impl PkceFlow for LoopbackFlow {
    async fn trigger(&self, options: TriggerOptions) -> Result<FlowResult> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(NimbusError::Internal("flow disposed".to_string()));
        }

        // Register the waiter before anything can possibly call back.
        let waiter = self.codes.subscribe(&options.nonce)?;

        let success_uri = self.host.resolve_external_uri(&self.settings.success_uri()).await?;
        let handler = Arc::new(CallbackRequestHandler {
            nonce: options.nonce.clone(),
            codes: Arc::clone(&self.codes),
            success_redirect: self.settings.success_redirect_url(&success_uri),
            asset_root: self.settings.asset_root.clone(),
        });

        let server = Arc::new(LoopbackServer::new(handler));
        let port = match server.start().await {
            Ok(port) => port,
            Err(err) => {
                server.dispose();
                return Err(err);
            }
        };
        self.servers.lock().expect("loopback servers poisoned").push(Arc::clone(&server));

        let redirect_uri = format!("http://127.0.0.1:{port}");
        let state = format!("nonce={}", urlencoding::encode(&options.nonce));
        let url = build_authorization_url(
            &self.settings,
            &redirect_uri,
            &options.scopes,
            &options.code_challenge,
            &state,
        );

        debug!(port = port, "opening external browser for loopback sign-in");
        match self.host.open_external(&url).await {
            Ok(true) => {}
            Ok(false) => {
                self.release_server(&server);
                return Err(NimbusError::Auth(
                    "host declined to open the external browser".to_string(),
                ));
            }
            Err(err) => {
                self.release_server(&server);
                return Err(err);
            }
        }

        match waiter.wait(self.settings.code_timeout, options.cancel.clone()).await {
            Ok(code) => {
                // The browser still fetches the favicon after the redirect;
                // the server stays up until the flow is disposed.
                debug!("authorization code received on loopback channel");
                Ok(FlowResult { code, redirect_uri })
            }
            Err(err) => {
                self.release_server(&server);
                Err(err)
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.codes.dispose();
        let servers: Vec<_> =
            self.servers.lock().expect("loopback servers poisoned").drain(..).collect();
        for server in servers {
            server.dispose();
        }
    }
}

/// Request handler bound to one trigger attempt.
struct CallbackRequestHandler {
    nonce: String,
    codes: Arc<CodeManager>,
    success_redirect: String,
    asset_root: PathBuf,
}

#[async_trait]
impl LoopbackHandler for CallbackRequestHandler {
    async fn handle_request(&self, request: Request) -> Response {
        // Only a browser can connect to the ephemeral port; anything without
        // a Host header did not come through one.
        if request.headers().get(header::HOST).is_none() {
            error!("loopback request without Host header");
            return StatusCode::BAD_REQUEST.into_response();
        }

        if request.method() != Method::GET {
            return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET")], "GET only\n")
                .into_response();
        }

        match request.uri().path() {
            "/" => self.handle_callback(request.uri().query().unwrap_or("")),
            path => serve_asset(&self.asset_root, path).await,
        }
    }
}

impl CallbackRequestHandler {
    fn handle_callback(&self, query: &str) -> Response {
        let params: HashMap<String, String> =
            url::form_urlencoded::parse(query.as_bytes()).into_owned().collect();

        let (Some(code), Some(state)) = (params.get("code"), params.get("state")) else {
            self.codes.fail_code(
                &self.nonce,
                NimbusError::Protocol(
                    "authorization callback is missing the code or state parameter".to_string(),
                ),
            );
            return (StatusCode::BAD_REQUEST, Html(FAILURE_HTML)).into_response();
        };

        // The state value is itself querystring-encoded and must carry the
        // nonce that keys the pending wait.
        let state_params: HashMap<String, String> =
            url::form_urlencoded::parse(state.as_bytes()).into_owned().collect();
        let Some(nonce) = state_params.get("nonce") else {
            self.codes.fail_code(
                &self.nonce,
                NimbusError::Protocol(
                    "authorization callback state does not carry a nonce".to_string(),
                ),
            );
            return (StatusCode::BAD_REQUEST, Html(FAILURE_HTML)).into_response();
        };

        self.codes.resolve_code(nonce, code.clone());

        // Send the browser on to the success page so the local tab can close
        // cleanly.
        (
            StatusCode::FOUND,
            [(header::LOCATION, self.success_redirect.clone())],
            Html(SUCCESS_HTML),
        )
            .into_response()
    }
}

async fn serve_asset(asset_root: &Path, path: &str) -> Response {
    let name = path.trim_start_matches('/');
    if name.is_empty() || name.contains("..") || name.contains('/') {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(asset_root.join(name)).await {
        Ok(bytes) => {
            let headers = [
                (header::CONTENT_TYPE, content_type_for(name).to_string()),
                (header::CONTENT_LENGTH, bytes.len().to_string()),
            ];
            (StatusCode::OK, headers, bytes).into_response()
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => {
            error!(asset = name, error = %err, "failed to read loopback asset");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("ico") => "image/x-icon",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("css") => "text/css",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the loopback flow's request handler.
    use std::time::Duration;

    use axum::body::Body;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn handler_with(codes: Arc<CodeManager>, asset_root: PathBuf) -> CallbackRequestHandler {
        CallbackRequestHandler {
            nonce: "nonce".to_string(),
            codes,
            success_redirect:
                "https://api.nimbus.dev/vscode/auth-success?state=vscode%3A%2F%2Fx".to_string(),
            asset_root,
        }
    }

    fn get(uri: &str) -> Request {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::HOST, "127.0.0.1")
            .body(Body::empty())
            .unwrap()
    }

    /// Validates `CallbackRequestHandler::handle_request` behavior for the
    /// successful callback scenario.
    ///
    /// Assertions:
    /// - Ensures the registered waiter resolves with the delivered code.
    /// - Confirms the response is a 302 whose Location contains
    ///   `/vscode/auth-success?state=`.
    #[tokio::test]
    async fn test_callback_resolves_waiter_and_redirects() {
        let codes = Arc::new(CodeManager::new());
        let waiter = codes.subscribe("nonce").unwrap();
        let handler = handler_with(Arc::clone(&codes), PathBuf::from("."));

        let response = handler.handle_request(get("/?state=nonce%3Dnonce&code=42")).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.contains("/vscode/auth-success?state="));

        let code =
            waiter.wait(Duration::from_millis(100), CancellationToken::new()).await.unwrap();
        assert_eq!(code, "42");
    }

    /// Validates `CallbackRequestHandler::handle_request` behavior for the
    /// missing code scenario.
    ///
    /// Assertions:
    /// - Ensures the in-flight wait fails with a protocol error.
    /// - Confirms the browser sees a 400.
    #[tokio::test]
    async fn test_callback_missing_code_fails_wait() {
        let codes = Arc::new(CodeManager::new());
        let waiter = codes.subscribe("nonce").unwrap();
        let handler = handler_with(Arc::clone(&codes), PathBuf::from("."));

        let response = handler.handle_request(get("/?state=nonce%3Dnonce")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let result = waiter.wait(Duration::from_millis(100), CancellationToken::new()).await;
        assert!(matches!(result, Err(NimbusError::Protocol(_))));
    }

    /// Validates `CallbackRequestHandler::handle_request` behavior for the
    /// state without nonce scenario.
    ///
    /// Assertions:
    /// - Ensures a state payload that decodes without a nonce fails the wait.
    #[tokio::test]
    async fn test_callback_state_without_nonce_fails_wait() {
        let codes = Arc::new(CodeManager::new());
        let waiter = codes.subscribe("nonce").unwrap();
        let handler = handler_with(Arc::clone(&codes), PathBuf::from("."));

        let response = handler.handle_request(get("/?state=other%3D1&code=42")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let result = waiter.wait(Duration::from_millis(100), CancellationToken::new()).await;
        assert!(matches!(result, Err(NimbusError::Protocol(_))));
    }

    /// Validates `CallbackRequestHandler::handle_request` behavior for the
    /// non-GET method scenario.
    ///
    /// Assertions:
    /// - Confirms a POST receives 405 with an `Allow: GET` header.
    #[tokio::test]
    async fn test_non_get_is_405_with_allow_header() {
        let handler = handler_with(Arc::new(CodeManager::new()), PathBuf::from("."));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::HOST, "127.0.0.1")
            .body(Body::empty())
            .unwrap();
        let response = handler.handle_request(request).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET");
    }

    /// Validates `serve_asset` behavior for the asset root scenarios.
    ///
    /// Assertions:
    /// - Ensures a present asset is served with an explicit Content-Length.
    /// - Ensures an unknown path returns 404.
    #[tokio::test]
    async fn test_asset_serving() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("favicon.ico"), b"icon-bytes").unwrap();
        let handler = handler_with(Arc::new(CodeManager::new()), dir.path().to_path_buf());

        let response = handler.handle_request(get("/favicon.ico")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "10");
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/x-icon");

        let response = handler.handle_request(get("/missing.png")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Validates `CallbackRequestHandler::handle_request` behavior for the
    /// missing Host header scenario.
    ///
    /// Assertions:
    /// - Ensures the defensive check rejects the request without touching the
    ///   pending wait.
    #[tokio::test]
    async fn test_missing_host_header_is_rejected_locally() {
        let codes = Arc::new(CodeManager::new());
        let _waiter = codes.subscribe("nonce").unwrap();
        let handler = handler_with(Arc::clone(&codes), PathBuf::from("."));

        let request = Request::builder().method(Method::GET).uri("/").body(Body::empty()).unwrap();
        let response = handler.handle_request(request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(codes.pending_count(), 1);
    }
}
