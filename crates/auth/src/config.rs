//! Configuration for the Nimbus authentication core.
//!
//! All endpoints are carried as full URLs so tests and staging environments
//! can redirect individual legs of the flow without touching the others.

use std::path::PathBuf;
use std::time::Duration;

/// How long a flow waits for an authorization code before giving up.
pub const CODE_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for the identity provider and the surrounding host integration.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// OAuth client id registered for the extension.
    pub client_id: String,

    /// Identity provider's authorization endpoint.
    pub authorization_endpoint: String,

    /// Identity provider's token endpoint.
    pub token_endpoint: String,

    /// Identity provider's userinfo endpoint.
    pub userinfo_endpoint: String,

    /// Compute API domain; hosts the post-sign-in success page.
    pub api_domain: String,

    /// Fixed remote redirect endpoint used by the proxied flow. The endpoint
    /// performs a second-hop redirect into the host's custom URI scheme.
    pub proxy_redirect_uri: String,

    /// URI scheme registered by the host editor (e.g. "vscode").
    pub uri_scheme: String,

    /// Authority of the extension's custom-URI callbacks
    /// (`<scheme>://<authority>/...`).
    pub callback_authority: String,

    /// Directory the loopback server serves auxiliary assets from
    /// (favicon etc.).
    pub asset_root: PathBuf,

    /// Timeout for the code wait; [`CODE_WAIT_TIMEOUT`] in production,
    /// shortened in tests.
    pub code_timeout: Duration,
}

impl AuthSettings {
    /// Settings for the hosted Nimbus service.
    pub fn hosted(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authorization_endpoint: "https://auth.nimbus.dev/authorize".to_string(),
            token_endpoint: "https://auth.nimbus.dev/oauth/token".to_string(),
            userinfo_endpoint: "https://auth.nimbus.dev/userinfo".to_string(),
            api_domain: "api.nimbus.dev".to_string(),
            proxy_redirect_uri: "https://api.nimbus.dev/vscode/redirect".to_string(),
            uri_scheme: "vscode".to_string(),
            callback_authority: "nimbus.notebooks".to_string(),
            asset_root: PathBuf::from("assets"),
            code_timeout: CODE_WAIT_TIMEOUT,
        }
    }

    /// The custom URI the host routes back into the extension after a
    /// proxied sign-in.
    #[must_use]
    pub fn callback_uri(&self) -> String {
        format!("{}://{}/did-authenticate", self.uri_scheme, self.callback_authority)
    }

    /// The custom URI of the in-editor success page the loopback redirect
    /// eventually lands on.
    #[must_use]
    pub fn success_uri(&self) -> String {
        format!("{}://{}/auth-complete", self.uri_scheme, self.callback_authority)
    }

    /// URL of the success page the loopback callback redirects the browser
    /// to, carrying the externally-resolved success URI as `state`.
    #[must_use]
    pub fn success_redirect_url(&self, success_uri: &str) -> String {
        format!(
            "https://{}/vscode/auth-success?state={}",
            self.api_domain,
            urlencoding::encode(success_uri)
        )
    }
}
