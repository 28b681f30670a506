//! OAuth 2.0 authorization-code-with-PKCE flow engine.
//!
//! Two callback-delivery mechanisms sit behind one contract: a loopback HTTP
//! server receiving the provider's redirect directly, and a proxied remote
//! redirect that re-enters the editor through its custom URI scheme. A flow
//! turns trigger parameters into an authorization code plus the redirect URI
//! that was actually presented to the provider — the token exchange requires
//! an exact match.

mod loopback;
mod proxied;

use async_trait::async_trait;
use nimbus_domain::Result;
use tokio_util::sync::CancellationToken;

pub use loopback::LoopbackFlow;
pub use proxied::ProxiedFlow;

use crate::config::AuthSettings;

/// Parameters of one flow attempt; immutable per invocation.
#[derive(Debug, Clone)]
pub struct TriggerOptions {
    /// Opaque random correlation token (UUID-formatted).
    pub nonce: String,
    /// Scopes to request, space-joined into the authorization URL.
    pub scopes: Vec<String>,
    /// S256-derived PKCE code challenge.
    pub code_challenge: String,
    /// Cooperative cancellation for this attempt.
    pub cancel: CancellationToken,
}

/// Output of a successful flow attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResult {
    /// The authorization code observed on the callback channel.
    pub code: String,
    /// Exactly the redirect URI presented to the identity provider.
    pub redirect_uri: String,
}

/// Contract shared by the loopback and proxied flow variants.
#[async_trait]
pub trait PkceFlow: Send + Sync {
    /// Run one sign-in attempt: open whatever callback channel the variant
    /// needs, have the host open the authorization URL externally, and return
    /// once a matching code is observed.
    ///
    /// Rejects on external-open failure, after the code-wait timeout, or when
    /// `options.cancel` fires — releasing this attempt's resources in every
    /// reject case. Concurrent attempts with distinct nonces are independent.
    async fn trigger(&self, options: TriggerOptions) -> Result<FlowResult>;

    /// Synchronously release the resources of every outstanding trigger.
    /// Idempotent.
    fn dispose(&self);
}

/// Build the provider authorization URL for one attempt.
pub(crate) fn build_authorization_url(
    settings: &AuthSettings,
    redirect_uri: &str,
    scopes: &[String],
    code_challenge: &str,
    state: &str,
) -> String {
    let scope = scopes.join(" ");
    let params = [
        ("response_type", "code"),
        ("client_id", settings.client_id.as_str()),
        ("redirect_uri", redirect_uri),
        ("scope", scope.as_str()),
        ("prompt", "login"),
        ("state", state),
        ("code_challenge", code_challenge),
        ("code_challenge_method", "S256"),
    ];

    let query = params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", settings.authorization_endpoint, query)
}
