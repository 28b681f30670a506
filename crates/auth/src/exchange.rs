//! Token exchange and profile fetch against the identity provider.
//!
//! The exchange must present exactly the redirect URI the flow used in its
//! authorization request; providers reject the grant otherwise.

use std::sync::Arc;

use nimbus_domain::{NimbusError, Result};
use reqwest::header;
use serde::Deserialize;
use tracing::debug;

use crate::config::AuthSettings;

/// OAuth token response from the authorization server (RFC 6749).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Profile returned by the provider's userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    pub name: String,
}

/// OAuth error response from the authorization server (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

impl std::fmt::Display for OAuthErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

/// HTTP client for the code exchange and userinfo legs of the flow.
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    settings: Arc<AuthSettings>,
    client: reqwest::Client,
}

impl TokenExchanger {
    #[must_use]
    pub fn new(settings: Arc<AuthSettings>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { settings, client }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `redirect_uri` must be exactly the one the flow presented to the
    /// provider.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .client
            .post(&self.settings.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|err| NimbusError::Network(format!("token exchange failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = match response.json::<OAuthErrorBody>().await {
                Ok(body) => body.to_string(),
                Err(_) => format!("token endpoint returned status {status}"),
            };
            return Err(NimbusError::Auth(detail));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|err| NimbusError::InvalidInput(format!("malformed token response: {err}")))?;

        debug!("authorization code exchanged for tokens");
        Ok(tokens)
    }

    /// Fetch the signed-in user's profile with the fresh access token.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile> {
        let response = self
            .client
            .get(&self.settings.userinfo_endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| NimbusError::Network(format!("userinfo request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(NimbusError::Auth(format!(
                "userinfo request failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| NimbusError::InvalidInput(format!("malformed userinfo response: {err}")))
    }
}
