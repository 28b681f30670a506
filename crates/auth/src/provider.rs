//! Host-facing authentication provider.
//!
//! Orchestrates one sign-in attempt end to end: nonce and PKCE generation,
//! flow selection, code exchange against the identity provider, profile
//! fetch, and session persistence. The provider owns user-visible
//! notification of outcomes; flows only report errors upward.

use std::sync::Arc;

use nimbus_domain::{AuthSession, Result, SessionAccount};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::config::AuthSettings;
use crate::exchange::TokenExchanger;
use crate::flow::{PkceFlow, TriggerOptions};
use crate::pkce::{generate_nonce, PkceChallenge};
use crate::ports::{ProviderRegistry, SecretStore, UserInterface};
use crate::store::SessionStore;

/// Id this provider registers under in the host's authentication registry.
pub const PROVIDER_ID: &str = "nimbus";

/// Host session manager for the Nimbus authentication provider.
pub struct AuthProvider {
    flow: Arc<dyn PkceFlow>,
    exchanger: TokenExchanger,
    sessions: SessionStore,
    ui: Arc<dyn UserInterface>,
    registry: Arc<dyn ProviderRegistry>,
}

impl AuthProvider {
    /// Create the provider and register it with the host.
    #[must_use]
    pub fn new(
        settings: Arc<AuthSettings>,
        flow: Arc<dyn PkceFlow>,
        secrets: Arc<dyn SecretStore>,
        ui: Arc<dyn UserInterface>,
        registry: Arc<dyn ProviderRegistry>,
    ) -> Self {
        registry.register(PROVIDER_ID);
        info!("authentication provider registered");

        Self {
            flow,
            exchanger: TokenExchanger::new(settings),
            sessions: SessionStore::new(secrets),
            ui,
            registry,
        }
    }

    /// Sessions currently persisted, filtered to those covering `scopes`
    /// when given.
    ///
    /// An empty store yields an empty list; corrupted persisted JSON is a
    /// distinct `Storage` error.
    pub async fn get_sessions(&self, scopes: Option<&[String]>) -> Result<Vec<AuthSession>> {
        self.sessions.matching(scopes).await
    }

    /// Run a full sign-in and persist the resulting session.
    ///
    /// On failure the user is notified with an error message and the error is
    /// returned; cancellation is reported to the caller but never surfaced as
    /// a user-facing error.
    pub async fn create_session(&self, scopes: &[String]) -> Result<AuthSession> {
        let result = self.sign_in(scopes).await;

        match &result {
            Ok(session) => {
                self.ui.show_info(&format!("Signed in to Nimbus as {}", session.account.label));
            }
            Err(err) if err.is_cancellation() => {
                trace!("sign-in cancelled by the user");
            }
            Err(err) => {
                error!(error = %err, "sign-in failed");
                self.ui.show_error(&format!("Sign in failed: {err}"));
            }
        }

        result
    }

    async fn sign_in(&self, scopes: &[String]) -> Result<AuthSession> {
        let nonce = generate_nonce();
        let challenge = PkceChallenge::generate();
        let scopes = normalize_scopes(scopes);
        let cancel = CancellationToken::new();

        let _progress = self.ui.begin_progress("Signing in to Nimbus…", cancel.clone());

        debug!("awaiting authorization code");
        let flow_result = self
            .flow
            .trigger(TriggerOptions {
                nonce,
                scopes: scopes.clone(),
                code_challenge: challenge.code_challenge.clone(),
                cancel,
            })
            .await?;

        debug!("exchanging authorization code");
        let tokens = self
            .exchanger
            .exchange_code(
                &flow_result.code,
                &challenge.code_verifier,
                &flow_result.redirect_uri,
            )
            .await?;

        debug!("fetching user profile");
        let profile = self.exchanger.fetch_profile(&tokens.access_token).await?;

        let session = AuthSession {
            // The session id is its own identifier, never the flow nonce.
            id: Uuid::new_v4().to_string(),
            access_token: tokens.access_token,
            account: SessionAccount { id: profile.email, label: profile.name },
            scopes,
        };

        self.sessions.append(session.clone()).await?;
        self.registry.sessions_changed(PROVIDER_ID);
        info!(account = %session.account.id, "session created");

        Ok(session)
    }

    /// Remove the session with `id`. Removing an unknown id leaves the
    /// persisted store unwritten.
    pub async fn remove_session(&self, id: &str) -> Result<()> {
        if self.sessions.remove(id).await? {
            self.registry.sessions_changed(PROVIDER_ID);
            info!(session = %id, "session removed");
        } else {
            debug!(session = %id, "no session with this id; storage untouched");
        }
        Ok(())
    }

    /// Unregister from the host and release the flow's resources.
    pub fn dispose(&self) {
        self.registry.unregister(PROVIDER_ID);
        self.flow.dispose();
        debug!("authentication provider disposed");
    }
}

fn normalize_scopes(scopes: &[String]) -> Vec<String> {
    let mut scopes = scopes.to_vec();
    scopes.sort();
    scopes.dedup();
    scopes
}

#[cfg(test)]
mod tests {
    //! Unit tests for provider, with a scripted flow and wiremock identity
    //! provider.
    use nimbus_domain::NimbusError;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::{MemorySecretStore, MockRegistry, MockUserInterface, StaticCodeFlow};

    struct Fixture {
        provider: AuthProvider,
        flow: Arc<StaticCodeFlow>,
        secrets: Arc<MemorySecretStore>,
        ui: Arc<MockUserInterface>,
        registry: Arc<MockRegistry>,
    }

    fn fixture(server: &MockServer) -> Fixture {
        let mut settings = AuthSettings::hosted("client123");
        settings.token_endpoint = format!("{}/oauth/token", server.uri());
        settings.userinfo_endpoint = format!("{}/userinfo", server.uri());

        let flow = Arc::new(StaticCodeFlow::new("42"));
        let secrets = Arc::new(MemorySecretStore::new());
        let ui = Arc::new(MockUserInterface::new());
        let registry = Arc::new(MockRegistry::new());

        let provider = AuthProvider::new(
            Arc::new(settings),
            Arc::clone(&flow) as Arc<dyn PkceFlow>,
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            Arc::clone(&ui) as Arc<dyn UserInterface>,
            Arc::clone(&registry) as Arc<dyn ProviderRegistry>,
        );

        Fixture { provider, flow, secrets, ui, registry }
    }

    fn mount_identity_provider(server: &MockServer) -> (Mock, Mock) {
        let token = Mock::given(method("POST")).and(path("/oauth/token")).respond_with(
            ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "123",
                "token_type": "Bearer",
                "expires_in": 3600
            })),
        );
        let userinfo = Mock::given(method("GET")).and(path("/userinfo")).respond_with(
            ResponseTemplate::new(200).set_body_json(json!({
                "id": "1337",
                "email": "foo@example.com",
                "name": "Foo Bar"
            })),
        );
        (token, userinfo)
    }

    /// Validates `AuthProvider::create_session` behavior for the end-to-end
    /// success scenario.
    ///
    /// Assertions:
    /// - Confirms the session carries the exchanged access token, the
    ///   profile-derived account, and sorted scopes.
    /// - Ensures the session id differs from the flow nonce.
    /// - Ensures the user was notified and the registry saw a change.
    #[tokio::test]
    async fn test_create_session_success() {
        let server = MockServer::start().await;
        let (token, userinfo) = mount_identity_provider(&server);
        token.mount(&server).await;
        userinfo.mount(&server).await;

        let fixture = fixture(&server);
        let session = fixture
            .provider
            .create_session(&["profile".to_string(), "email".to_string()])
            .await
            .unwrap();

        assert_eq!(session.access_token, "123");
        assert_eq!(session.account.id, "foo@example.com");
        assert_eq!(session.account.label, "Foo Bar");
        assert_eq!(session.scopes, vec!["email".to_string(), "profile".to_string()]);

        // The id is freshly generated, distinct from the nonce the flow saw.
        let nonce = fixture.flow.last_nonce().unwrap();
        assert_ne!(session.id, nonce);

        let persisted = fixture.provider.get_sessions(None).await.unwrap();
        assert_eq!(persisted, vec![session]);

        assert_eq!(fixture.registry.change_count(), 1);
        assert!(fixture.ui.infos().iter().any(|m| m.contains("Signed in")));
        assert!(fixture.ui.errors().is_empty());
    }

    /// Validates `AuthProvider::create_session` behavior for the exchange
    /// failure scenario.
    ///
    /// Assertions:
    /// - Ensures the user sees a "Sign in failed" notification.
    /// - Confirms nothing was persisted.
    #[tokio::test]
    async fn test_create_session_exchange_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let fixture = fixture(&server);
        let result = fixture.provider.create_session(&["profile".to_string()]).await;

        assert!(matches!(result, Err(NimbusError::Auth(_))));
        assert!(fixture.ui.errors().iter().any(|m| m.starts_with("Sign in failed")));
        assert!(fixture.provider.get_sessions(None).await.unwrap().is_empty());
        assert_eq!(fixture.registry.change_count(), 0);
    }

    /// Validates `AuthProvider::create_session` behavior for the cancelled
    /// progress scenario.
    ///
    /// Assertions:
    /// - Ensures cancellation rejects the call but shows no error
    ///   notification.
    #[tokio::test]
    async fn test_create_session_cancelled_is_not_an_error_notification() {
        let server = MockServer::start().await;
        let fixture = fixture(&server);
        fixture.ui.cancel_progress_immediately();

        let result = fixture.provider.create_session(&["profile".to_string()]).await;

        assert!(matches!(result, Err(NimbusError::Cancelled(_))));
        assert!(fixture.ui.errors().is_empty());
    }

    /// Validates `AuthProvider::remove_session` behavior for the idempotent
    /// removal scenario.
    ///
    /// Assertions:
    /// - Ensures a removed id never comes back from `get_sessions`.
    /// - Confirms removing an unknown id performs no storage write and fires
    ///   no change notification.
    #[tokio::test]
    async fn test_remove_session_round_trip() {
        let server = MockServer::start().await;
        let (token, userinfo) = mount_identity_provider(&server);
        token.mount(&server).await;
        userinfo.mount(&server).await;

        let fixture = fixture(&server);
        let session =
            fixture.provider.create_session(&["profile".to_string()]).await.unwrap();

        fixture.provider.remove_session(&session.id).await.unwrap();
        assert!(fixture.provider.get_sessions(None).await.unwrap().is_empty());
        assert_eq!(fixture.registry.change_count(), 2);

        let writes = fixture.secrets.write_count();
        fixture.provider.remove_session(&session.id).await.unwrap();
        assert_eq!(fixture.secrets.write_count(), writes);
        assert_eq!(fixture.registry.change_count(), 2);
    }

    /// Validates `AuthProvider::get_sessions` behavior for the scope filter
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures only sessions covering the requested scopes are returned.
    #[tokio::test]
    async fn test_get_sessions_scope_filter() {
        let server = MockServer::start().await;
        let (token, userinfo) = mount_identity_provider(&server);
        token.mount(&server).await;
        userinfo.mount(&server).await;

        let fixture = fixture(&server);
        fixture
            .provider
            .create_session(&["profile".to_string(), "email".to_string()])
            .await
            .unwrap();

        let matched = fixture
            .provider
            .get_sessions(Some(&["email".to_string()]))
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);

        let unmatched = fixture
            .provider
            .get_sessions(Some(&["admin".to_string()]))
            .await
            .unwrap();
        assert!(unmatched.is_empty());
    }

    /// Validates `AuthProvider::get_sessions` behavior for the unreadable
    /// storage scenario.
    ///
    /// Assertions:
    /// - Ensures a failing secret store surfaces as a `Storage` error rather
    ///   than an empty session list.
    #[tokio::test]
    async fn test_get_sessions_storage_failure_is_surfaced() {
        let server = MockServer::start().await;
        let fixture = fixture(&server);
        fixture.secrets.fail_reads();

        let result = fixture.provider.get_sessions(None).await;
        assert!(matches!(result, Err(NimbusError::Storage(_))));
    }

    /// Validates `AuthProvider::dispose` behavior for the teardown scenario.
    ///
    /// Assertions:
    /// - Ensures the provider unregisters and disposes its flow.
    #[tokio::test]
    async fn test_dispose_unregisters_and_releases_flow() {
        let server = MockServer::start().await;
        let fixture = fixture(&server);

        assert_eq!(fixture.registry.registered(), vec![PROVIDER_ID.to_string()]);

        fixture.provider.dispose();
        assert_eq!(fixture.registry.unregistered(), vec![PROVIDER_ID.to_string()]);
        assert!(fixture.flow.is_disposed());
    }
}
