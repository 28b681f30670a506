//! Proxied-redirect flow: callback delivery via a fixed remote endpoint.
//!
//! Used when the environment cannot run a local listener. The provider
//! redirects to a remote endpoint that performs a second-hop redirect into
//! the host's custom URI scheme; the host then publishes the invocation on
//! the URI event bus. Invocations missing the nonce or code are silently
//! ignored — they are malformed or simply not meant for this flow.

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_domain::{NimbusError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{build_authorization_url, FlowResult, PkceFlow, TriggerOptions};
use crate::config::AuthSettings;
use crate::events::UriEventBus;
use crate::ports::HostEnvironment;

/// Flow variant listening on the host's URI invocation bus.
pub struct ProxiedFlow {
    settings: Arc<AuthSettings>,
    host: Arc<dyn HostEnvironment>,
    bus: Arc<UriEventBus>,
    disposed: CancellationToken,
}

impl ProxiedFlow {
    #[must_use]
    pub fn new(
        settings: Arc<AuthSettings>,
        host: Arc<dyn HostEnvironment>,
        bus: Arc<UriEventBus>,
    ) -> Self {
        Self { settings, host, bus, disposed: CancellationToken::new() }
    }
}

#[async_trait]
impl PkceFlow for ProxiedFlow {
    async fn trigger(&self, options: TriggerOptions) -> Result<FlowResult> {
        if self.disposed.is_cancelled() {
            return Err(NimbusError::Internal("flow disposed".to_string()));
        }

        // Subscribe before opening the browser so no invocation can slip by.
        let mut subscription = self.bus.subscribe();

        // The remote endpoint needs to know where to send the second hop;
        // the externally-resolved callback URI rides along as state.
        let callback_uri =
            self.host.resolve_external_uri(&self.settings.callback_uri()).await?;

        let redirect_uri = self.settings.proxy_redirect_uri.clone();
        let url = build_authorization_url(
            &self.settings,
            &redirect_uri,
            &options.scopes,
            &options.code_challenge,
            &callback_uri,
        );

        debug!("opening external browser for proxied sign-in");
        match self.host.open_external(&url).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(NimbusError::Auth(
                    "host declined to open the external browser".to_string(),
                ));
            }
            Err(err) => return Err(err),
        }

        let timeout = tokio::time::sleep(self.settings.code_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                () = options.cancel.cancelled() => {
                    return Err(NimbusError::Cancelled("sign-in cancelled".to_string()));
                }
                () = self.disposed.cancelled() => {
                    return Err(NimbusError::Cancelled("flow disposed".to_string()));
                }
                () = &mut timeout => {
                    return Err(NimbusError::Timeout(format!(
                        "no authorization code received within {} seconds",
                        self.settings.code_timeout.as_secs()
                    )));
                }
                invocation = subscription.recv() => {
                    let Some(invocation) = invocation else {
                        return Err(NimbusError::Internal(
                            "URI event bus closed".to_string(),
                        ));
                    };

                    let nonce = invocation.query_param("nonce");
                    let code = invocation.query_param("code");
                    let (Some(nonce), Some(code)) = (nonce, code) else {
                        trace!("ignoring URI invocation without nonce or code");
                        continue;
                    };
                    if nonce != options.nonce || code.is_empty() {
                        trace!("ignoring URI invocation for a different flow");
                        continue;
                    }

                    debug!("authorization code received on proxied channel");
                    return Ok(FlowResult { code, redirect_uri });
                }
            }
        }
    }

    fn dispose(&self) {
        self.disposed.cancel();
    }
}
