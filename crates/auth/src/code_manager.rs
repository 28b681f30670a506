//! Nonce-keyed authorization-code broker.
//!
//! Decouples "a flow is waiting for a code" from "a code arrived". A flow
//! registers a waiter under its nonce before the browser ever opens; whatever
//! channel the callback travels through (loopback request handler, host URI
//! invocation) resolves the waiter by nonce. Late or duplicate deliveries
//! after a wait has ended are dropped silently — the callback may simply not
//! be meant for any live flow anymore.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nimbus_domain::{NimbusError, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type WaiterMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<String>>>>>;

/// Keyed single-shot promise broker for authorization codes.
#[derive(Debug, Default)]
pub struct CodeManager {
    waiters: WaiterMap,
}

impl CodeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `nonce`.
    ///
    /// At most one waiter may be live per nonce; registering a second one
    /// before the first resolves is a contract violation and returns
    /// `InvalidInput`.
    pub fn subscribe(&self, nonce: &str) -> Result<CodeWaiter> {
        let mut waiters = self.waiters.lock().expect("code waiters poisoned");
        if waiters.contains_key(nonce) {
            return Err(NimbusError::InvalidInput(
                "a code wait is already registered for this nonce".to_string(),
            ));
        }

        let (sender, receiver) = oneshot::channel();
        waiters.insert(nonce.to_string(), sender);
        debug!(nonce = %nonce, "registered code waiter");

        Ok(CodeWaiter {
            nonce: nonce.to_string(),
            receiver: Some(receiver),
            waiters: Arc::clone(&self.waiters),
        })
    }

    /// Resolve the waiter registered under `nonce` with an authorization
    /// code. No-op when no waiter is registered.
    pub fn resolve_code(&self, nonce: &str, code: impl Into<String>) {
        let sender = self.waiters.lock().expect("code waiters poisoned").remove(nonce);
        match sender {
            Some(sender) => {
                debug!(nonce = %nonce, "resolving code waiter");
                let _ = sender.send(Ok(code.into()));
            }
            None => trace!(nonce = %nonce, "code arrived with no registered waiter; ignoring"),
        }
    }

    /// Fail the waiter registered under `nonce`. No-op when no waiter is
    /// registered.
    pub fn fail_code(&self, nonce: &str, error: NimbusError) {
        let sender = self.waiters.lock().expect("code waiters poisoned").remove(nonce);
        match sender {
            Some(sender) => {
                debug!(nonce = %nonce, error = %error, "failing code waiter");
                let _ = sender.send(Err(error));
            }
            None => trace!(nonce = %nonce, "failure arrived with no registered waiter; ignoring"),
        }
    }

    /// Reject every outstanding waiter with a disposal error.
    pub fn dispose(&self) {
        let drained: Vec<_> =
            self.waiters.lock().expect("code waiters poisoned").drain().collect();
        for (nonce, sender) in drained {
            trace!(nonce = %nonce, "rejecting waiter on dispose");
            let _ = sender.send(Err(NimbusError::Cancelled("code manager disposed".to_string())));
        }
    }

    /// Number of live waiters (primarily for tests).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.waiters.lock().expect("code waiters poisoned").len()
    }
}

/// A registered code wait; resolves to the code, or fails on timeout,
/// cancellation, or disposal. The registration is cleaned up on every
/// terminal outcome, so a stale resolve cannot leak into a later flow.
#[derive(Debug)]
pub struct CodeWaiter {
    nonce: String,
    receiver: Option<oneshot::Receiver<Result<String>>>,
    waiters: WaiterMap,
}

impl CodeWaiter {
    /// Nonce this waiter is registered under.
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Await the code, racing against `timeout` and `cancel`. The losing
    /// timer is dropped with the race.
    pub async fn wait(mut self, timeout: Duration, cancel: CancellationToken) -> Result<String> {
        let Some(mut receiver) = self.receiver.take() else {
            return Err(NimbusError::Internal("code waiter polled twice".to_string()));
        };

        tokio::select! {
            outcome = &mut receiver => outcome.unwrap_or_else(|_| {
                Err(NimbusError::Cancelled("code wait abandoned".to_string()))
            }),
            () = cancel.cancelled() => {
                Err(NimbusError::Cancelled("sign-in cancelled".to_string()))
            }
            () = tokio::time::sleep(timeout) => {
                Err(NimbusError::Timeout(format!(
                    "no authorization code received within {} seconds",
                    timeout.as_secs()
                )))
            }
        }
        // Drop clears the registration for the timeout/cancel outcomes.
    }
}

impl Drop for CodeWaiter {
    fn drop(&mut self) {
        self.waiters.lock().expect("code waiters poisoned").remove(&self.nonce);
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for code_manager.
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    /// Validates `CodeManager::resolve_code` behavior for the no registered
    /// waiter scenario.
    ///
    /// Assertion coverage: ensures the routine completes without panicking.
    #[test]
    fn test_resolve_without_waiter_is_noop() {
        let manager = CodeManager::new();
        manager.resolve_code("unknown", "42");
        manager.fail_code("unknown", NimbusError::Protocol("x".to_string()));
    }

    /// Validates `CodeManager::subscribe` behavior for the independent nonce
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures resolving one nonce never affects the other's pending wait.
    /// - Confirms both waits resolve to their own codes.
    #[tokio::test]
    async fn test_concurrent_nonces_resolve_independently() {
        let manager = CodeManager::new();
        let first = manager.subscribe("nonce-1").unwrap();
        let second = manager.subscribe("nonce-2").unwrap();

        manager.resolve_code("nonce-1", "code-1");
        assert_eq!(manager.pending_count(), 1);

        manager.resolve_code("nonce-2", "code-2");

        let code1 = first.wait(SHORT, CancellationToken::new()).await.unwrap();
        let code2 = second.wait(SHORT, CancellationToken::new()).await.unwrap();
        assert_eq!(code1, "code-1");
        assert_eq!(code2, "code-2");
        assert_eq!(manager.pending_count(), 0);
    }

    /// Validates `CodeManager::subscribe` behavior for the duplicate
    /// registration scenario.
    ///
    /// Assertions:
    /// - Ensures a second subscription for a live nonce is rejected with
    ///   `InvalidInput`.
    #[test]
    fn test_duplicate_subscription_is_rejected() {
        let manager = CodeManager::new();
        let _waiter = manager.subscribe("nonce").unwrap();

        let result = manager.subscribe("nonce");
        assert!(matches!(result, Err(NimbusError::InvalidInput(_))));
    }

    /// Validates `CodeWaiter::wait` behavior for the timeout scenario.
    ///
    /// Assertions:
    /// - Ensures the wait fails with a matchable timeout error.
    /// - Confirms the registration is cleaned up afterwards.
    #[tokio::test]
    async fn test_wait_times_out_and_cleans_up() {
        let manager = CodeManager::new();
        let waiter = manager.subscribe("nonce").unwrap();

        let result = waiter.wait(Duration::from_millis(10), CancellationToken::new()).await;
        assert!(matches!(result, Err(NimbusError::Timeout(_))));
        assert_eq!(manager.pending_count(), 0);

        // A late callback after the timeout must be a silent no-op.
        manager.resolve_code("nonce", "too-late");
    }

    /// Validates `CodeWaiter::wait` behavior for the cancellation scenario.
    ///
    /// Assertions:
    /// - Ensures cancelling the signal rejects the wait with `Cancelled`.
    /// - Confirms the registration is cleaned up afterwards.
    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let manager = CodeManager::new();
        let waiter = manager.subscribe("nonce").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = waiter.wait(Duration::from_secs(5), cancel).await;
        assert!(matches!(result, Err(NimbusError::Cancelled(_))));
        assert_eq!(manager.pending_count(), 0);
    }

    /// Validates `CodeManager::dispose` behavior for the outstanding waiter
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures a pending wait is rejected with a disposal error.
    #[tokio::test]
    async fn test_dispose_rejects_outstanding_waiters() {
        let manager = CodeManager::new();
        let waiter = manager.subscribe("nonce").unwrap();

        manager.dispose();

        let result = waiter.wait(Duration::from_secs(5), CancellationToken::new()).await;
        assert!(matches!(result, Err(NimbusError::Cancelled(_))));
    }

    /// Validates `CodeManager::fail_code` behavior for the protocol error
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the wait surfaces the protocol error it was failed with.
    #[tokio::test]
    async fn test_fail_code_surfaces_error() {
        let manager = CodeManager::new();
        let waiter = manager.subscribe("nonce").unwrap();

        manager.fail_code("nonce", NimbusError::Protocol("missing code".to_string()));

        let result = waiter.wait(SHORT, CancellationToken::new()).await;
        assert!(matches!(result, Err(NimbusError::Protocol(_))));
    }
}
