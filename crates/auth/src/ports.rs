//! Port interfaces for the host editor integration
//!
//! These traits define the boundaries between the authentication core and the
//! host editor process. The extension never talks to host APIs directly;
//! everything it needs from the editor arrives through one of these ports,
//! which keeps the core testable with in-memory doubles.

use async_trait::async_trait;
use nimbus_domain::Result;
use tokio_util::sync::CancellationToken;

/// Trait for host-environment capabilities around URIs and the browser
#[async_trait]
pub trait HostEnvironment: Send + Sync {
    /// Ask the host to open a URL in the user's external browser.
    ///
    /// Returns `Ok(false)` when the host declined the request (the flow must
    /// treat this as a failed attempt).
    async fn open_external(&self, url: &str) -> Result<bool>;

    /// Resolve a URI into one reachable from outside the host process
    /// (tunnel-aware remote setups rewrite the authority here).
    async fn resolve_external_uri(&self, uri: &str) -> Result<String>;
}

/// Trait for the host's asynchronous encrypted key-value store
///
/// Values are opaque strings; the session and assigned-server stores layer a
/// JSON-array convention on top.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret, `None` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a secret, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a secret; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Trait for user-visible notifications and progress
pub trait UserInterface: Send + Sync {
    /// Show an informational message.
    fn show_info(&self, message: &str);

    /// Show an error message.
    fn show_error(&self, message: &str);

    /// Begin a cancelable progress notification. If the user cancels from the
    /// host UI, the implementation cancels `signal`. The returned guard ends
    /// the notification when dropped.
    fn begin_progress(&self, title: &str, signal: CancellationToken) -> ProgressGuard;
}

/// Trait for the host's authentication-provider registry
pub trait ProviderRegistry: Send + Sync {
    /// Register the provider under its id.
    fn register(&self, provider_id: &str);

    /// Unregister the provider.
    fn unregister(&self, provider_id: &str);

    /// Notify the host that the provider's session list changed.
    fn sessions_changed(&self, provider_id: &str);
}

/// Guard ending a progress notification on drop.
pub struct ProgressGuard {
    on_end: Option<Box<dyn FnOnce() + Send>>,
}

impl ProgressGuard {
    /// Guard invoking `on_end` when the progress scope finishes.
    pub fn new(on_end: impl FnOnce() + Send + 'static) -> Self {
        Self { on_end: Some(Box::new(on_end)) }
    }

    /// Guard that does nothing on drop.
    #[must_use]
    pub fn noop() -> Self {
        Self { on_end: None }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            on_end();
        }
    }
}

impl std::fmt::Debug for ProgressGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressGuard").field("active", &self.on_end.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for ports.
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Validates `ProgressGuard::new` behavior for the drop scenario.
    ///
    /// Assertions:
    /// - Ensures the end callback runs exactly when the guard is dropped.
    #[test]
    fn test_progress_guard_runs_on_drop() {
        let ended = Arc::new(AtomicBool::new(false));
        let flag = ended.clone();

        let guard = ProgressGuard::new(move || flag.store(true, Ordering::SeqCst));
        assert!(!ended.load(Ordering::SeqCst));

        drop(guard);
        assert!(ended.load(Ordering::SeqCst));
    }

    /// Validates `ProgressGuard::noop` behavior for the no-callback scenario.
    ///
    /// Assertion coverage: ensures the routine completes without panicking.
    #[test]
    fn test_progress_guard_noop() {
        drop(ProgressGuard::noop());
    }
}
