//! In-memory doubles for the host ports.
//!
//! Deterministic stand-ins used by this crate's tests; kept in the library so
//! integration tests and downstream consumers can drive the core without a
//! live editor host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use nimbus_domain::{NimbusError, Result};
use tokio_util::sync::CancellationToken;

use crate::flow::{FlowResult, PkceFlow, TriggerOptions};
use crate::ports::{
    HostEnvironment, ProgressGuard, ProviderRegistry, SecretStore, UserInterface,
};

/// In-memory [`SecretStore`] recording read and write counts.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<String, String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls observed.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set` calls observed.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent `get` fail with a storage error.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(NimbusError::Storage("secret store unavailable".to_string()));
        }
        Ok(self.values.lock().expect("memory store poisoned").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values
            .lock()
            .expect("memory store poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().expect("memory store poisoned").remove(key);
        Ok(())
    }
}

/// Scripted [`HostEnvironment`] capturing opened URLs.
#[derive(Debug, Default)]
pub struct MockHost {
    opened: Mutex<Vec<String>>,
    decline_open: AtomicBool,
    fail_open: AtomicBool,
}

impl MockHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs the core asked the host to open externally.
    #[must_use]
    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.lock().expect("mock host poisoned").clone()
    }

    /// Make `open_external` report that the host declined (`Ok(false)`).
    pub fn decline_open(&self) {
        self.decline_open.store(true, Ordering::SeqCst);
    }

    /// Make `open_external` fail outright.
    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostEnvironment for MockHost {
    async fn open_external(&self, url: &str) -> Result<bool> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(NimbusError::Internal("browser unavailable".to_string()));
        }
        self.opened.lock().expect("mock host poisoned").push(url.to_string());
        Ok(!self.decline_open.load(Ordering::SeqCst))
    }

    async fn resolve_external_uri(&self, uri: &str) -> Result<String> {
        // The local host exposes URIs unchanged.
        Ok(uri.to_string())
    }
}

/// Recording [`UserInterface`], optionally cancelling progress immediately.
#[derive(Debug, Default)]
pub struct MockUserInterface {
    infos: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    cancel_progress: AtomicBool,
}

impl MockUserInterface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the user cancelling the progress notification as soon as it
    /// appears.
    pub fn cancel_progress_immediately(&self) {
        self.cancel_progress.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().expect("mock ui poisoned").clone()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().expect("mock ui poisoned").clone()
    }
}

impl UserInterface for MockUserInterface {
    fn show_info(&self, message: &str) {
        self.infos.lock().expect("mock ui poisoned").push(message.to_string());
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().expect("mock ui poisoned").push(message.to_string());
    }

    fn begin_progress(&self, _title: &str, signal: CancellationToken) -> ProgressGuard {
        if self.cancel_progress.load(Ordering::SeqCst) {
            signal.cancel();
        }
        ProgressGuard::noop()
    }
}

/// Scripted [`PkceFlow`] resolving immediately with a fixed code.
#[derive(Debug)]
pub struct StaticCodeFlow {
    code: String,
    redirect_uri: String,
    last_nonce: Mutex<Option<String>>,
    disposed: AtomicBool,
}

impl StaticCodeFlow {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            redirect_uri: "http://127.0.0.1:51234".to_string(),
            last_nonce: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Nonce of the most recent trigger.
    #[must_use]
    pub fn last_nonce(&self) -> Option<String> {
        self.last_nonce.lock().expect("static flow poisoned").clone()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PkceFlow for StaticCodeFlow {
    async fn trigger(&self, options: TriggerOptions) -> Result<FlowResult> {
        *self.last_nonce.lock().expect("static flow poisoned") = Some(options.nonce.clone());
        if options.cancel.is_cancelled() {
            return Err(NimbusError::Cancelled("sign-in cancelled".to_string()));
        }
        Ok(FlowResult { code: self.code.clone(), redirect_uri: self.redirect_uri.clone() })
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Recording [`ProviderRegistry`].
#[derive(Debug, Default)]
pub struct MockRegistry {
    registered: Mutex<Vec<String>>,
    unregistered: Mutex<Vec<String>>,
    changes: AtomicUsize,
}

impl MockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().expect("mock registry poisoned").clone()
    }

    #[must_use]
    pub fn unregistered(&self) -> Vec<String> {
        self.unregistered.lock().expect("mock registry poisoned").clone()
    }

    /// Number of sessions-changed notifications observed.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }
}

impl ProviderRegistry for MockRegistry {
    fn register(&self, provider_id: &str) {
        self.registered.lock().expect("mock registry poisoned").push(provider_id.to_string());
    }

    fn unregister(&self, provider_id: &str) {
        self.unregistered
            .lock()
            .expect("mock registry poisoned")
            .push(provider_id.to_string());
    }

    fn sessions_changed(&self, _provider_id: &str) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }
}
