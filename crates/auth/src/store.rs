//! Cache-coherent persistence over the host's encrypted secret store.
//!
//! Sessions and assigned-server records each live as a JSON array under a
//! single secret-store key. Every mutation is a read-modify-write of the full
//! list; the in-memory cache is invalidated (cleared, not merged) by any
//! successful write and lazily repopulated on the next read. This is safe
//! under the extension's single event loop only — two editor windows writing
//! concurrently can still overwrite each other, a known accepted limitation.

use std::sync::Arc;

use async_trait::async_trait;
use keyring::Entry;
use nimbus_domain::{AssignedServer, AuthSession, NimbusError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::ports::SecretStore;

/// Secret-store key holding the persisted session list.
pub const SESSION_STORAGE_KEY: &str = "nimbus.sessions";

/// Secret-store key holding the assigned compute-server list.
pub const SERVER_STORAGE_KEY: &str = "nimbus.assignedServers";

/// A JSON array under one secret-store key, with a cleared-on-write cache.
struct SecretListStore<T> {
    store: Arc<dyn SecretStore>,
    key: &'static str,
    cache: Mutex<Option<Vec<T>>>,
}

impl<T> SecretListStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send,
{
    fn new(store: Arc<dyn SecretStore>, key: &'static str) -> Self {
        Self { store, key, cache: Mutex::new(None) }
    }

    /// Read the full list, repopulating the cache when it was invalidated.
    ///
    /// A missing value is an empty list; a value that does not parse as JSON
    /// is a distinct `Storage` error, never silently treated as signed out.
    async fn all(&self) -> Result<Vec<T>> {
        let mut cache = self.cache.lock().await;
        if let Some(list) = cache.as_ref() {
            return Ok(list.clone());
        }

        let list = match self.store.get(self.key).await? {
            None => Vec::new(),
            Some(raw) => serde_json::from_str(&raw).map_err(|err| {
                error!(key = self.key, error = %err, "persisted list is corrupted");
                NimbusError::Storage(format!(
                    "stored value under {} is not valid JSON: {err}",
                    self.key
                ))
            })?,
        };

        *cache = Some(list.clone());
        Ok(list)
    }

    /// Persist the full list and invalidate the cache.
    async fn replace(&self, list: &[T]) -> Result<()> {
        let raw = serde_json::to_string(list)
            .map_err(|err| NimbusError::Storage(format!("failed to serialize list: {err}")))?;
        self.store.set(self.key, &raw).await?;
        *self.cache.lock().await = None;
        debug!(key = self.key, count = list.len(), "persisted list written");
        Ok(())
    }
}

/// Persisted authentication sessions.
pub struct SessionStore {
    inner: SecretListStore<AuthSession>,
}

impl SessionStore {
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { inner: SecretListStore::new(store, SESSION_STORAGE_KEY) }
    }

    /// All persisted sessions.
    pub async fn all(&self) -> Result<Vec<AuthSession>> {
        self.inner.all().await
    }

    /// Sessions covering every scope in `scopes`; all sessions when `None`.
    pub async fn matching(&self, scopes: Option<&[String]>) -> Result<Vec<AuthSession>> {
        let sessions = self.inner.all().await?;
        Ok(match scopes {
            None => sessions,
            Some(scopes) => {
                sessions.into_iter().filter(|session| session.covers_scopes(scopes)).collect()
            }
        })
    }

    /// Append a freshly created session.
    pub async fn append(&self, session: AuthSession) -> Result<()> {
        let mut sessions = self.inner.all().await?;
        sessions.push(session);
        self.inner.replace(&sessions).await
    }

    /// Remove the session with `id`. Returns whether anything was removed;
    /// when the id is absent the storage is left unwritten.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let sessions = self.inner.all().await?;
        if !sessions.iter().any(|session| session.id == id) {
            return Ok(false);
        }

        let remaining: Vec<_> =
            sessions.into_iter().filter(|session| session.id != id).collect();
        self.inner.replace(&remaining).await?;
        Ok(true)
    }
}

/// Persisted assigned compute-server records, keyed by id.
pub struct AssignedServerStore {
    inner: SecretListStore<AssignedServer>,
}

impl AssignedServerStore {
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { inner: SecretListStore::new(store, SERVER_STORAGE_KEY) }
    }

    /// All assigned servers.
    pub async fn all(&self) -> Result<Vec<AssignedServer>> {
        self.inner.all().await
    }

    /// The server with `id`, if assigned.
    pub async fn get(&self, id: &str) -> Result<Option<AssignedServer>> {
        Ok(self.inner.all().await?.into_iter().find(|server| server.id == id))
    }

    /// Insert or replace a server record by id.
    pub async fn upsert(&self, server: AssignedServer) -> Result<()> {
        let mut servers = self.inner.all().await?;
        match servers.iter_mut().find(|existing| existing.id == server.id) {
            Some(existing) => *existing = server,
            None => servers.push(server),
        }
        self.inner.replace(&servers).await
    }

    /// Remove the server with `id`. No storage write when the id is absent.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let servers = self.inner.all().await?;
        if !servers.iter().any(|server| server.id == id) {
            return Ok(false);
        }

        let remaining: Vec<_> = servers.into_iter().filter(|server| server.id != id).collect();
        self.inner.replace(&remaining).await?;
        Ok(true)
    }
}

/// Production [`SecretStore`] backed by the platform keychain.
///
/// macOS Keychain, Windows Credential Manager, or the Linux Secret Service,
/// via the `keyring` crate.
pub struct KeyringSecretStore {
    service_name: String,
}

impl KeyringSecretStore {
    /// Create a store scoped to a keychain service name
    /// (e.g. "Nimbus.auth").
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(|err| {
            NimbusError::Storage(format!("failed to open keychain entry for {key}: {err}"))
        })
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => {
                Err(NimbusError::Storage(format!("failed to read secret {key}: {err}")))
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?.set_password(value).map_err(|err| {
            NimbusError::Storage(format!("failed to store secret {key}: {err}"))
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => {
                Err(NimbusError::Storage(format!("failed to delete secret {key}: {err}")))
            }
        }
    }
}
