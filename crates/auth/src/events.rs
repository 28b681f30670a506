//! Host URI invocation channel.
//!
//! The host editor delivers custom-URI-scheme invocations (the proxied
//! redirect's second hop) through this bus. Subscription is explicit and
//! returns a handle that unsubscribes on drop; nothing is wired ambiently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

/// A custom-URI invocation delivered by the host.
#[derive(Debug, Clone)]
pub struct UriInvocation {
    /// The full URI as received, e.g.
    /// `vscode://nimbus.notebooks/did-authenticate?nonce=...&code=...`.
    pub uri: String,
}

impl UriInvocation {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// First query parameter named `name`, if the URI parses and carries one.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let url = Url::parse(&self.uri).ok()?;
        url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
    }
}

#[derive(Debug, Default)]
struct BusInner {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<UriInvocation>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().expect("uri bus poisoned").remove(&id);
    }
}

/// Fan-out channel for host URI invocations.
///
/// Every live subscription receives every published invocation; filtering is
/// the subscriber's concern (a flow only reacts to its own nonce).
#[derive(Debug, Default)]
pub struct UriEventBus {
    inner: Arc<BusInner>,
}

impl UriEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Dropping the returned subscription
    /// unsubscribes it.
    #[must_use]
    pub fn subscribe(&self) -> UriSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().expect("uri bus poisoned").insert(id, sender);
        UriSubscription { id, bus: Arc::downgrade(&self.inner), receiver }
    }

    /// Deliver an invocation to every live subscriber.
    pub fn publish(&self, invocation: UriInvocation) {
        trace!(uri = %invocation.uri, "publishing URI invocation");
        let subscribers = self.inner.subscribers.lock().expect("uri bus poisoned");
        for sender in subscribers.values() {
            // A failed send means the receiver is mid-drop; its entry goes
            // away with the subscription.
            let _ = sender.send(invocation.clone());
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("uri bus poisoned").len()
    }
}

/// Handle to a [`UriEventBus`] registration; unsubscribes on drop.
#[derive(Debug)]
pub struct UriSubscription {
    id: u64,
    bus: Weak<BusInner>,
    receiver: mpsc::UnboundedReceiver<UriInvocation>,
}

impl UriSubscription {
    /// Next invocation, or `None` when the bus has gone away.
    pub async fn recv(&mut self) -> Option<UriInvocation> {
        self.receiver.recv().await
    }
}

impl Drop for UriSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
