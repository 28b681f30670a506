//! # Nimbus Auth
//!
//! Authentication and session core of the Nimbus editor extension.
//!
//! This crate obtains and maintains an OAuth 2.0 credential for the signed-in
//! user via the authorization-code-with-PKCE flow, persists sessions in the
//! host's encrypted secret storage, and exposes them to downstream API
//! callers. Two callback-delivery mechanisms are unified behind one flow
//! contract:
//!
//! - **Loopback**: an ephemeral HTTP server on `127.0.0.1` receives the
//!   identity provider's redirect directly.
//! - **Proxied redirect**: a fixed remote endpoint redirects into a
//!   host-registered custom URI scheme, delivered through the host's URI
//!   event bus.
//!
//! ```text
//! ┌──────────────────┐
//! │   AuthProvider   │  Host-facing session manager
//! └────────┬─────────┘
//!          │
//!          ├──► PkceFlow            (loopback or proxied variant)
//!          │         │
//!          │         ├──► LoopbackServer   (ephemeral callback listener)
//!          │         └──► CodeManager      (nonce-keyed code broker)
//!          │
//!          ├──► TokenExchanger      (code → tokens, userinfo)
//!          └──► SessionStore        (cached secret-store persistence)
//! ```
//!
//! The [`toggle::AsyncToggle`] primitive manages cancelable, superseding
//! on/off transitions for components driven by both user action and
//! asynchronous host events.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod code_manager;
pub mod config;
pub mod events;
pub mod exchange;
pub mod flow;
pub mod pkce;
pub mod ports;
pub mod provider;
pub mod server;
pub mod store;
pub mod toggle;

// Test support (in-memory host doubles); also used by this crate's own tests.
pub mod testing;

pub use code_manager::{CodeManager, CodeWaiter};
pub use config::AuthSettings;
pub use events::{UriEventBus, UriInvocation, UriSubscription};
pub use exchange::TokenExchanger;
pub use flow::{FlowResult, LoopbackFlow, PkceFlow, ProxiedFlow, TriggerOptions};
pub use pkce::{generate_nonce, PkceChallenge};
pub use ports::{
    HostEnvironment, ProgressGuard, ProviderRegistry, SecretStore, UserInterface,
};
pub use provider::AuthProvider;
pub use server::{LoopbackHandler, LoopbackServer};
pub use store::{AssignedServerStore, KeyringSecretStore, SessionStore};
pub use toggle::{AsyncToggle, ToggleDirection, ToggleTask};
