//! Generic on/off lifecycle primitive with abort-and-supersede semantics.
//!
//! Toggling is driven both by direct user action and by asynchronous host
//! events (the set of assigned servers changing, for instance), so calls
//! arrive in arbitrary order while a transition is still running. The engine
//! guarantees at most one in-flight transition: a repeat request in the same
//! direction coalesces into the running one, and an opposite request cancels
//! the running transition's signal and starts immediately without waiting for
//! the old teardown to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nimbus_domain::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Direction of a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleDirection {
    On,
    Off,
}

impl std::fmt::Display for ToggleDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Capability implemented by the component being toggled.
///
/// Both hooks must treat the signal as cooperative cancellation — observe it,
/// abandon remaining work, and tear down their own resources. A cancelled
/// hook should return promptly; the superseding transition is already
/// running.
#[async_trait]
pub trait ToggleTask: Send + Sync + 'static {
    async fn turn_on(&self, signal: CancellationToken) -> Result<()>;

    async fn turn_off(&self, signal: CancellationToken) -> Result<()>;

    /// Name used in transition logs.
    fn name(&self) -> &str {
        "toggle"
    }
}

struct Transition {
    direction: ToggleDirection,
    token: CancellationToken,
    generation: u64,
}

/// Lifecycle controller guaranteeing at most one in-flight transition.
pub struct AsyncToggle<T: ToggleTask> {
    task: Arc<T>,
    active: Arc<Mutex<Option<Transition>>>,
    generations: AtomicU64,
}

impl<T: ToggleTask> AsyncToggle<T> {
    #[must_use]
    pub fn new(task: Arc<T>) -> Self {
        Self { task, active: Arc::new(Mutex::new(None)), generations: AtomicU64::new(0) }
    }

    /// Request a transition to "on". Fire-and-forget: failures are handled
    /// inside the detached transition task.
    pub fn on(&self) {
        self.request(ToggleDirection::On);
    }

    /// Request a transition to "off". Fire-and-forget, like [`Self::on`].
    pub fn off(&self) {
        self.request(ToggleDirection::Off);
    }

    /// Direction of the in-flight transition, if any.
    #[must_use]
    pub fn current_direction(&self) -> Option<ToggleDirection> {
        self.active
            .lock()
            .expect("toggle state poisoned")
            .as_ref()
            .map(|transition| transition.direction)
    }

    fn request(&self, direction: ToggleDirection) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut active = self.active.lock().expect("toggle state poisoned");
            if let Some(current) = active.as_ref() {
                if current.direction == direction {
                    trace!(
                        task = self.task.name(),
                        direction = %direction,
                        "transition already in flight; coalescing"
                    );
                    return;
                }
                // Supersede: abort the opposite transition and start
                // immediately, without waiting for its cleanup.
                debug!(
                    task = self.task.name(),
                    direction = %direction,
                    "superseding in-flight transition"
                );
                current.token.cancel();
            }
            *active = Some(Transition { direction, token: token.clone(), generation });
        }

        let task = Arc::clone(&self.task);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let result = match direction {
                ToggleDirection::On => task.turn_on(token.clone()).await,
                ToggleDirection::Off => task.turn_off(token.clone()).await,
            };

            // Only the transition that owns the slot may clear it; a
            // superseded transition exits silently.
            let still_active = {
                let mut active = active.lock().expect("toggle state poisoned");
                match active.as_ref() {
                    Some(current) if current.generation == generation => {
                        *active = None;
                        true
                    }
                    _ => false,
                }
            };

            match result {
                Ok(()) => {
                    if still_active {
                        debug!(
                            task = task.name(),
                            direction = %direction,
                            "transition completed successfully"
                        );
                    }
                }
                Err(err) if token.is_cancelled() || err.is_cancellation() => {
                    trace!(
                        task = task.name(),
                        direction = %direction,
                        "transition aborted"
                    );
                }
                Err(err) => {
                    // Detached task: this log is the final word on the
                    // failure.
                    error!(
                        task = task.name(),
                        direction = %direction,
                        error = %err,
                        "transition failed"
                    );
                }
            }
        });
    }
}
