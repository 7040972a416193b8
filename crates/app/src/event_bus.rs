//! Instance-scoped publish/subscribe bus with a single dispatch task.
//!
//! The first subscription spawns a tokio task that drains an unbounded FIFO
//! queue. Removing the last subscription sends it a stop command, and the
//! bus returns to its idle state. A later subscription starts a fresh task
//! with a new generation number. Events still queued for an older
//! generation are discarded, so they are never replayed.
//!
//! The task only holds a weak reference to the registry. Dropping the last
//! clone of the bus closes the queue and ends the task, even when nobody
//! unsubscribed.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use gattkit_domain::error::EventBusError;
use gattkit_domain::event::Event;

/// Name accepted by [`EventBus::unsubscribe`] to remove every subscription.
pub const ALL: &str = "*";

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

enum Command {
    Deliver(Event),
    Stop,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<String, Vec<Callback>>,
    dispatcher: Option<mpsc::UnboundedSender<Command>>,
    generation: u64,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named-event bus owned by one component and shared by cloning.
///
/// Callbacks for an event run one after the other, in subscription order,
/// on the dispatch task. A slow callback delays every later event.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `name`, starting the dispatch task if the
    /// bus is idle.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::EmptyName`] if `name` is empty
    /// - [`EventBusError::NoRuntime`] if the task must be started outside a
    ///   tokio runtime
    pub fn subscribe<F>(&self, name: &str, callback: F) -> Result<(), EventBusError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(EventBusError::EmptyName);
        }
        let mut registry = lock(&self.registry);
        if registry.dispatcher.is_none() {
            let handle = Handle::try_current().map_err(|_| EventBusError::NoRuntime)?;
            let (tx, rx) = mpsc::unbounded_channel();
            registry.generation += 1;
            handle.spawn(dispatch(
                Arc::downgrade(&self.registry),
                registry.generation,
                rx,
            ));
            registry.dispatcher = Some(tx);
            tracing::debug!(generation = registry.generation, "event loop started");
        }
        registry
            .subscribers
            .entry(name.to_owned())
            .or_default()
            .push(Arc::new(callback));
        Ok(())
    }

    /// Enqueue an event. Never blocks. Dropped when the bus is idle.
    pub fn publish(&self, name: &str, data: Value) {
        let registry = lock(&self.registry);
        let Some(dispatcher) = &registry.dispatcher else {
            tracing::trace!(event = name, "no subscribers, event dropped");
            return;
        };
        if dispatcher.send(Command::Deliver(Event::new(name, data))).is_err() {
            tracing::warn!(event = name, "event loop is gone, event dropped");
        }
    }

    /// Remove every callback for `name`, or for all names with [`ALL`].
    ///
    /// Stops the dispatch task once no subscription remains. Must not be
    /// called from a callback for the same event.
    pub fn unsubscribe(&self, name: &str) {
        let mut registry = lock(&self.registry);
        if name == ALL {
            registry.subscribers.clear();
        } else {
            registry.subscribers.remove(name);
        }
        if registry.subscribers.is_empty()
            && let Some(dispatcher) = registry.dispatcher.take()
        {
            // The receiver may already be gone if the runtime shut down.
            let _ = dispatcher.send(Command::Stop);
            tracing::debug!(generation = registry.generation, "event loop stopping");
        }
    }

    /// Whether a dispatch task is currently attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.registry).dispatcher.is_some()
    }

    /// Number of callbacks registered for `name`.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        lock(&self.registry)
            .subscribers
            .get(name)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventBus")
            .field("names", &registry.subscribers.keys().collect::<Vec<_>>())
            .field("running", &registry.dispatcher.is_some())
            .finish()
    }
}

async fn dispatch(
    registry: Weak<Mutex<Registry>>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        let event = match command {
            Command::Deliver(event) => event,
            Command::Stop => break,
        };
        let Some(shared) = registry.upgrade() else {
            break;
        };
        let callbacks = {
            let registry = lock(&shared);
            if registry.generation != generation {
                break;
            }
            registry
                .subscribers
                .get(event.name())
                .cloned()
                .unwrap_or_default()
        };
        drop(shared);
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::error!(event = event.name(), "event callback panicked");
            }
        }
    }
    tracing::debug!(generation, "event loop stopped");
}
