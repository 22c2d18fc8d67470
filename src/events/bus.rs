//! Typed publish/subscribe bus
//!
//! Listeners register per [`EventKind`] and run in registration order. A
//! failing or panicking listener is logged and skipped; it never stops the
//! listeners after it and never reaches the subscriber.

use super::{EventKind, LocalEvent};
use crate::error::HandlerError;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Callback registered on the bus
#[async_trait]
pub trait Listener: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn on_event(&self, event: &LocalEvent) -> Result<(), HandlerError>;
}

/// Subscription registry keyed by event kind
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<Arc<dyn Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `kind`
    pub fn on(&mut self, kind: EventKind, listener: Arc<dyn Listener>) {
        debug!(?kind, listener = listener.name(), "Registering listener");
        self.listeners.entry(kind).or_default().push(listener);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's kind, in order.
    ///
    /// Returns the number of listeners invoked.
    pub async fn emit(&self, event: &LocalEvent) -> usize {
        let kind = event.kind();
        let Some(listeners) = self.listeners.get(&kind) else {
            return 0;
        };

        for listener in listeners {
            match AssertUnwindSafe(listener.on_event(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(?kind, listener = listener.name(), error = %e, "Listener failed");
                }
                Err(_) => {
                    error!(?kind, listener = listener.name(), "Listener panicked");
                }
            }
        }

        listeners.len()
    }
}
