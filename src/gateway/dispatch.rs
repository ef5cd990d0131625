//! Event dispatch: fan-out from the gateway read loop to registered
//! listeners.
//!
//! Every registration owns an unbounded channel feeding a dedicated
//! worker task. The read loop never awaits a handler: `dispatch` only
//! clones the event into each queue. One listener therefore sees events
//! in arrival order, while distinct listeners run concurrently and a
//! slow or failing one cannot stall the others or the read loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A decoded application event as delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: Value,
    pub sequence: Option<u64>,
}

type HandlerFn = dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

struct Registration {
    id: String,
    tx: mpsc::UnboundedSender<Event>,
}

/// Identifies one registration so it can be removed later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    event: String,
    id: String,
}

impl ListenerHandle {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<HashMap<String, Vec<Registration>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event name under a generated id.
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> ListenerHandle
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_with_id(event, Uuid::new_v4().to_string(), handler)
    }

    /// Registers a handler under a caller-chosen id. Re-using an id does
    /// not replace the earlier registration; ids are labels, not keys.
    pub fn on_with_id<F, Fut>(
        &self,
        event: &str,
        id: impl Into<String>,
        handler: F,
    ) -> ListenerHandle
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let boxed: Box<HandlerFn> = Box::new(move |event| handler(event).boxed());
        tokio::spawn(run_listener(id.clone(), event.to_string(), boxed, rx));

        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Registration {
                id: id.clone(),
                tx,
            });

        tracing::info!(event = %event, listener_id = %id, "Listener registered");
        ListenerHandle {
            event: event.to_string(),
            id,
        }
    }

    /// Removes a registration. Events already queued for it still run;
    /// the next dispatch no longer sees it.
    pub fn remove(&self, handle: &ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let Some(registrations) = listeners.get_mut(&handle.event) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != handle.id);
        let removed = registrations.len() < before;
        if registrations.is_empty() {
            listeners.remove(&handle.event);
        }
        if removed {
            tracing::info!(event = %handle.event, listener_id = %handle.id, "Listener removed");
        }
        removed
    }

    /// Queues the event for every listener registered under its name.
    /// Returns how many listeners received it. Never blocks.
    pub fn dispatch(&self, event: Event) -> usize {
        let senders: Vec<(String, mpsc::UnboundedSender<Event>)> = {
            let listeners = self.listeners.read();
            match listeners.get(&event.name) {
                Some(registrations) => registrations
                    .iter()
                    .map(|r| (r.id.clone(), r.tx.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead: Vec<String> = Vec::new();
        for (id, tx) in senders {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut listeners = self.listeners.write();
            if let Some(registrations) = listeners.get_mut(&event.name) {
                registrations.retain(|r| !dead.contains(&r.id));
            }
        }

        tracing::trace!(event = %event.name, listeners = delivered, "Event dispatched");
        delivered
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Worker loop for a single registration. Failures and panics are logged
/// with the listener's identity and never escape.
async fn run_listener(
    id: String,
    event_name: String,
    handler: Box<HandlerFn>,
    mut rx: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = rx.recv().await {
        match AssertUnwindSafe(handler(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::error!(
                    event = %event_name,
                    listener_id = %id,
                    error = %error,
                    "Listener returned an error"
                );
            }
            Err(_) => {
                tracing::error!(
                    event = %event_name,
                    listener_id = %id,
                    "Listener panicked"
                );
            }
        }
    }
}
