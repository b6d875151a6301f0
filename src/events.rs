//! Synchronous publish/subscribe
//!
//! Listeners run inline on [`EventBus::dispatch`], in subscription order,
//! so reactions such as transcript writes are queued before `dispatch`
//! returns. Async observers follow the same events through
//! [`EventBus::stream`].

use crate::sync::lock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Capacity of the broadcast side channel
const STREAM_CAPACITY: usize = 256;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Event bus with synchronous listeners and a broadcast stream
pub struct EventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
    stream_tx: broadcast::Sender<E>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            stream_tx: self.stream_tx.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        let (stream_tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
            stream_tx,
        }
    }

    /// Register a listener. It stays registered until the returned
    /// subscription (or any clone of it) is cancelled.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            registry.next_id += 1;
            let id = registry.next_id;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let registry = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).listeners.retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    /// Deliver an event to every listener, then to stream subscribers.
    ///
    /// The registry lock is not held while listeners run, so listeners may
    /// subscribe, cancel or dispatch further events.
    pub fn dispatch(&self, event: E) {
        let listeners: Vec<Listener<E>> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&event);
        }

        // No stream subscribers is the normal case
        let _ = self.stream_tx.send(event);
    }

    pub fn stream(&self) -> broadcast::Receiver<E> {
        self.stream_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle removing a listener from its bus
#[derive(Clone)]
pub struct Subscription {
    cancel: Arc<Mutex<Option<CancelFn>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Arc::new(Mutex::new(Some(Box::new(cancel)))),
        }
    }

    /// Remove the listener. Idempotent.
    pub fn cancel(&self) {
        let cancel = lock(&self.cancel).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.cancel).is_none()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Widget events
// ============================================================================

/// Request to open a contact method offered by a bot entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMethodRequest {
    pub contact_method: Value,
    pub entry_id: String,
    pub action_key: String,
}

/// Widget-wide events shared by the platform, the bot and the host
#[derive(Debug, Clone)]
pub enum WidgetEvent {
    /// A `Widget` entry arrived; payload is its content (agent branding)
    WidgetEntry(Value),
    /// The user picked a contact method inside a bot answer
    OpenContactMethod(ContactMethodRequest),
    /// `evaluate` UI action forwarded from a conversation
    Evaluate(Value),
    /// `submit` UI action forwarded from a conversation
    FormSubmitted(Value),
    /// Data client finished a fetch, e.g. `kind == "contact-method"`
    DataClientFetched { kind: String, response: Value },
    /// Unread state of a registered conversation changed
    UnreadMessage(bool),
    /// A registered conversation was disposed
    ConversationEnded { conversation_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_reaches_listeners_in_order() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let _a = bus.subscribe(move |e| first.lock().unwrap().push(("a", *e)));
        let second = Arc::clone(&seen);
        let _b = bus.subscribe(move |e| second.lock().unwrap().push(("b", *e)));

        bus.dispatch(7);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_cancel_removes_listener() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let subscription = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(1);
        subscription.cancel();
        subscription.cancel();
        bus.dispatch(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
        assert!(subscription.is_cancelled());
    }

    #[test]
    fn test_listener_can_dispatch_reentrantly() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let _relay = bus.subscribe(move |e| {
            if *e == 1 {
                inner_bus.dispatch(2);
            }
        });
        let log = Arc::clone(&seen);
        let _log = bus.subscribe(move |e| log.lock().unwrap().push(*e));

        bus.dispatch(1);
        assert_eq!(*seen.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_stream_receives_dispatched_events() {
        let bus: EventBus<String> = EventBus::new();
        let mut rx = bus.stream();
        bus.dispatch("hello".to_string());
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }
}
