//! User-visible events and their subscriber registries.
//!
//! Subscribers are plain callbacks held in a locked list. A panicking
//! subscriber is caught and logged so that delivery to the remaining
//! subscribers, and more importantly the recycling of the event's pooled
//! buffer, always happens.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::config::SendMode;
use crate::message::Message;
use crate::pool::{Pooled, Reusable};

/// Payload of the *message-received* event.
///
/// The record and the message inside it are pooled; both are valid for the
/// duration of the handler call. A handler that needs the message afterwards
/// clones it, which extends the underlying buffer's lifetime.
pub struct MessageReceivedEvent {
    message: Option<Pooled<Message>>,
    send_mode: SendMode,
}

impl Default for MessageReceivedEvent {
    fn default() -> Self {
        Self {
            message: None,
            send_mode: SendMode::Reliable,
        }
    }
}

impl MessageReceivedEvent {
    pub(crate) fn fill(&mut self, message: Pooled<Message>, send_mode: SendMode) {
        self.message = Some(message);
        self.send_mode = send_mode;
    }

    /// The received message.
    pub fn message(&self) -> &Message {
        self.message
            .as_deref()
            .expect("event carries a message while handlers run")
    }

    /// The channel the message arrived on.
    pub fn send_mode(&self) -> SendMode {
        self.send_mode
    }
}

impl Reusable for MessageReceivedEvent {
    fn reset(&mut self) {
        self.message = None;
    }
}

impl std::fmt::Debug for MessageReceivedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReceivedEvent")
            .field("send_mode", &self.send_mode)
            .finish()
    }
}

/// Payload of the *disconnected* event.
#[derive(Debug)]
pub struct DisconnectedEvent {
    /// `true` when this side initiated the teardown.
    pub locally_initiated: bool,
    /// The socket error that ended the session, when one did.
    pub error: Option<io::Error>,
}

/// Identifies a subscription for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A list of event subscribers sharing one lock.
pub(crate) struct Handlers<E> {
    subscribers: Mutex<Vec<(u64, Arc<dyn Fn(&E) + Send + Sync>)>>,
    next_id: AtomicU64,
}

impl<E> Handlers<E> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .push((id, Arc::new(handler)));
        HandlerId(id)
    }

    /// Remove a subscription. Removing an id twice is a no-op.
    pub(crate) fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id.0);
        subscribers.len() != before
    }

    /// Invoke every subscriber with `event`, isolating panics per subscriber.
    pub(crate) fn emit(&self, event: &E) {
        let snapshot: Vec<Arc<dyn Fn(&E) + Send + Sync>> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!("event handler panicked; continuing delivery");
            }
        }
    }
}
