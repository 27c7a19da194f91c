//! The client's object caches, wired from [`ObjectCacheConfig`].

use crate::core::config::ObjectCacheConfig;
use crate::message::{Message, MessageReader, MessageWriter};
use crate::pool::{MemoryPool, ObjectPool, Pooled};

use super::events::MessageReceivedEvent;

/// Every pool the client owns, created once at client construction.
///
/// The memory pool backs all buffer traffic; the object pools recycle the
/// small helper objects of the hot path. Pools whose cap is configured but
/// whose object has no recycling mechanism in this implementation are listed
/// in [`ObjectCacheConfig`].
pub struct CachePools {
    memory: MemoryPool,
    messages: ObjectPool<Message>,
    writers: ObjectPool<MessageWriter>,
    readers: ObjectPool<MessageReader>,
    message_events: ObjectPool<MessageReceivedEvent>,
}

impl CachePools {
    /// Build all pools from `config`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (see
    /// [`ObjectCacheConfig::validate`]).
    pub fn new(config: &ObjectCacheConfig) -> Self {
        config.validate();
        Self {
            memory: MemoryPool::new(config),
            messages: ObjectPool::new(config.max_messages, Message::default),
            writers: ObjectPool::new(config.max_writers, MessageWriter::default),
            readers: ObjectPool::new(config.max_readers, MessageReader::default),
            message_events: ObjectPool::new(
                config.max_message_received_event_args,
                MessageReceivedEvent::default,
            ),
        }
    }

    /// The size-classed memory pool.
    pub fn memory(&self) -> &MemoryPool {
        &self.memory
    }

    /// Acquire a recycled writer cursor.
    pub fn writer(&self) -> Pooled<MessageWriter> {
        self.writers.acquire()
    }

    /// Acquire a recycled reader cursor bound to `message`'s payload.
    pub fn reader(&self, message: &Message) -> Pooled<MessageReader> {
        let mut reader = self.readers.acquire();
        reader.bind(message);
        reader
    }

    pub(crate) fn message(&self) -> Pooled<Message> {
        self.messages.acquire()
    }

    pub(crate) fn message_event(&self) -> Pooled<MessageReceivedEvent> {
        self.message_events.acquire()
    }
}

impl std::fmt::Debug for CachePools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePools")
            .field("memory", &self.memory)
            .finish()
    }
}
