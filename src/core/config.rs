//! Object-cache settings shared by every pool the client builds.

/// Selects which channel conveys a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendMode {
    /// Ordered, loss-free delivery over the stream channel.
    Reliable,
    /// Best-effort, low-latency delivery over the datagram channel. Messages
    /// may be lost, duplicated or reordered.
    Unreliable,
}

/// Capacity settings for the client's object and memory caches.
///
/// All caps bound how many recycled instances a pool retains; acquisition
/// never fails when a pool is empty, it falls back to a fresh allocation.
/// The memory block sizes define the five size classes of the memory pool
/// and must be strictly ascending.
///
/// A handful of options are accepted for configuration compatibility but have
/// no pool behind them in this implementation, where the corresponding
/// object's lifetime is handled by ownership or by the runtime:
/// `max_message_buffers`, `max_socket_async_event_args`,
/// `max_action_dispatcher_tasks` and `max_auto_recycling_arrays`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCacheConfig {
    /// Cap on pooled message-writer cursors.
    pub max_writers: usize,
    /// Cap on pooled message-reader cursors.
    pub max_readers: usize,
    /// Cap on pooled message objects.
    pub max_messages: usize,
    /// Cap on pooled message-buffer wrappers (accepted, inert).
    pub max_message_buffers: usize,
    /// Cap on pooled per-read operation records (accepted, inert).
    pub max_socket_async_event_args: usize,
    /// Cap on deferred-task records (accepted, inert).
    pub max_action_dispatcher_tasks: usize,
    /// Cap on deferred-release array wrappers (accepted, inert).
    pub max_auto_recycling_arrays: usize,
    /// Byte size of the extra-small memory class.
    pub extra_small_memory_block_size: usize,
    /// Byte size of the small memory class.
    pub small_memory_block_size: usize,
    /// Byte size of the medium memory class.
    pub medium_memory_block_size: usize,
    /// Byte size of the large memory class.
    pub large_memory_block_size: usize,
    /// Byte size of the extra-large memory class.
    pub extra_large_memory_block_size: usize,
    /// Retention cap of the extra-small memory class.
    pub max_extra_small_memory_blocks: usize,
    /// Retention cap of the small memory class.
    pub max_small_memory_blocks: usize,
    /// Retention cap of the medium memory class.
    pub max_medium_memory_blocks: usize,
    /// Retention cap of the large memory class.
    pub max_large_memory_blocks: usize,
    /// Retention cap of the extra-large memory class.
    pub max_extra_large_memory_blocks: usize,
    /// Cap on pooled message-received event records.
    pub max_message_received_event_args: usize,
}

impl Default for ObjectCacheConfig {
    fn default() -> Self {
        Self {
            max_writers: 2,
            max_readers: 2,
            max_messages: 4,
            max_message_buffers: 4,
            max_socket_async_event_args: 32,
            max_action_dispatcher_tasks: 16,
            max_auto_recycling_arrays: 4,
            extra_small_memory_block_size: 16,
            small_memory_block_size: 64,
            medium_memory_block_size: 256,
            large_memory_block_size: 1024,
            extra_large_memory_block_size: 4096,
            max_extra_small_memory_blocks: 2,
            max_small_memory_blocks: 2,
            max_medium_memory_blocks: 2,
            max_large_memory_blocks: 2,
            max_extra_large_memory_blocks: 2,
            max_message_received_event_args: 4,
        }
    }
}

impl ObjectCacheConfig {
    /// Memory class sizes, smallest first.
    pub fn block_sizes(&self) -> [usize; 5] {
        [
            self.extra_small_memory_block_size,
            self.small_memory_block_size,
            self.medium_memory_block_size,
            self.large_memory_block_size,
            self.extra_large_memory_block_size,
        ]
    }

    /// Memory class retention caps, smallest class first.
    pub fn block_caps(&self) -> [usize; 5] {
        [
            self.max_extra_small_memory_blocks,
            self.max_small_memory_blocks,
            self.max_medium_memory_blocks,
            self.max_large_memory_blocks,
            self.max_extra_large_memory_blocks,
        ]
    }

    /// Validates the configuration, panicking on invalid values.
    ///
    /// # Panics
    ///
    /// - a memory class size is zero
    /// - the class sizes are not strictly ascending
    /// - an object pool cap is zero
    pub fn validate(&self) {
        let sizes = self.block_sizes();
        assert!(sizes[0] > 0, "memory class sizes must be non-zero");
        assert!(
            sizes.windows(2).all(|pair| pair[0] < pair[1]),
            "memory class sizes must be strictly ascending"
        );
        for cap in [
            self.max_writers,
            self.max_readers,
            self.max_messages,
            self.max_message_received_event_args,
        ] {
            assert!(cap > 0, "object pool caps must be non-zero");
        }
    }
}
