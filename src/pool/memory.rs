//! Size-classed memory pool for message blocks.
//!
//! Blocks come in five fixed classes (extra-small through extra-large) with
//! configurable byte sizes and per-class retention caps. Acquisition picks the
//! smallest class that satisfies the request and reuses a recycled block when
//! one is available; requests larger than the extra-large class fall back to
//! an unpooled allocation. Returning is driven by [`Block`]'s drop and always
//! targets the class the block was drawn from, never a class re-derived from
//! its length.
//!
//! The pool is shared and lock-free: each class keeps its free blocks in an
//! [`ArrayQueue`] whose fixed capacity doubles as the retention cap, so a
//! return into a full class simply drops the block.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_queue::ArrayQueue;

use crate::core::config::ObjectCacheConfig;
use crate::pool::buffer::MessageBuffer;

/// The five memory size classes, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BlockClass {
    /// Smallest class, sized for bare headers and ping frames.
    ExtraSmall = 0,
    /// Small class.
    Small = 1,
    /// Medium class.
    Medium = 2,
    /// Large class.
    Large = 3,
    /// Largest pooled class; also the staging size for datagram reads.
    ExtraLarge = 4,
}

impl BlockClass {
    /// All classes, smallest first.
    pub const ALL: [BlockClass; 5] = [
        BlockClass::ExtraSmall,
        BlockClass::Small,
        BlockClass::Medium,
        BlockClass::Large,
        BlockClass::ExtraLarge,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

struct SizeClass {
    size: usize,
    freelist: ArrayQueue<Vec<u8>>,
}

pub(crate) struct MemoryPoolInner {
    classes: Vec<SizeClass>,
    /// Blocks currently out of the pool, unpooled fallbacks included.
    live: AtomicUsize,
}

impl MemoryPoolInner {
    /// Return a block's storage to its origin class.
    ///
    /// `class` is the index recorded at acquisition; a full freelist drops
    /// the storage on the floor.
    fn release(&self, class: Option<usize>, storage: Vec<u8>) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        if let Some(index) = class {
            let _ = self.classes[index].freelist.push(storage);
        }
    }
}

/// Size-classed pool of reusable byte blocks.
///
/// Cloning is cheap and shares the underlying pool. Dropping the last pool
/// handle while blocks are still out is safe: those blocks deallocate
/// directly when they are dropped.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<MemoryPoolInner>,
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("live", &self.live_blocks())
            .finish()
    }
}

impl MemoryPool {
    /// Create a pool with the class sizes and caps from `config`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (see
    /// [`ObjectCacheConfig::validate`]).
    pub fn new(config: &ObjectCacheConfig) -> Self {
        config.validate();
        let classes = config
            .block_sizes()
            .into_iter()
            .zip(config.block_caps())
            .map(|(size, cap)| SizeClass {
                size,
                // An ArrayQueue cannot be zero-sized; a cap of zero still
                // gets a slot and the class simply never fills usefully.
                freelist: ArrayQueue::new(cap.max(1)),
            })
            .collect();
        Self {
            inner: Arc::new(MemoryPoolInner {
                classes,
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Acquire a block of at least `min_size` bytes.
    ///
    /// The smallest class whose size covers `min_size` is used, reusing a
    /// recycled block when one is available. Requests above the extra-large
    /// class size yield an unpooled block that deallocates on drop.
    pub fn acquire(&self, min_size: usize) -> Block {
        for (index, class) in self.inner.classes.iter().enumerate() {
            if class.size >= min_size {
                let storage = class
                    .freelist
                    .pop()
                    .unwrap_or_else(|| vec![0; class.size]);
                self.inner.live.fetch_add(1, Ordering::Relaxed);
                return Block {
                    storage: Some(storage),
                    class: Some(index),
                    pool: Arc::downgrade(&self.inner),
                };
            }
        }
        self.inner.live.fetch_add(1, Ordering::Relaxed);
        Block {
            storage: Some(vec![0; min_size]),
            class: None,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Number of blocks currently out of the pool.
    pub fn live_blocks(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Number of recycled blocks currently retained in `class`.
    pub fn depth(&self, class: BlockClass) -> usize {
        self.inner.classes[class.index()].freelist.len()
    }

    /// Byte size of `class`.
    pub fn block_size(&self, class: BlockClass) -> usize {
        self.inner.classes[class.index()].size
    }
}

/// A uniquely owned byte block drawn from a [`MemoryPool`].
///
/// While a `Block` is held its storage is exclusively owned; it can be
/// written freely and then frozen into a shared [`MessageBuffer`] with
/// [`Block::freeze`]. Dropping an unfrozen block returns it to its origin
/// class.
pub struct Block {
    storage: Option<Vec<u8>>,
    class: Option<usize>,
    pool: Weak<MemoryPoolInner>,
}

impl Block {
    /// Capacity of the backing storage.
    pub fn capacity(&self) -> usize {
        self.storage.as_ref().map_or(0, Vec::len)
    }

    /// The full backing storage, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage.as_deref_mut().unwrap_or(&mut [])
    }

    /// The full backing storage.
    pub fn as_slice(&self) -> &[u8] {
        self.storage.as_deref().unwrap_or(&[])
    }

    /// Freeze the block into a shared, reference-counted buffer whose window
    /// covers the first `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the block capacity.
    pub fn freeze(self, len: usize) -> MessageBuffer {
        assert!(len <= self.capacity(), "window exceeds block capacity");
        MessageBuffer::from_block(self, len)
    }

    pub(crate) fn take_parts(mut self) -> (Vec<u8>, Option<usize>, Weak<MemoryPoolInner>) {
        let storage = self.storage.take().unwrap_or_default();
        (storage, self.class, self.pool.clone())
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.capacity())
            .field("class", &self.class)
            .finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        let Some(storage) = self.storage.take() else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.class, storage);
        }
        // Pool gone: the storage deallocates here.
    }
}

pub(crate) fn release_storage(
    pool: &Weak<MemoryPoolInner>,
    class: Option<usize>,
    storage: Vec<u8>,
) {
    if let Some(pool) = pool.upgrade() {
        pool.release(class, storage);
    }
}
