//! Generic capped recycler for small hot-path objects.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use crossbeam_queue::ArrayQueue;

/// Implemented by objects that can be recycled through an [`ObjectPool`].
pub trait Reusable: Send {
    /// Restore the object to its pristine state before it re-enters the pool.
    fn reset(&mut self);
}

struct ObjectPoolInner<T> {
    slots: ArrayQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

/// A bounded pool of reusable `T` instances.
///
/// `acquire` pops a recycled instance or builds a fresh one with the factory;
/// the returned [`Pooled`] guard resets and recycles the instance on drop.
/// When the pool already holds `capacity` instances, a returning object is
/// dropped instead.
pub struct ObjectPool<T: Reusable> {
    inner: Arc<ObjectPoolInner<T>>,
}

impl<T: Reusable> ObjectPool<T> {
    /// Create a pool retaining at most `capacity` recycled instances.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        assert!(capacity > 0, "object pool capacity must be non-zero");
        Self {
            inner: Arc::new(ObjectPoolInner {
                slots: ArrayQueue::new(capacity),
                factory: Box::new(factory),
            }),
        }
    }

    /// Take an instance out of the pool, building one if the pool is empty.
    pub fn acquire(&self) -> Pooled<T> {
        let value = self
            .inner
            .slots
            .pop()
            .unwrap_or_else(|| (self.inner.factory)());
        Pooled {
            value: Some(value),
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Number of recycled instances currently retained.
    pub fn available(&self) -> usize {
        self.inner.slots.len()
    }
}

impl<T: Reusable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Guard over a pooled instance; recycles it on drop.
///
/// Dereferences to `T`. If the owning pool has gone away or is full when the
/// guard drops, the instance is dropped with it.
pub struct Pooled<T: Reusable> {
    value: Option<T>,
    pool: Weak<ObjectPoolInner<T>>,
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("pooled value taken")
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value taken")
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        let Some(mut value) = self.value.take() else {
            return;
        };
        value.reset();
        if let Some(pool) = self.pool.upgrade() {
            let _ = pool.slots.push(value);
        }
    }
}

impl<T: Reusable + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}
