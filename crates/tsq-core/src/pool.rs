//! Bounded free-list object pool, keyed by size class (§5, §9 "Object
//! pooling"). Pools are optional: if absent, `acquire` just allocates.
//! Contents are immutable once published; callers must not retain a
//! reference after `release`, so `release` takes the buffer back by value.

use std::sync::Mutex;

/// A pool of reusable `Vec<f64>` buffers, one free-list per size class
/// (rounded up to the next power of two), bounded in how many buffers it
/// retains per class so a burst of large queries can't pin unbounded memory.
pub struct BufferPool {
    max_per_class: usize,
    classes: Vec<Mutex<Vec<Vec<f64>>>>,
}

impl BufferPool {
    /// `num_classes` buckets, each holding power-of-two-sized buffers from
    /// `2^0` up to `2^(num_classes-1)`.
    pub fn new(num_classes: usize, max_per_class: usize) -> Self {
        let mut classes = Vec::with_capacity(num_classes);
        for _ in 0..num_classes {
            classes.push(Mutex::new(Vec::new()));
        }
        Self {
            max_per_class,
            classes,
        }
    }

    fn class_for(&self, min_capacity: usize) -> usize {
        let mut class = 0usize;
        let mut cap = 1usize;
        while cap < min_capacity && class + 1 < self.classes.len() {
            cap *= 2;
            class += 1;
        }
        class
    }

    /// Acquire a buffer with at least `min_capacity` capacity, reused from
    /// the pool if one is free, freshly allocated otherwise.
    pub fn acquire(&self, min_capacity: usize) -> Vec<f64> {
        let class = self.class_for(min_capacity);
        let mut free_list = self.classes[class].lock().unwrap();
        free_list
            .pop()
            .map(|mut buf| {
                buf.clear();
                buf
            })
            .unwrap_or_else(|| Vec::with_capacity(min_capacity))
    }

    /// Return a buffer to the pool. Dropped silently once the class's
    /// free-list is at capacity.
    pub fn release(&self, buf: Vec<f64>) {
        let class = self.class_for(buf.capacity().max(1));
        let mut free_list = self.classes[class].lock().unwrap();
        if free_list.len() < self.max_per_class {
            free_list.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(20, 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_roundtrip_reuses_capacity() {
        let pool = BufferPool::default();
        let buf = pool.acquire(100);
        assert!(buf.capacity() >= 100);
        pool.release(buf);
        let buf2 = pool.acquire(100);
        assert!(buf2.capacity() >= 100);
    }

    #[test]
    fn absent_pool_semantics_via_fresh_allocation() {
        // "Pools are optional: if the pool is absent, each acquire returns
        // a fresh object" — callers that don't hold a BufferPool at all
        // just allocate directly; nothing here to assert beyond compiling.
        let buf: Vec<f64> = Vec::with_capacity(8);
        assert_eq!(buf.len(), 0);
    }
}
