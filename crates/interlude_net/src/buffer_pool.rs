use bytes::BytesMut;
use parking_lot::Mutex;

/// A sized slab pool for read/write buffers.
///
/// Buffers are grouped into fixed size classes; `acquire` hands out the
/// smallest class that fits, `release` clears the buffer and returns it to
/// its class. Cleared means cleared: a released buffer carries no bytes
/// from its previous life, only capacity.
pub struct BufferPool {
    classes: Box<[SizeClass]>,
    max_free_per_class: usize,
}

struct SizeClass {
    size: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    /// `sizes` are the capacity classes, ascending.
    pub fn new(sizes: &[usize], max_free_per_class: usize) -> Self {
        debug_assert!(sizes.windows(2).all(|w| w[0] < w[1]));

        let classes = sizes
            .iter()
            .map(|&size| SizeClass {
                size,
                free: Mutex::new(Vec::new()),
            })
            .collect();

        Self {
            classes,
            max_free_per_class,
        }
    }

    /// The classes used by the packet paths: one read-buffer class and two
    /// frame classes.
    pub fn for_packets() -> Self {
        Self::new(&[256, 4096, 65536], 64)
    }

    /// Returns a cleared buffer with at least `min` bytes of capacity.
    pub fn acquire(&self, min: usize) -> BytesMut {
        let Some(class) = self.classes.iter().find(|c| c.size >= min) else {
            // Oversized requests bypass the pool.
            return BytesMut::with_capacity(min);
        };

        if let Some(buf) = class.free.lock().pop() {
            return buf;
        }
        BytesMut::with_capacity(class.size)
    }

    /// Clears `buf` and returns it to the pool. Buffers that match no
    /// class, or classes already at capacity, are simply dropped.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();

        let fit = self
            .classes
            .iter()
            .rev()
            .find(|c| c.size <= buf.capacity());

        if let Some(class) = fit {
            let mut free = class.free.lock();
            if free.len() < self.max_free_per_class {
                free.push(buf);
            }
        }
    }

    /// Free buffers currently pooled, across all classes.
    pub fn free_count(&self) -> usize {
        self.classes.iter().map(|c| c.free.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_picks_the_smallest_fitting_class() {
        let pool = BufferPool::new(&[64, 1024], 8);

        assert!(pool.acquire(10).capacity() >= 64);
        assert!(pool.acquire(65).capacity() >= 1024);
        // Oversized requests still succeed.
        assert!(pool.acquire(4000).capacity() >= 4000);
    }

    #[test]
    fn released_buffers_come_back_cleared() {
        let pool = BufferPool::new(&[64], 8);

        let mut buf = pool.acquire(32);
        buf.extend_from_slice(b"secret session bytes");
        pool.release(buf);
        assert_eq!(pool.free_count(), 1);

        let reused = pool.acquire(32);
        assert!(reused.is_empty());
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn overfull_class_drops_buffers() {
        let pool = BufferPool::new(&[64], 2);

        for _ in 0..5 {
            pool.release(BytesMut::with_capacity(64));
        }
        assert_eq!(pool.free_count(), 2);
    }
}
