//! Temporary buffer free-list.

use std::collections::HashMap;

use raycast_calc::{Buffer, BufferType, Device, Result};

/// Free-list of 32-bit word buffers keyed by element count.
///
/// A buffer handed back with [`reclaim`](Self::reclaim) may be returned by
/// the next [`acquire`](Self::acquire) of the same size, so it must not be
/// in flight on a queue other than the one the next user submits to.
#[derive(Debug, Default)]
pub struct BufferCache {
    free: HashMap<usize, Vec<Buffer>>,
}

impl BufferCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer of `count` words, reused when one is available.
    pub fn acquire(&mut self, device: &dyn Device, count: usize) -> Result<Buffer> {
        if let Some(buffer) = self.free.get_mut(&count).and_then(Vec::pop) {
            return Ok(buffer);
        }
        tracing::trace!(count, "allocating temporary buffer");
        device.create_buffer(count.max(1) * 4, BufferType::ReadWrite, None)
    }

    /// Return a buffer obtained from [`acquire`](Self::acquire).
    pub fn reclaim(&mut self, buffer: Buffer, count: usize) {
        self.free.entry(count).or_default().push(buffer);
    }

    /// Release every cached buffer.
    pub fn clear(&mut self) {
        self.free.clear();
    }

    /// Number of cached buffers.
    pub fn len(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Whether the cache holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raycast_calc::{Calc, CalcConfig};

    #[test]
    fn test_reuse_by_count() {
        let calc = Calc::new(CalcConfig {
            enable_gpu: false,
            ..Default::default()
        });
        let device = calc.create_device(0).unwrap();
        let mut cache = BufferCache::new();

        let a = cache.acquire(&*device, 100).unwrap();
        assert_eq!(a.size(), 400);
        cache.reclaim(a, 100);
        assert_eq!(cache.len(), 1);

        let b = cache.acquire(&*device, 100).unwrap();
        assert!(cache.is_empty());
        let c = cache.acquire(&*device, 50).unwrap();
        assert!(!b.same_memory(&c));
        cache.reclaim(b, 100);
        cache.reclaim(c, 50);
        cache.clear();
        assert!(cache.is_empty());
    }
}
