//! Host device memory.
//!
//! Storage is an array of 32-bit atomic words so that every workgroup of a
//! dispatch can read and write the same buffer from different threads without
//! data races. Plain loads and stores are relaxed; the compare-and-swap used by
//! the BVH refit pass is acquire/release so that the bounds written before a
//! flag transition are visible to the thread that observes it.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;

use crate::error::{CalcError, Result};

/// Word-addressed host memory block.
pub struct HostBuffer {
    words: Box<[AtomicU32]>,
    size: usize,
}

impl HostBuffer {
    /// Allocate `size` bytes, optionally initialised from `init`.
    pub(crate) fn new(size: usize, init: Option<&[u8]>) -> Result<Self> {
        let num_words = size.div_ceil(4).max(1);
        let mut words: Vec<AtomicU32> = Vec::new();
        words
            .try_reserve_exact(num_words)
            .map_err(|_| CalcError::OutOfMemory { requested: size })?;
        words.extend((0..num_words).map(|_| AtomicU32::new(0)));

        let buffer = Self {
            words: words.into_boxed_slice(),
            size,
        };
        if let Some(data) = init {
            buffer.write_bytes(0, &data[..data.len().min(size)]);
        }
        Ok(buffer)
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of 32-bit words backing the buffer.
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Load the word at `index`.
    #[inline]
    pub fn load_u32(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// Store `value` at word `index`.
    #[inline]
    pub fn store_u32(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    /// Load the word at `index` as a signed integer.
    #[inline]
    pub fn load_i32(&self, index: usize) -> i32 {
        self.load_u32(index) as i32
    }

    /// Store a signed integer at word `index`.
    #[inline]
    pub fn store_i32(&self, index: usize, value: i32) {
        self.store_u32(index, value as u32);
    }

    /// Load the word at `index` as a float.
    #[inline]
    pub fn load_f32(&self, index: usize) -> f32 {
        f32::from_bits(self.load_u32(index))
    }

    /// Store a float at word `index`.
    #[inline]
    pub fn store_f32(&self, index: usize, value: f32) {
        self.store_u32(index, value.to_bits());
    }

    /// Load element `index` of an array of `T`.
    ///
    /// `T` must be a whole number of words.
    #[inline]
    pub fn load<T: Pod>(&self, index: usize) -> T {
        let words_per_elem = std::mem::size_of::<T>() / 4;
        debug_assert_eq!(std::mem::size_of::<T>() % 4, 0);
        let base = index * words_per_elem;
        let mut value = T::zeroed();
        for (i, chunk) in bytemuck::bytes_of_mut(&mut value)
            .chunks_exact_mut(4)
            .enumerate()
        {
            chunk.copy_from_slice(&self.load_u32(base + i).to_ne_bytes());
        }
        value
    }

    /// Store element `index` of an array of `T`.
    #[inline]
    pub fn store<T: Pod>(&self, index: usize, value: &T) {
        let words_per_elem = std::mem::size_of::<T>() / 4;
        debug_assert_eq!(std::mem::size_of::<T>() % 4, 0);
        let base = index * words_per_elem;
        for (i, chunk) in bytemuck::bytes_of(value).chunks_exact(4).enumerate() {
            let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.store_u32(base + i, word);
        }
    }

    /// Atomic compare-and-swap on word `index`, returning the previous value.
    ///
    /// Same contract as `atomic_cmpxchg`: the store happens only when the
    /// previous value equals `current`.
    #[inline]
    pub fn compare_exchange_i32(&self, index: usize, current: i32, new: i32) -> i32 {
        match self.words[index].compare_exchange(
            current as u32,
            new as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(prev) | Err(prev) => prev as i32,
        }
    }

    /// Atomic add on word `index`, returning the previous value.
    #[inline]
    pub fn fetch_add_i32(&self, index: usize, value: i32) -> i32 {
        self.words[index].fetch_add(value as u32, Ordering::AcqRel) as i32
    }

    /// Copy `dst.len()` bytes starting at byte `offset` into `dst`.
    pub(crate) fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        debug_assert_eq!(offset % 4, 0);
        let base = offset / 4;
        let full = dst.len() / 4;
        let mut chunks = dst.chunks_exact_mut(4);
        for (i, chunk) in (&mut chunks).enumerate() {
            chunk.copy_from_slice(&self.load_u32(base + i).to_ne_bytes());
        }
        let tail = chunks.into_remainder();
        if !tail.is_empty() {
            let last = self.load_u32(base + full).to_ne_bytes();
            let n = tail.len();
            tail.copy_from_slice(&last[..n]);
        }
    }

    /// Copy `src` into the buffer starting at byte `offset`.
    pub(crate) fn write_bytes(&self, offset: usize, src: &[u8]) {
        debug_assert_eq!(offset % 4, 0);
        let base = offset / 4;
        let mut chunks = src.chunks_exact(4);
        for (i, chunk) in (&mut chunks).enumerate() {
            self.store_u32(
                base + i,
                u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            );
        }
        let tail = chunks.remainder();
        if !tail.is_empty() {
            let index = base + src.len() / 4;
            let mut word = self.load_u32(index).to_ne_bytes();
            word[..tail.len()].copy_from_slice(tail);
            self.store_u32(index, u32::from_ne_bytes(word));
        }
    }

    /// Copy `size` bytes from `src` at `src_offset` to this buffer at `dst_offset`.
    pub(crate) fn copy_from(
        &self,
        src: &HostBuffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) {
        let mut scratch = vec![0u8; size];
        src.read_bytes(src_offset, &mut scratch);
        self.write_bytes(dst_offset, &scratch);
    }
}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer").field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Pair {
        a: i32,
        b: f32,
    }

    #[test]
    fn test_pod_roundtrip() {
        let buffer = HostBuffer::new(64, None).unwrap();
        buffer.store(3, &Pair { a: -7, b: 2.5 });
        assert_eq!(buffer.load::<Pair>(3), Pair { a: -7, b: 2.5 });
        assert_eq!(buffer.load_i32(6), -7);
        assert_eq!(buffer.load_f32(7), 2.5);
    }

    #[test]
    fn test_unaligned_tail() {
        let buffer = HostBuffer::new(7, Some(&[1, 2, 3, 4, 5, 6, 7])).unwrap();
        let mut out = [0u8; 7];
        buffer.read_bytes(0, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7]);

        buffer.write_bytes(4, &[9, 9]);
        buffer.read_bytes(0, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 9, 9, 7]);

        let mut tail = [0u8; 3];
        buffer.read_bytes(4, &mut tail);
        assert_eq!(tail, [9, 9, 7]);
    }

    #[test]
    fn test_compare_exchange_returns_previous() {
        let buffer = HostBuffer::new(4, None).unwrap();
        assert_eq!(buffer.compare_exchange_i32(0, 0, 1), 0);
        assert_eq!(buffer.compare_exchange_i32(0, 0, 1), 1);
        assert_eq!(buffer.load_i32(0), 1);
    }
}
