#![warn(missing_docs)]

//! Parallel primitives for raycast: exclusive scan, segmented scan,
//! radix sort, stream compaction and copy.
//!
//! Every operation is a sequence of kernel dispatches on one queue of a
//! [`Device`]. Work is split into blocks of [`BLOCK_SIZE`] elements
//! (64 lanes × 4 elements); inputs larger than one block are handled by
//! recursing on per-block partial results, up to four levels deep.

mod cache;
mod compact;
mod kernels;
mod scan;
mod sort;

use std::sync::Arc;

use raycast_calc::{BuildOptions, Buffer, CalcError, Device, Event, Executable, Function, Result};

pub use cache::BufferCache;

/// Lanes per workgroup.
pub const WG_SIZE: usize = 64;

/// Elements handled by each lane.
pub const ELEMS_PER_LANE: usize = 4;

/// Elements handled by one workgroup.
pub const BLOCK_SIZE: usize = WG_SIZE * ELEMS_PER_LANE;

/// Maximum recursion depth of the multi-level scans.
pub const MAX_LEVELS: u32 = 4;

/// Digit values per radix sort pass.
pub const RADIX: usize = 16;

/// Bits per radix sort pass.
pub const RADIX_BITS: u32 = 4;

/// Largest supported element count.
pub const fn max_elements() -> usize {
    BLOCK_SIZE.pow(MAX_LEVELS)
}

/// Primitive kernels compiled for one device.
pub struct PrimitiveLibrary {
    device: Arc<dyn Device>,
    executable: Executable,
    cache: BufferCache,
}

impl PrimitiveLibrary {
    /// Compile the primitive kernels for `device`.
    #[tracing::instrument(skip_all, fields(device = %device.info().name))]
    pub fn new(device: Arc<dyn Device>) -> Result<Self> {
        let executable = device.compile_executable(&kernels::program(), &BuildOptions::default())?;
        Ok(Self {
            device,
            executable,
            cache: BufferCache::new(),
        })
    }

    /// Device the kernels were compiled for.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Temporary buffer cache.
    pub fn cache_mut(&mut self) -> &mut BufferCache {
        &mut self.cache
    }

    /// Bind arguments with `bind` and run kernel `name` over `global` lanes.
    fn dispatch(
        &self,
        name: &str,
        queue: u32,
        global: usize,
        bind: impl FnOnce(&mut Function) -> Result<()>,
    ) -> Result<Event> {
        let mut function = self.executable.create_function(name)?;
        bind(&mut function)?;
        self.device.execute(&function, queue, global, WG_SIZE, &[])
    }

    fn acquire(&mut self, count: usize) -> Result<Buffer> {
        self.cache.acquire(&*self.device, count)
    }
}

/// Fail unless `buffer` holds at least `n` 32-bit elements.
pub(crate) fn check_len(buffer: &Buffer, n: usize, what: &str) -> Result<()> {
    if buffer.len_of::<u32>() < n {
        return Err(CalcError::Logic(format!(
            "{what} holds {} elements, {n} required",
            buffer.len_of::<u32>()
        )));
    }
    Ok(())
}

pub(crate) fn check_capacity(n: usize) -> Result<()> {
    if n > max_elements() {
        return Err(CalcError::CapacityExceeded {
            what: "primitive element count",
            requested: n,
            limit: max_elements(),
        });
    }
    Ok(())
}

/// Number of workgroups covering `n` elements.
pub(crate) fn num_blocks(n: usize) -> usize {
    n.div_ceil(BLOCK_SIZE)
}
