//! Stream compaction and copy.

use raycast_calc::{Buffer, Event, Result};

use crate::{check_capacity, check_len, PrimitiveLibrary, WG_SIZE};

impl PrimitiveLibrary {
    /// Move every `input[i]` with `predicate[i] == 1` to the front of
    /// `output`, preserving order, and return how many were kept.
    ///
    /// Predicates must be 0 or 1. Blocks until the new size is known.
    pub fn compact_int(
        &mut self,
        queue: u32,
        predicate: &Buffer,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<usize> {
        check_len(predicate, n, "compaction predicate")?;
        check_len(input, n, "compaction input")?;
        check_len(output, n, "compaction output")?;
        if n == 0 {
            return Ok(0);
        }
        check_capacity(n)?;

        let address = self.acquire(n)?;
        self.scan_level::<i32>(queue, predicate, &address, n)?;
        self.dispatch("compact_scatter", queue, n, |f| {
            f.set_buffer(0, predicate)?.set_buffer(1, &address)?;
            f.set_buffer(2, input)?.set_buffer(3, output)?.set_u32(4, n as u32)?;
            Ok(())
        })?;

        let last_address = self.device.read_vec::<i32>(&address, queue, n - 1, 1)?;
        let last_predicate = self.device.read_vec::<i32>(predicate, queue, n - 1, 1)?;
        self.cache.reclaim(address, n);
        let new_size = last_address[0] + last_predicate[0];
        tracing::trace!(n, new_size, "compacted");
        Ok(new_size.max(0) as usize)
    }

    /// Copy `n` integers from `input` to `output`.
    pub fn copy_int(
        &mut self,
        queue: u32,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        check_len(input, n, "copy input")?;
        check_len(output, n, "copy output")?;
        if n == 0 {
            return Ok(Event::complete());
        }
        self.dispatch("copy_int", queue, n.next_multiple_of(WG_SIZE), |f| {
            f.set_buffer(0, input)?.set_buffer(1, output)?.set_u32(2, n as u32)?;
            Ok(())
        })
    }
}
