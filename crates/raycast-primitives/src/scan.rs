//! Multi-level exclusive scans.

use raycast_calc::{Buffer, Event, Result};

use crate::kernels::{typed_name, Elem};
use crate::{check_capacity, check_len, num_blocks, PrimitiveLibrary, BLOCK_SIZE, WG_SIZE};

impl PrimitiveLibrary {
    /// `output[i] = input[0] + .. + input[i - 1]` over `n` integers.
    pub fn scan_exclusive_int(
        &mut self,
        queue: u32,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        self.scan_exclusive::<i32>(queue, input, output, n)
    }

    /// Float exclusive scan. Rounding depends on the block decomposition.
    pub fn scan_exclusive_float(
        &mut self,
        queue: u32,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        self.scan_exclusive::<f32>(queue, input, output, n)
    }

    /// Exclusive scan restarting at every element whose flag is non-zero.
    ///
    /// The output at a flagged element is zero.
    pub fn segmented_scan_exclusive_int(
        &mut self,
        queue: u32,
        input: &Buffer,
        flags: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        self.segmented_scan_exclusive::<i32>(queue, input, flags, output, n)
    }

    /// Float variant of [`segmented_scan_exclusive_int`](Self::segmented_scan_exclusive_int).
    pub fn segmented_scan_exclusive_float(
        &mut self,
        queue: u32,
        input: &Buffer,
        flags: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        self.segmented_scan_exclusive::<f32>(queue, input, flags, output, n)
    }

    fn scan_exclusive<T: Elem>(
        &mut self,
        queue: u32,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        check_len(input, n, "scan input")?;
        check_len(output, n, "scan output")?;
        if n == 0 {
            return Ok(Event::complete());
        }
        check_capacity(n)?;
        tracing::trace!(n, levels = levels(n), "exclusive scan");
        self.scan_level::<T>(queue, input, output, n)
    }

    /// One level: scan every block, then add the scanned block totals.
    pub(crate) fn scan_level<T: Elem>(
        &mut self,
        queue: u32,
        input: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        let blocks = num_blocks(n);
        let scanned = self.dispatch(&typed_name::<T>("scan_block"), queue, blocks * WG_SIZE, |f| {
            f.set_buffer(0, input)?.set_buffer(1, output)?.set_u32(2, n as u32)?;
            Ok(())
        })?;
        if blocks == 1 {
            return Ok(scanned);
        }

        let part_sums = self.acquire(blocks)?;
        let part_scanned = self.acquire(blocks)?;
        self.dispatch(&typed_name::<T>("reduce_block"), queue, blocks * WG_SIZE, |f| {
            f.set_buffer(0, input)?.set_buffer(1, &part_sums)?.set_u32(2, n as u32)?;
            Ok(())
        })?;
        self.scan_level::<T>(queue, &part_sums, &part_scanned, blocks)?;
        let done = self.dispatch(&typed_name::<T>("add_block_sums"), queue, blocks * WG_SIZE, |f| {
            f.set_buffer(0, &part_scanned)?.set_buffer(1, output)?.set_u32(2, n as u32)?;
            Ok(())
        })?;
        self.cache.reclaim(part_sums, blocks);
        self.cache.reclaim(part_scanned, blocks);
        Ok(done)
    }

    fn segmented_scan_exclusive<T: Elem>(
        &mut self,
        queue: u32,
        input: &Buffer,
        flags: &Buffer,
        output: &Buffer,
        n: usize,
    ) -> Result<Event> {
        check_len(input, n, "segmented scan input")?;
        check_len(flags, n, "segmented scan flags")?;
        check_len(output, n, "segmented scan output")?;
        if n == 0 {
            return Ok(Event::complete());
        }
        check_capacity(n)?;
        self.seg_scan_level::<T>(queue, input, flags, output, n, true)
    }

    /// Lower levels scan block totals under the pair operator, where a
    /// flagged block still receives the carry of the segment it closes;
    /// only the top level zeroes flagged elements.
    fn seg_scan_level<T: Elem>(
        &mut self,
        queue: u32,
        input: &Buffer,
        flags: &Buffer,
        output: &Buffer,
        n: usize,
        zero_heads: bool,
    ) -> Result<Event> {
        let blocks = num_blocks(n);
        let lanes = blocks * WG_SIZE;
        let scanned = self.dispatch(&typed_name::<T>("seg_scan_block"), queue, lanes, |f| {
            f.set_buffer(0, input)?.set_buffer(1, flags)?.set_buffer(2, output)?;
            f.set_u32(3, n as u32)?.set_u32(4, zero_heads as u32)?;
            Ok(())
        })?;
        if blocks == 1 {
            return Ok(scanned);
        }

        let part_sums = self.acquire(blocks)?;
        let part_flags = self.acquire(blocks)?;
        let part_scanned = self.acquire(blocks)?;
        self.dispatch(&typed_name::<T>("seg_reduce_block"), queue, lanes, |f| {
            f.set_buffer(0, input)?.set_buffer(1, flags)?;
            f.set_buffer(2, &part_sums)?.set_buffer(3, &part_flags)?.set_u32(4, n as u32)?;
            Ok(())
        })?;
        self.seg_scan_level::<T>(queue, &part_sums, &part_flags, &part_scanned, blocks, false)?;
        let done = self.dispatch(&typed_name::<T>("seg_add_block_sums"), queue, lanes, |f| {
            f.set_buffer(0, &part_scanned)?.set_buffer(1, flags)?.set_buffer(2, output)?;
            f.set_u32(3, n as u32)?.set_u32(4, zero_heads as u32)?;
            Ok(())
        })?;
        for buffer in [part_sums, part_flags, part_scanned] {
            self.cache.reclaim(buffer, blocks);
        }
        Ok(done)
    }
}

/// Number of block levels needed for `n` elements.
pub(crate) fn levels(n: usize) -> u32 {
    let mut levels = 1;
    let mut size = n;
    while size > BLOCK_SIZE {
        size = size.div_ceil(BLOCK_SIZE);
        levels += 1;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        assert_eq!(levels(1), 1);
        assert_eq!(levels(256), 1);
        assert_eq!(levels(257), 2);
        assert_eq!(levels(65536), 2);
        assert_eq!(levels(65537), 3);
        assert_eq!(levels(256 * 256 * 256), 3);
        assert_eq!(levels(256 * 256 * 256 + 1), 4);
    }
}
