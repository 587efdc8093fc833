//! Host kernels for the 4-bit radix sort passes.

use raycast_calc::WorkGroup;

use super::scan::block_range;
use crate::RADIX;

fn digit(key: u32, shift: u32) -> usize {
    ((key >> shift) as usize) & (RADIX - 1)
}

// args: keys, histogram, n, shift, num_groups
pub(crate) fn radix_histogram(wg: &WorkGroup<'_>) {
    let (keys, histogram) = (wg.buffer(0), wg.buffer(1));
    let (shift, num_groups) = (wg.u32(3), wg.u32(4) as usize);
    if wg.group_id() >= num_groups {
        return;
    }
    let mut counts = [0u32; RADIX];
    for i in block_range(wg, wg.u32(2) as usize) {
        counts[digit(keys.load_u32(i), shift)] += 1;
    }
    for (d, &count) in counts.iter().enumerate() {
        histogram.store_u32(d * num_groups + wg.group_id(), count);
    }
}

// args: keys_in, values_in, offsets, keys_out, values_out, n, shift, num_groups, has_values
pub(crate) fn radix_scatter(wg: &WorkGroup<'_>) {
    let (keys_in, values_in, offsets) = (wg.buffer(0), wg.buffer(1), wg.buffer(2));
    let (keys_out, values_out) = (wg.buffer(3), wg.buffer(4));
    let (shift, num_groups, has_values) = (wg.u32(6), wg.u32(7) as usize, wg.u32(8) != 0);
    if wg.group_id() >= num_groups {
        return;
    }
    // Elements are visited in order, so the running count is the stable rank.
    let mut seen = [0u32; RADIX];
    for i in block_range(wg, wg.u32(5) as usize) {
        let key = keys_in.load_u32(i);
        let d = digit(key, shift);
        let dst = (offsets.load_u32(d * num_groups + wg.group_id()) + seen[d]) as usize;
        seen[d] += 1;
        keys_out.store_u32(dst, key);
        if has_values {
            values_out.store_u32(dst, values_in.load_u32(i));
        }
    }
}
