//! Host kernels for stream compaction and copy.

use raycast_calc::WorkGroup;

// args: predicate, address, input, output, n
pub(crate) fn compact_scatter(wg: &WorkGroup<'_>) {
    let (predicate, address) = (wg.buffer(0), wg.buffer(1));
    let (input, output) = (wg.buffer(2), wg.buffer(3));
    let n = wg.u32(4) as usize;
    for i in wg.global_ids().filter(|&i| i < n) {
        if predicate.load_i32(i) != 0 {
            output.store_i32(address.load_i32(i) as usize, input.load_i32(i));
        }
    }
}

// args: input, output, n
pub(crate) fn copy_int(wg: &WorkGroup<'_>) {
    let (input, output) = (wg.buffer(0), wg.buffer(1));
    let n = wg.u32(2) as usize;
    for i in wg.global_ids().filter(|&i| i < n) {
        output.store_i32(i, input.load_i32(i));
    }
}
