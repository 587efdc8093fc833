//! Host kernels for plain and segmented exclusive scan.

use raycast_calc::{HostBuffer, WorkGroup};

use crate::BLOCK_SIZE;

/// Element type of a scan.
pub(crate) trait Elem: Copy + Send + Sync + 'static {
    /// WGSL scalar type.
    const WGSL: &'static str;
    /// Kernel name suffix.
    const SUFFIX: &'static str;
    const ZERO: Self;

    fn load(buffer: &HostBuffer, index: usize) -> Self;
    fn store(buffer: &HostBuffer, index: usize, value: Self);
    fn add(self, other: Self) -> Self;
}

impl Elem for i32 {
    const WGSL: &'static str = "i32";
    const SUFFIX: &'static str = "int";
    const ZERO: Self = 0;

    fn load(buffer: &HostBuffer, index: usize) -> Self {
        buffer.load_i32(index)
    }

    fn store(buffer: &HostBuffer, index: usize, value: Self) {
        buffer.store_i32(index, value);
    }

    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Elem for f32 {
    const WGSL: &'static str = "f32";
    const SUFFIX: &'static str = "float";
    const ZERO: Self = 0.0;

    fn load(buffer: &HostBuffer, index: usize) -> Self {
        buffer.load_f32(index)
    }

    fn store(buffer: &HostBuffer, index: usize, value: Self) {
        buffer.store_f32(index, value);
    }

    fn add(self, other: Self) -> Self {
        self + other
    }
}

/// Element range of the block handled by `wg`, clipped to `n`.
pub(crate) fn block_range(wg: &WorkGroup<'_>, n: usize) -> std::ops::Range<usize> {
    let start = (wg.group_id() * BLOCK_SIZE).min(n);
    start..(start + BLOCK_SIZE).min(n)
}

/// `(a, fa) + (b, fb) = (fb ? b : a + b, fa | fb)`
fn seg_combine<T: Elem>(a: (T, bool), b: (T, bool)) -> (T, bool) {
    (if b.1 { b.0 } else { a.0.add(b.0) }, a.1 | b.1)
}

// args: input, output, n
pub(crate) fn scan_block<T: Elem>(wg: &WorkGroup<'_>) {
    let (input, output) = (wg.buffer(0), wg.buffer(1));
    let mut sum = T::ZERO;
    for i in block_range(wg, wg.u32(2) as usize) {
        let x = T::load(input, i);
        T::store(output, i, sum);
        sum = sum.add(x);
    }
}

// args: input, part_sums, n
pub(crate) fn reduce_block<T: Elem>(wg: &WorkGroup<'_>) {
    let (input, part_sums) = (wg.buffer(0), wg.buffer(1));
    let range = block_range(wg, wg.u32(2) as usize);
    if range.is_empty() {
        return;
    }
    let sum = range.fold(T::ZERO, |acc, i| acc.add(T::load(input, i)));
    T::store(part_sums, wg.group_id(), sum);
}

// args: part_sums, output, n
pub(crate) fn add_block_sums<T: Elem>(wg: &WorkGroup<'_>) {
    let (part_sums, output) = (wg.buffer(0), wg.buffer(1));
    let range = block_range(wg, wg.u32(2) as usize);
    if range.is_empty() {
        return;
    }
    let carry = T::load(part_sums, wg.group_id());
    for i in range {
        T::store(output, i, T::load(output, i).add(carry));
    }
}

// args: input, flags, output, n, zero_heads
pub(crate) fn seg_scan_block<T: Elem>(wg: &WorkGroup<'_>) {
    let (input, flags, output) = (wg.buffer(0), wg.buffer(1), wg.buffer(2));
    let zero_heads = wg.u32(4) != 0;
    let mut acc = (T::ZERO, false);
    for i in block_range(wg, wg.u32(3) as usize) {
        let head = flags.load_i32(i) != 0;
        let x = T::load(input, i);
        T::store(output, i, if zero_heads && head { T::ZERO } else { acc.0 });
        acc = seg_combine(acc, (x, head));
    }
}

// args: input, flags, part_sums, part_flags, n
pub(crate) fn seg_reduce_block<T: Elem>(wg: &WorkGroup<'_>) {
    let (input, flags) = (wg.buffer(0), wg.buffer(1));
    let range = block_range(wg, wg.u32(4) as usize);
    if range.is_empty() {
        return;
    }
    let total = range.fold((T::ZERO, false), |acc, i| {
        seg_combine(acc, (T::load(input, i), flags.load_i32(i) != 0))
    });
    T::store(wg.buffer(2), wg.group_id(), total.0);
    wg.buffer(3).store_i32(wg.group_id(), total.1 as i32);
}

// args: part_sums, flags, output, n, zero_heads
pub(crate) fn seg_add_block_sums<T: Elem>(wg: &WorkGroup<'_>) {
    let (part_sums, flags, output) = (wg.buffer(0), wg.buffer(1), wg.buffer(2));
    let zero_heads = wg.u32(4) != 0;
    let range = block_range(wg, wg.u32(3) as usize);
    if range.is_empty() {
        return;
    }
    let carry = T::load(part_sums, wg.group_id());
    let first_head = range
        .clone()
        .find(|&i| flags.load_i32(i) != 0)
        .unwrap_or(range.end);
    for i in range.start..=first_head.min(range.end - 1) {
        if zero_heads && flags.load_i32(i) != 0 {
            continue;
        }
        T::store(output, i, T::load(output, i).add(carry));
    }
}
