//! Kernel program for the primitive library.

mod compact;
mod scan;
mod sort;

pub(crate) use scan::Elem;

use raycast_calc::{ArgKind, KernelSource, ProgramSource};

use ArgKind::{ReadBuffer as R, RwBuffer as W, Scalar as S};

const SCAN_COMMON: &str = include_str!("../shaders/scan_common.wgsl");
const SCAN_BLOCK: &str = include_str!("../shaders/scan_block.wgsl");
const REDUCE_BLOCK: &str = include_str!("../shaders/reduce_block.wgsl");
const ADD_BLOCK_SUMS: &str = include_str!("../shaders/add_block_sums.wgsl");
const SEG_COMMON: &str = include_str!("../shaders/seg_common.wgsl");
const SEG_SCAN_BLOCK: &str = include_str!("../shaders/seg_scan_block.wgsl");
const SEG_REDUCE_BLOCK: &str = include_str!("../shaders/seg_reduce_block.wgsl");
const SEG_ADD_BLOCK_SUMS: &str = include_str!("../shaders/seg_add_block_sums.wgsl");
const RADIX_HISTOGRAM: &str = include_str!("../shaders/radix_histogram.wgsl");
const RADIX_SCATTER: &str = include_str!("../shaders/radix_scatter.wgsl");
const COMPACT_SCATTER: &str = include_str!("../shaders/compact_scatter.wgsl");
const COPY_INT: &str = include_str!("../shaders/copy_int.wgsl");

/// Kernel name for element type `T`, e.g. `scan_block_int`.
pub(crate) fn typed_name<T: Elem>(base: &str) -> String {
    format!("{base}_{}", T::SUFFIX)
}

fn typed_kernel<T: Elem>(
    base: &str,
    args: &[ArgKind],
    common: &str,
    body: &str,
    host: raycast_calc::HostKernel,
) -> KernelSource {
    let wgsl = format!("{common}\n{body}")
        .replace("ELEM_T", T::WGSL)
        .replace("SUFFIX", T::SUFFIX);
    KernelSource::new(typed_name::<T>(base), args, wgsl, host)
}

fn add_typed<T: Elem>(program: ProgramSource) -> ProgramSource {
    program
        .kernel(typed_kernel::<T>(
            "scan_block",
            &[R, W, S],
            SCAN_COMMON,
            SCAN_BLOCK,
            scan::scan_block::<T>,
        ))
        .kernel(typed_kernel::<T>(
            "reduce_block",
            &[R, W, S],
            SCAN_COMMON,
            REDUCE_BLOCK,
            scan::reduce_block::<T>,
        ))
        .kernel(typed_kernel::<T>(
            "add_block_sums",
            &[R, W, S],
            SCAN_COMMON,
            ADD_BLOCK_SUMS,
            scan::add_block_sums::<T>,
        ))
        .kernel(typed_kernel::<T>(
            "seg_scan_block",
            &[R, R, W, S, S],
            SEG_COMMON,
            SEG_SCAN_BLOCK,
            scan::seg_scan_block::<T>,
        ))
        .kernel(typed_kernel::<T>(
            "seg_reduce_block",
            &[R, R, W, W, S],
            SEG_COMMON,
            SEG_REDUCE_BLOCK,
            scan::seg_reduce_block::<T>,
        ))
        .kernel(typed_kernel::<T>(
            "seg_add_block_sums",
            &[R, R, W, S, S],
            SEG_COMMON,
            SEG_ADD_BLOCK_SUMS,
            scan::seg_add_block_sums::<T>,
        ))
}

/// Every primitive kernel, in both WGSL and host form.
pub(crate) fn program() -> ProgramSource {
    let program = add_typed::<f32>(add_typed::<i32>(ProgramSource::new("primitives")));
    program
        .kernel(KernelSource::new(
            "radix_histogram",
            &[R, W, S, S, S],
            RADIX_HISTOGRAM,
            sort::radix_histogram,
        ))
        .kernel(KernelSource::new(
            "radix_scatter",
            &[R, R, R, W, W, S, S, S, S],
            RADIX_SCATTER,
            sort::radix_scatter,
        ))
        .kernel(KernelSource::new(
            "compact_scatter",
            &[R, R, R, W, S],
            COMPACT_SCATTER,
            compact::compact_scatter,
        ))
        .kernel(KernelSource::new("copy_int", &[R, W, S], COPY_INT, compact::copy_int))
}
