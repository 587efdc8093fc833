//! Kernel programs for traversal and HLBVH construction.
//!
//! Each traversal program pairs a strategy header defining `trace` with
//! the intersect and occlude entry points. Host versions live next to
//! this module and follow the WGSL step for step.

mod build;
mod geometry;
mod traverse;

use raycast_calc::{ArgKind, BuildOptions, HostKernel, KernelSource, ProgramSource};

use ArgKind::{ReadBuffer as R, RwBuffer as W, Scalar as S};

/// Lanes per workgroup of every kernel in this crate.
pub(crate) const WG_SIZE: usize = 64;
/// Stack entries kept in workgroup memory per short-stack lane.
pub(crate) const SHORT_STACK_SIZE: usize = 16;
/// Stack entries per ray in the short-stack overflow buffer.
pub(crate) const GLOBAL_STACK_SIZE: usize = 32;
/// Private stack entries of the HLBVH walk.
///
/// The walk holds at most one entry per level. Every level of a radix
/// tree extends the common prefix by at least one bit, and 30-bit codes
/// with the primitive index as tie-break give prefixes from 2 to 63 bits.
pub(crate) const HLBVH_STACK_SIZE: usize = 64;
/// Deepest internal-node path of an HLBVH.
pub(crate) const MAX_RADIX_TREE_DEPTH: usize = 62;
const _: () = assert!(HLBVH_STACK_SIZE >= MAX_RADIX_TREE_DEPTH);
/// Boxes merged by one workgroup of `reduce_bounds`.
pub(crate) const REDUCE_BLOCK: usize = 256;

const COMMON: &str = include_str!("../shaders/common.wgsl");
const FACE: &str = include_str!("../shaders/face.wgsl");
const ENTRY_INTERSECT: &str = include_str!("../shaders/entry_intersect.wgsl");
const ENTRY_OCCLUDE: &str = include_str!("../shaders/entry_occlude.wgsl");
const EMPTY: &str = include_str!("../shaders/empty.wgsl");
const SKIP_LINKS: &str = include_str!("../shaders/skip_links.wgsl");
const TWO_LEVEL: &str = include_str!("../shaders/two_level.wgsl");
const SHORT_STACK: &str = include_str!("../shaders/short_stack.wgsl");
const BIT_TRAIL: &str = include_str!("../shaders/bit_trail.wgsl");
const HLBVH_STACK: &str = include_str!("../shaders/hlbvh_stack.wgsl");

const BUILD_COMMON: &str = include_str!("../shaders/build_common.wgsl");
const CALC_PRIM_BOUNDS: &str = include_str!("../shaders/calc_prim_bounds.wgsl");
const REDUCE_BOUNDS: &str = include_str!("../shaders/reduce_bounds.wgsl");
const CALC_MORTON_CODES: &str = include_str!("../shaders/calc_morton_codes.wgsl");
const EMIT_HIERARCHY: &str = include_str!("../shaders/emit_hierarchy.wgsl");
const LINK_NEXT: &str = include_str!("../shaders/link_next.wgsl");
const RESET_FLAGS: &str = include_str!("../shaders/reset_flags.wgsl");
const UPDATE_LEAF_BOUNDS: &str = include_str!("../shaders/update_leaf_bounds.wgsl");
const REFIT_BOUNDS: &str = include_str!("../shaders/refit_bounds.wgsl");

/// Stack sizes shared by the WGSL and host traversal code.
pub(crate) fn build_options() -> BuildOptions {
    BuildOptions {
        constants: vec![
            ("SHORT_STACK_SIZE".into(), format!("{SHORT_STACK_SIZE}u")),
            ("GLOBAL_STACK_SIZE".into(), format!("{GLOBAL_STACK_SIZE}u")),
            ("HLBVH_STACK_SIZE".into(), format!("{HLBVH_STACK_SIZE}u")),
        ],
    }
}

/// Entry point `name` writing its result at buffer argument `output`.
fn entry(
    name: String,
    template: &str,
    inputs: &[ArgKind],
    scalars: &[ArgKind],
    host: HostKernel,
) -> KernelSource {
    let output = inputs.len();
    let wgsl = template
        .replace("OUTPUT_BINDING", &output.to_string())
        .replace("KERNEL_NAME", &name);
    let args: Vec<ArgKind> = inputs
        .iter()
        .copied()
        .chain([W])
        .chain(scalars.iter().copied())
        .collect();
    KernelSource::new(name, &args, wgsl, host)
}

/// Names of the two entry points of a traversal program.
pub(crate) fn entry_names(strategy: &str) -> (String, String) {
    (format!("intersect_{strategy}"), format!("occlude_{strategy}"))
}

fn traversal_program(
    strategy: &str,
    header: &str,
    inputs: &[ArgKind],
    scalars: &[ArgKind],
    intersect: HostKernel,
    occlude: HostKernel,
) -> ProgramSource {
    let (intersect_name, occlude_name) = entry_names(strategy);
    ProgramSource::new(strategy)
        .header(COMMON)
        .header(FACE)
        .header(header)
        .kernel(entry(intersect_name, ENTRY_INTERSECT, inputs, scalars, intersect))
        .kernel(entry(occlude_name, ENTRY_OCCLUDE, inputs, scalars, occlude))
}

/// Entry point names of the empty-world program.
pub(crate) const CLEAR_INTERSECTIONS: &str = "clear_intersections";
pub(crate) const CLEAR_OCCLUSIONS: &str = "clear_occlusions";

/// Miss for every active ray.
pub(crate) fn empty_program() -> ProgramSource {
    ProgramSource::new("empty")
        .header(COMMON)
        .header(EMPTY)
        .kernel(entry(
            CLEAR_INTERSECTIONS.into(),
            ENTRY_INTERSECT,
            &[R, R],
            &[],
            traverse::clear_intersections,
        ))
        .kernel(entry(
            CLEAR_OCCLUSIONS.into(),
            ENTRY_OCCLUDE,
            &[R, R],
            &[],
            traverse::clear_occlusions,
        ))
}

pub(crate) fn skip_links_program() -> ProgramSource {
    traversal_program(
        "skip_links",
        SKIP_LINKS,
        &[R, R, R, R, R],
        &[],
        traverse::intersect_skip_links,
        traverse::occlude_skip_links,
    )
}

pub(crate) fn two_level_program() -> ProgramSource {
    traversal_program(
        "two_level",
        TWO_LEVEL,
        &[R, R, R, R, R, R],
        &[],
        traverse::intersect_two_level,
        traverse::occlude_two_level,
    )
}

pub(crate) fn short_stack_program() -> ProgramSource {
    traversal_program(
        "short_stack",
        SHORT_STACK,
        &[R, R, R, R, R, W],
        &[],
        traverse::intersect_short_stack,
        traverse::occlude_short_stack,
    )
}

pub(crate) fn bit_trail_program() -> ProgramSource {
    traversal_program(
        "bit_trail",
        BIT_TRAIL,
        &[R, R, R, R, R, R],
        &[S],
        traverse::intersect_bit_trail,
        traverse::occlude_bit_trail,
    )
}

pub(crate) fn hlbvh_program() -> ProgramSource {
    traversal_program(
        "hlbvh",
        HLBVH_STACK,
        &[R, R, R, R, R, R],
        &[],
        traverse::intersect_hlbvh,
        traverse::occlude_hlbvh,
    )
}

/// HLBVH construction and refit kernels.
pub(crate) fn build_program() -> ProgramSource {
    ProgramSource::new("hlbvh_build")
        .header(COMMON)
        .header(BUILD_COMMON)
        .kernel(KernelSource::new(
            "calc_prim_bounds",
            &[R, R, W, S],
            CALC_PRIM_BOUNDS,
            build::calc_prim_bounds,
        ))
        .kernel(KernelSource::new(
            "reduce_bounds",
            &[R, W, S],
            REDUCE_BOUNDS,
            build::reduce_bounds,
        ))
        .kernel(KernelSource::new(
            "calc_morton_codes",
            &[R, R, W, W, S],
            CALC_MORTON_CODES,
            build::calc_morton_codes,
        ))
        .kernel(KernelSource::new(
            "emit_hierarchy",
            &[R, R, R, W, W, S],
            EMIT_HIERARCHY,
            build::emit_hierarchy,
        ))
        .kernel(KernelSource::new("link_next", &[W, S], LINK_NEXT, build::link_next))
        .kernel(KernelSource::new("reset_flags", &[W, S], RESET_FLAGS, build::reset_flags))
        .kernel(KernelSource::new(
            "update_leaf_bounds",
            &[R, R, W, S],
            UPDATE_LEAF_BOUNDS,
            build::update_leaf_bounds,
        ))
        .kernel(KernelSource::new(
            "refit_bounds",
            &[R, W, W, S],
            REFIT_BOUNDS,
            build::refit_bounds,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_programs() -> Vec<ProgramSource> {
        vec![
            empty_program(),
            skip_links_program(),
            two_level_program(),
            short_stack_program(),
            bit_trail_program(),
            hlbvh_program(),
            build_program(),
        ]
    }

    #[test]
    fn test_entry_templates_are_instantiated() {
        let program = short_stack_program();
        let occlude = program
            .kernels
            .iter()
            .find(|k| k.name == "occlude_short_stack")
            .unwrap();
        assert!(occlude.wgsl.contains("@binding(6)"));
        assert!(occlude.wgsl.contains("fn occlude_short_stack("));
        assert!(!occlude.wgsl.contains("KERNEL_NAME"));
        assert_eq!(occlude.args.len(), 7);
        assert_eq!(occlude.args[6], W);
    }

    #[test]
    fn test_bit_trail_takes_hash_width() {
        let program = bit_trail_program();
        for kernel in &program.kernels {
            assert_eq!(kernel.args.last(), Some(&S));
            assert_eq!(kernel.args.iter().filter(|a| a.is_buffer()).count(), 7);
        }
    }

    #[test]
    fn test_buffer_bindings_within_limit() {
        for program in all_programs() {
            for kernel in &program.kernels {
                let buffers = kernel.args.iter().filter(|a| a.is_buffer()).count();
                assert!(buffers <= 8, "{} binds {buffers} buffers", kernel.name);
            }
        }
    }

    #[test]
    fn test_constants_emitted_before_headers() {
        let program = hlbvh_program();
        let src = program.module_source(&program.kernels[0], &build_options());
        let constant = src.find("const HLBVH_STACK_SIZE = 64u;").unwrap();
        let usage = src.find("array<i32, HLBVH_STACK_SIZE>").unwrap();
        assert!(constant < usage);
    }
}
