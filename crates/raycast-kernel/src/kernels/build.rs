//! Host HLBVH construction kernels.

use raycast_calc::{HostBuffer, WorkGroup};

use crate::hlbvh::HlbvhNode;
use crate::math::GpuBbox;
use crate::scene::Face;

fn empty_box() -> GpuBbox {
    GpuBbox {
        pmin: [f32::MAX, f32::MAX, f32::MAX, 0.0],
        pmax: [f32::MIN, f32::MIN, f32::MIN, 0.0],
    }
}

fn union(a: &GpuBbox, b: &GpuBbox) -> GpuBbox {
    GpuBbox {
        pmin: std::array::from_fn(|k| a.pmin[k].min(b.pmin[k])),
        pmax: std::array::from_fn(|k| a.pmax[k].max(b.pmax[k])),
    }
}

// args: faces, vertices, prim_bounds, n
pub(crate) fn calc_prim_bounds(wg: &WorkGroup<'_>) {
    let (faces, vertices, out) = (wg.buffer(0), wg.buffer(1), wg.buffer(2));
    let n = wg.u32(3) as usize;
    for i in wg.global_ids().filter(|&i| i < n) {
        let face: Face = faces.load(i);
        let bounds = face.idx.iter().fold(empty_box(), |b, &v| {
            let p: [f32; 4] = vertices.load(v as usize);
            let p = [p[0], p[1], p[2], 0.0];
            union(&b, &GpuBbox { pmin: p, pmax: p })
        });
        out.store(i, &bounds);
    }
}

// args: input, output, n
pub(crate) fn reduce_bounds(wg: &WorkGroup<'_>) {
    let (input, output) = (wg.buffer(0), wg.buffer(1));
    let n = wg.u32(2) as usize;
    let group = wg.group_id();
    let start = group * super::REDUCE_BLOCK;
    let end = (start + super::REDUCE_BLOCK).min(n);
    let acc = (start..end).fold(empty_box(), |acc, i| union(&acc, &input.load(i)));
    output.store(group, &acc);
}

/// Spread the low 10 bits of `v` so two zero bits follow each.
pub(crate) fn expand_bits(v: u32) -> u32 {
    let mut x = v;
    x = x.wrapping_mul(0x0001_0001) & 0xFF00_00FF;
    x = x.wrapping_mul(0x0000_0101) & 0x0F00_F00F;
    x = x.wrapping_mul(0x0000_0011) & 0xC30C_30C3;
    x = x.wrapping_mul(0x0000_0005) & 0x4924_9249;
    x
}

fn quantize(c: f32) -> u32 {
    (c * 1024.0).clamp(0.0, 1023.0) as u32
}

/// 30-bit Morton code of a point given in unit-cube coordinates.
pub(crate) fn morton_code(c: [f32; 3]) -> u32 {
    expand_bits(quantize(c[0])) * 4 + expand_bits(quantize(c[1])) * 2 + expand_bits(quantize(c[2]))
}

// args: prim_bounds, scene_bounds, codes, indices, n
pub(crate) fn calc_morton_codes(wg: &WorkGroup<'_>) {
    let (prim_bounds, scene_bounds) = (wg.buffer(0), wg.buffer(1));
    let (codes, indices) = (wg.buffer(2), wg.buffer(3));
    let n = wg.u32(4) as usize;
    let scene: GpuBbox = scene_bounds.load(0);
    for i in wg.global_ids().filter(|&i| i < n) {
        let b: GpuBbox = prim_bounds.load(i);
        let c = std::array::from_fn(|k| {
            let center = 0.5 * (b.pmin[k] + b.pmax[k]);
            let extent = scene.pmax[k] - scene.pmin[k];
            let extent = if extent <= 0.0 { 1.0 } else { extent };
            (center - scene.pmin[k]) / extent
        });
        codes.store_u32(i, morton_code(c));
        indices.store_i32(i, i as i32);
    }
}

/// Common prefix length of sorted codes `i` and `j`, extended by the
/// index bits on equal codes; -1 outside `[0, n)`.
fn delta(codes: &HostBuffer, n: i32, i: i32, j: i32) -> i32 {
    if j < 0 || j >= n {
        return -1;
    }
    let (a, b) = (codes.load_u32(i as usize), codes.load_u32(j as usize));
    if a == b {
        32 + ((i ^ j) as u32).leading_zeros() as i32
    } else {
        (a ^ b).leading_zeros() as i32
    }
}

/// Children of internal node `i` of a Karras radix tree over `n` codes.
pub(crate) fn karras_children(codes: &HostBuffer, n: i32, i: i32) -> (i32, i32) {
    let delta = |j: i32| delta(codes, n, i, j);
    let d = if delta(i + 1) - delta(i - 1) > 0 { 1 } else { -1 };
    let delta_min = delta(i - d);
    let mut l_max = 2;
    while delta(i + l_max * d) > delta_min {
        l_max *= 2;
    }
    let mut l = 0;
    let mut t = l_max / 2;
    while t >= 1 {
        if delta(i + (l + t) * d) > delta_min {
            l += t;
        }
        t /= 2;
    }
    let j = i + l * d;
    let delta_node = delta(j);
    let mut s = 0;
    let mut divisor = 2;
    loop {
        let t = (l + divisor - 1) / divisor;
        if delta(i + (s + t) * d) > delta_node {
            s += t;
        }
        if t <= 1 {
            break;
        }
        divisor *= 2;
    }
    let gamma = i + s * d + d.min(0);
    let left = if i.min(j) == gamma { n - 1 + gamma } else { gamma };
    let right = if i.max(j) == gamma + 1 { n + gamma } else { gamma + 1 };
    (left, right)
}

// args: codes, indices, prim_bounds, nodes, bounds, n
pub(crate) fn emit_hierarchy(wg: &WorkGroup<'_>) {
    let (codes, indices, prim_bounds) = (wg.buffer(0), wg.buffer(1), wg.buffer(2));
    let (nodes, bounds) = (wg.buffer(3), wg.buffer(4));
    let n = wg.u32(5) as i32;
    // Word offsets of the node fields.
    const PARENT: usize = 0;
    const LEFT: usize = 1;
    const RIGHT: usize = 2;
    let field = |node: i32, f: usize| node as usize * 4 + f;
    for gid in wg.global_ids().filter(|&g| g < (2 * n - 1).max(0) as usize) {
        let i = gid as i32;
        if i == 0 {
            nodes.store_i32(field(0, PARENT), -1);
        }
        if i >= n - 1 {
            let prim = indices.load_i32((i - (n - 1)) as usize);
            nodes.store_i32(field(i, LEFT), prim);
            nodes.store_i32(field(i, RIGHT), prim);
            let b: GpuBbox = prim_bounds.load(prim as usize);
            bounds.store(i as usize, &b);
            continue;
        }
        let (left, right) = karras_children(codes, n, i);
        nodes.store_i32(field(i, LEFT), left);
        nodes.store_i32(field(i, RIGHT), right);
        nodes.store_i32(field(left, PARENT), i);
        nodes.store_i32(field(right, PARENT), i);
    }
}

// args: nodes, n
pub(crate) fn link_next(wg: &WorkGroup<'_>) {
    let nodes = wg.buffer(0);
    let n = wg.u32(1) as usize;
    for gid in wg.global_ids().filter(|&g| g + 1 < 2 * n) {
        let mut current = gid as i32;
        let mut next = -1;
        loop {
            let node: HlbvhNode = nodes.load(current as usize);
            if node.parent == -1 {
                break;
            }
            let parent: HlbvhNode = nodes.load(node.parent as usize);
            if parent.left == current {
                next = parent.right;
                break;
            }
            current = node.parent;
        }
        nodes.store_i32(gid * 4 + 3, next);
    }
}

// args: flags, n
pub(crate) fn reset_flags(wg: &WorkGroup<'_>) {
    let flags = wg.buffer(0);
    let n = wg.u32(1) as usize;
    for i in wg.global_ids().filter(|&i| i < n) {
        flags.store_i32(i, 0);
    }
}

// args: nodes, prim_bounds, bounds, n
pub(crate) fn update_leaf_bounds(wg: &WorkGroup<'_>) {
    let (nodes, prim_bounds, bounds) = (wg.buffer(0), wg.buffer(1), wg.buffer(2));
    let n = wg.u32(3) as usize;
    for i in wg.global_ids().filter(|&i| i < n) {
        let leaf = n - 1 + i;
        let node: HlbvhNode = nodes.load(leaf);
        let b: GpuBbox = prim_bounds.load(node.left as usize);
        bounds.store(leaf, &b);
    }
}

// args: nodes, flags, bounds, n
pub(crate) fn refit_bounds(wg: &WorkGroup<'_>) {
    let (nodes, flags, bounds) = (wg.buffer(0), wg.buffer(1), wg.buffer(2));
    let n = wg.u32(3) as usize;
    for i in wg.global_ids().filter(|&i| i < n) {
        let mut node: HlbvhNode = nodes.load(n - 1 + i);
        while node.parent != -1 {
            let parent = node.parent as usize;
            // The first child to arrive stops, the second one merges.
            if flags.compare_exchange_i32(parent, 0, 1) == 0 {
                break;
            }
            node = nodes.load(parent);
            let merged = union(&bounds.load(node.left as usize), &bounds.load(node.right as usize));
            bounds.store(parent, &merged);
        }
    }
}
