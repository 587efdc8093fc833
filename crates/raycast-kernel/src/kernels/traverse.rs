//! Host traversal kernels, one `trace` per strategy.

use nalgebra::Vector3;
use raycast_calc::{HostBuffer, WorkGroup};

use super::geometry::{for_each_ray, Geometry, Hit, RayState};
use super::{GLOBAL_STACK_SIZE, HLBVH_STACK_SIZE, MAX_RADIX_TREE_DEPTH, SHORT_STACK_SIZE};
use crate::bvh::{FatNode, SkipNode};
use crate::hlbvh::HlbvhNode;
use crate::intersector::GpuShape;
use crate::math::GpuBbox;
use crate::ray::Ray;

// args: rays, num_rays, hits
pub(crate) fn clear_intersections(wg: &WorkGroup<'_>) {
    for_each_ray(wg, 2, false, |r, _| Hit::none(r.max_t()));
}

// args: rays, num_rays, hits
pub(crate) fn clear_occlusions(wg: &WorkGroup<'_>) {
    for_each_ray(wg, 2, true, |r, _| Hit::none(r.max_t()));
}

fn trace_skip_links(nodes: &HostBuffer, geo: &Geometry<'_>, r: &Ray, any_hit: bool) -> Hit {
    let s = RayState::from_ray(r);
    let mut hit = Hit::none(r.max_t());
    let mut addr = 0i32;
    while addr != -1 {
        let node: SkipNode = nodes.load(addr as usize);
        if s.hits_box(&node.pmin, &node.pmax, hit.t).is_some() {
            if node.leaf >= 0 {
                if geo.test_flat_face(&s, node.leaf, &mut hit) && any_hit {
                    return hit;
                }
                addr = node.next;
            } else {
                addr += 1;
            }
        } else {
            addr = node.next;
        }
    }
    hit
}

fn skip_links(wg: &WorkGroup<'_>, any_hit: bool) {
    let geo = Geometry {
        vertices: wg.buffer(3),
        faces: wg.buffer(4),
    };
    for_each_ray(wg, 5, any_hit, |r, _| trace_skip_links(wg.buffer(2), &geo, r, any_hit));
}

// args: rays, num_rays, nodes, vertices, faces, hits
pub(crate) fn intersect_skip_links(wg: &WorkGroup<'_>) {
    skip_links(wg, false);
}

// args: rays, num_rays, nodes, vertices, faces, hits
pub(crate) fn occlude_skip_links(wg: &WorkGroup<'_>) {
    skip_links(wg, true);
}

fn to_object(shape: &GpuShape, world: &RayState) -> RayState {
    let row = |m: &[f32; 4]| Vector3::new(m[0], m[1], m[2]);
    let (m0, m1, m2) = (row(&shape.m0), row(&shape.m1), row(&shape.m2));
    let o = Vector3::new(
        m0.dot(&world.o) + shape.m0[3],
        m1.dot(&world.o) + shape.m1[3],
        m2.dot(&world.o) + shape.m2[3],
    );
    let d = Vector3::new(m0.dot(&world.d), m1.dot(&world.d), m2.dot(&world.d));
    RayState::new(o, d, world.mask)
}

fn trace_two_level(
    nodes: &HostBuffer,
    shapes: &HostBuffer,
    geo: &Geometry<'_>,
    r: &Ray,
    any_hit: bool,
) -> Hit {
    let world = RayState::from_ray(r);
    let mut s = world;
    let mut hit = Hit::none(r.max_t());
    let mut addr = 0i32;
    let mut top_next = -1;
    let mut in_bottom = false;
    let (mut shape_id, mut shape_mask) = (-1, 0);
    loop {
        if addr == -1 {
            if !in_bottom {
                break;
            }
            in_bottom = false;
            s = world;
            addr = top_next;
            continue;
        }
        let node: SkipNode = nodes.load(addr as usize);
        if s.hits_box(&node.pmin, &node.pmax, hit.t).is_none() {
            addr = node.next;
            continue;
        }
        if node.leaf < 0 {
            addr += 1;
            continue;
        }
        if in_bottom {
            if geo.test_face(&s, node.leaf, shape_id, shape_mask, &mut hit) && any_hit {
                return hit;
            }
            addr = node.next;
        } else {
            let shape: GpuShape = shapes.load(node.leaf as usize);
            if shape.mask & world.mask != 0 {
                s = to_object(&shape, &world);
                shape_id = shape.id;
                shape_mask = shape.mask;
                top_next = node.next;
                addr = shape.bvh_start;
                in_bottom = true;
            } else {
                addr = node.next;
            }
        }
    }
    hit
}

fn two_level(wg: &WorkGroup<'_>, any_hit: bool) {
    let geo = Geometry {
        vertices: wg.buffer(4),
        faces: wg.buffer(5),
    };
    for_each_ray(wg, 6, any_hit, |r, _| {
        trace_two_level(wg.buffer(2), wg.buffer(3), &geo, r, any_hit)
    });
}

// args: rays, num_rays, nodes, shapes, vertices, faces, hits
pub(crate) fn intersect_two_level(wg: &WorkGroup<'_>) {
    two_level(wg, false);
}

// args: rays, num_rays, nodes, shapes, vertices, faces, hits
pub(crate) fn occlude_two_level(wg: &WorkGroup<'_>) {
    two_level(wg, true);
}

/// Near and far child of a fat node when both boxes are hit, otherwise
/// the single hit child.
enum Children {
    Both { near: i32, far: i32 },
    One(i32),
    None,
}

fn fat_children(s: &RayState, node: &FatNode, t_max: f32) -> Children {
    let l = s.hits_box(&node.lmin, &node.lmax, t_max);
    let r = s.hits_box(&node.rmin, &node.rmax, t_max);
    match (l, r) {
        (Some(lt), Some(rt)) if rt < lt => Children::Both {
            near: node.right,
            far: node.left,
        },
        (Some(_), Some(_)) => Children::Both {
            near: node.left,
            far: node.right,
        },
        (Some(_), None) => Children::One(node.left),
        (None, Some(_)) => Children::One(node.right),
        (None, None) => Children::None,
    }
}

/// Two-tier stack: the first entries stay local, the overflow goes to
/// this ray's slice of the global stack buffer.
struct ShortStack<'a> {
    local: [i32; SHORT_STACK_SIZE],
    global: &'a HostBuffer,
    base: usize,
    sp: usize,
}

impl ShortStack<'_> {
    fn push(&mut self, value: i32) {
        if self.sp >= SHORT_STACK_SIZE + GLOBAL_STACK_SIZE {
            return;
        }
        if self.sp < SHORT_STACK_SIZE {
            self.local[self.sp] = value;
        } else {
            self.global.store_i32(self.base + self.sp - SHORT_STACK_SIZE, value);
        }
        self.sp += 1;
    }

    fn pop(&mut self) -> Option<i32> {
        self.sp = self.sp.checked_sub(1)?;
        Some(if self.sp < SHORT_STACK_SIZE {
            self.local[self.sp]
        } else {
            self.global.load_i32(self.base + self.sp - SHORT_STACK_SIZE)
        })
    }
}

fn trace_short_stack(
    nodes: &HostBuffer,
    geo: &Geometry<'_>,
    global: &HostBuffer,
    r: &Ray,
    ray_index: usize,
    any_hit: bool,
) -> Hit {
    let s = RayState::from_ray(r);
    let mut hit = Hit::none(r.max_t());
    let mut stack = ShortStack {
        local: [0; SHORT_STACK_SIZE],
        global,
        base: ray_index * GLOBAL_STACK_SIZE,
        sp: 0,
    };
    let mut addr = 0i32;
    loop {
        let node: FatNode = nodes.load(addr as usize);
        if node.left == -1 {
            if geo.test_flat_face(&s, node.face, &mut hit) && any_hit {
                return hit;
            }
        } else {
            match fat_children(&s, &node, hit.t) {
                Children::Both { near, far } => {
                    stack.push(far);
                    addr = near;
                    continue;
                }
                Children::One(child) => {
                    addr = child;
                    continue;
                }
                Children::None => {}
            }
        }
        match stack.pop() {
            Some(next) => addr = next,
            None => break,
        }
    }
    hit
}

fn short_stack(wg: &WorkGroup<'_>, any_hit: bool) {
    let geo = Geometry {
        vertices: wg.buffer(3),
        faces: wg.buffer(4),
    };
    for_each_ray(wg, 6, any_hit, |r, i| {
        trace_short_stack(wg.buffer(2), &geo, wg.buffer(5), r, i, any_hit)
    });
}

// args: rays, num_rays, nodes, vertices, faces, global_stack, hits
pub(crate) fn intersect_short_stack(wg: &WorkGroup<'_>) {
    short_stack(wg, false);
}

// args: rays, num_rays, nodes, vertices, faces, global_stack, hits
pub(crate) fn occlude_short_stack(wg: &WorkGroup<'_>) {
    short_stack(wg, true);
}

fn node_address(hash_table: &HostBuffer, width: u32, index: u32) -> i32 {
    let row = hash_table.load_i32((index / width) as usize) as u32;
    let slot = row + (index & (width - 1));
    hash_table.load_i32((width + slot) as usize)
}

fn trace_bit_trail(
    nodes: &HostBuffer,
    geo: &Geometry<'_>,
    hash_table: &HostBuffer,
    width: u32,
    r: &Ray,
    any_hit: bool,
) -> Hit {
    let s = RayState::from_ray(r);
    let mut hit = Hit::none(r.max_t());
    let mut addr = 0i32;
    let mut index = 1u32;
    let mut trail = 0u32;
    loop {
        let node: FatNode = nodes.load(addr as usize);
        if node.left == -1 {
            if geo.test_flat_face(&s, node.face, &mut hit) && any_hit {
                return hit;
            }
        } else {
            let child = match fat_children(&s, &node, hit.t) {
                Children::Both { near, .. } => {
                    trail = (trail << 1) | 1;
                    Some(near)
                }
                Children::One(child) => {
                    trail <<= 1;
                    Some(child)
                }
                Children::None => None,
            };
            if let Some(child) = child {
                index = (index << 1) | u32::from(child == node.right);
                addr = child;
                continue;
            }
        }
        if trail == 0 {
            break;
        }
        let tz = trail.trailing_zeros();
        trail = (trail >> tz) ^ 1;
        index = (index >> tz) ^ 1;
        addr = node_address(hash_table, width, index);
    }
    hit
}

fn bit_trail(wg: &WorkGroup<'_>, any_hit: bool) {
    let geo = Geometry {
        vertices: wg.buffer(3),
        faces: wg.buffer(4),
    };
    let width = wg.u32(7);
    for_each_ray(wg, 6, any_hit, |r, _| {
        trace_bit_trail(wg.buffer(2), &geo, wg.buffer(5), width, r, any_hit)
    });
}

// args: rays, num_rays, nodes, vertices, faces, hash_table, hits, hash_width
pub(crate) fn intersect_bit_trail(wg: &WorkGroup<'_>) {
    bit_trail(wg, false);
}

// args: rays, num_rays, nodes, vertices, faces, hash_table, hits, hash_width
pub(crate) fn occlude_bit_trail(wg: &WorkGroup<'_>) {
    bit_trail(wg, true);
}

fn trace_hlbvh(
    nodes: &HostBuffer,
    bounds: &HostBuffer,
    geo: &Geometry<'_>,
    r: &Ray,
    any_hit: bool,
) -> Hit {
    let s = RayState::from_ray(r);
    let mut hit = Hit::none(r.max_t());
    let hits = |i: i32, t: f32| {
        let b: GpuBbox = bounds.load(i as usize);
        let (pmin, pmax) = ([b.pmin[0], b.pmin[1], b.pmin[2]], [b.pmax[0], b.pmax[1], b.pmax[2]]);
        s.hits_box(&pmin, &pmax, t)
    };
    if hits(0, hit.t).is_none() {
        return hit;
    }
    let mut stack = [0i32; HLBVH_STACK_SIZE];
    let mut sp = 0usize;
    let mut node = 0i32;
    loop {
        let n: HlbvhNode = nodes.load(node as usize);
        if n.left == n.right {
            if geo.test_flat_face(&s, n.left, &mut hit) && any_hit {
                return hit;
            }
        } else {
            match (hits(n.left, hit.t), hits(n.right, hit.t)) {
                (Some(lt), Some(rt)) => {
                    let (near, far) = if rt < lt { (n.right, n.left) } else { (n.left, n.right) };
                    debug_assert!(
                        sp < HLBVH_STACK_SIZE,
                        "radix tree deeper than {MAX_RADIX_TREE_DEPTH}"
                    );
                    stack[sp] = far;
                    sp += 1;
                    node = near;
                    continue;
                }
                (Some(_), None) => {
                    node = n.left;
                    continue;
                }
                (None, Some(_)) => {
                    node = n.right;
                    continue;
                }
                (None, None) => {}
            }
        }
        if sp == 0 {
            break;
        }
        sp -= 1;
        node = stack[sp];
    }
    hit
}

fn hlbvh(wg: &WorkGroup<'_>, any_hit: bool) {
    let geo = Geometry {
        vertices: wg.buffer(4),
        faces: wg.buffer(5),
    };
    for_each_ray(wg, 6, any_hit, |r, _| {
        trace_hlbvh(wg.buffer(2), wg.buffer(3), &geo, r, any_hit)
    });
}

// args: rays, num_rays, nodes, bounds, vertices, faces, hits
pub(crate) fn intersect_hlbvh(wg: &WorkGroup<'_>) {
    hlbvh(wg, false);
}

// args: rays, num_rays, nodes, bounds, vertices, faces, hits
pub(crate) fn occlude_hlbvh(wg: &WorkGroup<'_>) {
    hlbvh(wg, true);
}
