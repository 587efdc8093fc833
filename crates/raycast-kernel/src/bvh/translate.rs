//! Device layouts of a host-built BVH.

use bytemuck::{Pod, Zeroable};

use super::{Bvh, NodeKind};
use crate::error::{Error, Result};
use crate::math::Bbox;

/// Skip-link node. 32 bytes.
///
/// Nodes are in preorder, so a hit internal node continues at the next
/// address and anything else continues at `next`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkipNode {
    /// Bound minimum.
    pub pmin: [f32; 3],
    /// Leaf payload, or -1 for internal nodes.
    pub leaf: i32,
    /// Bound maximum.
    pub pmax: [f32; 3],
    /// Address to continue at after this subtree, or -1.
    pub next: i32,
}

/// Node storing the bounds of both children. 64 bytes.
///
/// A node is a leaf iff `left == -1`, in which case `face` is its face.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FatNode {
    /// Left child bound minimum.
    pub lmin: [f32; 3],
    /// Left child address, or -1 for leaves.
    pub left: i32,
    /// Left child bound maximum.
    pub lmax: [f32; 3],
    /// Right child address, or -1 for leaves.
    pub right: i32,
    /// Right child bound minimum.
    pub rmin: [f32; 3],
    /// Face index of a leaf, -1 otherwise.
    pub face: i32,
    /// Right child bound maximum.
    pub rmax: [f32; 3],
    /// Unused.
    pub pad: i32,
}

fn corners(b: &Bbox) -> ([f32; 3], [f32; 3]) {
    ([b.min.x, b.min.y, b.min.z], [b.max.x, b.max.y, b.max.z])
}

/// Skip-link layout of `bvh` placed at address `base`.
///
/// Leaf payloads come from `leaf(prim)`. Child and next addresses are
/// offset by `base`; the terminal link stays -1.
pub fn skip_links(bvh: &Bvh, base: i32, leaf: impl Fn(u32) -> i32) -> Vec<SkipNode> {
    let nodes = bvh.nodes();
    let mut next = vec![-1i32; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        if let NodeKind::Internal { left, right } = node.kind {
            next[left as usize] = right as i32;
            next[right as usize] = next[i];
        }
    }
    nodes
        .iter()
        .zip(next)
        .map(|(node, next)| {
            let (pmin, pmax) = corners(&node.bounds);
            SkipNode {
                pmin,
                leaf: match node.kind {
                    NodeKind::Leaf { prim } => leaf(prim),
                    NodeKind::Internal { .. } => -1,
                },
                pmax,
                next: if next < 0 { -1 } else { next + base },
            }
        })
        .collect()
}

/// Fat-node layout of `bvh`, one node per BVH node at the same address.
pub fn fat_nodes(bvh: &Bvh, leaf: impl Fn(u32) -> i32) -> Vec<FatNode> {
    let nodes = bvh.nodes();
    nodes
        .iter()
        .map(|node| match node.kind {
            NodeKind::Leaf { prim } => FatNode {
                left: -1,
                right: -1,
                face: leaf(prim),
                ..FatNode::zeroed()
            },
            NodeKind::Internal { left, right } => {
                let (lmin, lmax) = corners(&nodes[left as usize].bounds);
                let (rmin, rmax) = corners(&nodes[right as usize].bounds);
                FatNode {
                    lmin,
                    left: left as i32,
                    lmax,
                    right: right as i32,
                    rmin,
                    face: -1,
                    rmax,
                    pad: 0,
                }
            }
        })
        .collect()
}

/// Deepest tree whose complete-tree indices fit in 32 bits.
pub const MAX_COMPLETE_DEPTH: usize = 31;

/// Index of every node in an implicit complete binary tree: the root is
/// 1 and the children of `i` are `2i` and `2i + 1`.
pub fn complete_tree_indices(bvh: &Bvh) -> Result<Vec<u32>> {
    let depth = bvh.depth();
    if depth > MAX_COMPLETE_DEPTH {
        return Err(Error::DepthExceeded {
            strategy: "bit-trail",
            depth,
            limit: MAX_COMPLETE_DEPTH,
        });
    }
    let mut index = vec![0u32; bvh.len()];
    if let Some(root) = index.first_mut() {
        *root = 1;
    }
    for (i, node) in bvh.nodes().iter().enumerate() {
        if let NodeKind::Internal { left, right } = node.kind {
            index[left as usize] = index[i] << 1;
            index[right as usize] = (index[i] << 1) | 1;
        }
    }
    Ok(index)
}
