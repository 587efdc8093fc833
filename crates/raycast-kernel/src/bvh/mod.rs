//! Host-built binary BVH with one primitive per leaf.
//!
//! Uses a binned Surface Area Heuristic, or a median split, for construction.
//! Nodes are stored in preorder: an internal node's left child directly
//! follows it, which the translators rely on.

mod perfect_hash;
mod translate;

pub use perfect_hash::PerfectHashMap;
pub use translate::{complete_tree_indices, fat_nodes, skip_links, FatNode, SkipNode};

use nalgebra::Point3;

use crate::math::Bbox;
use crate::options::{BuilderKind, Options};

/// Payload of a BVH node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A single primitive.
    Leaf {
        /// Primitive index as passed to [`Bvh::build`].
        prim: u32,
    },
    /// Two children.
    Internal {
        /// Left child node index.
        left: u32,
        /// Right child node index.
        right: u32,
    },
}

/// A BVH node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    /// Bound of everything below this node.
    pub bounds: Bbox,
    /// Leaf or internal payload.
    pub kind: NodeKind,
}

/// Construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildParams {
    /// Split algorithm.
    pub builder: BuilderKind,
    /// Number of SAH bins per axis.
    pub num_bins: usize,
    /// Cost of a traversal step relative to a primitive test.
    pub traversal_cost: f32,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            builder: BuilderKind::Sah,
            num_bins: 64,
            traversal_cost: 10.0,
        }
    }
}

impl From<&Options> for BuildParams {
    fn from(options: &Options) -> Self {
        Self {
            builder: options.builder(),
            num_bins: options.sah_num_bins(),
            traversal_cost: options.sah_traversal_cost(),
        }
    }
}

/// Primitive record used during construction.
#[derive(Clone, Copy)]
struct PrimRef {
    prim: u32,
    bounds: Bbox,
    centroid: Point3<f32>,
}

/// Binary BVH over primitive bounds.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
}

impl Bvh {
    /// Build over `prim_bounds`. Leaf `prim` values index this slice.
    ///
    /// Construction is deterministic for a given input order.
    pub fn build(prim_bounds: &[Bbox], params: &BuildParams) -> Self {
        let mut refs: Vec<PrimRef> = prim_bounds
            .iter()
            .enumerate()
            .map(|(i, b)| PrimRef {
                prim: i as u32,
                bounds: *b,
                centroid: b.center(),
            })
            .collect();

        let mut bvh = Self {
            nodes: Vec::with_capacity(prim_bounds.len().saturating_mul(2).saturating_sub(1)),
        };
        if !refs.is_empty() {
            bvh.build_node(&mut refs, params);
        }
        tracing::debug!(
            prims = prim_bounds.len(),
            nodes = bvh.nodes.len(),
            depth = bvh.depth(),
            "built bvh"
        );
        bvh
    }

    /// Nodes in preorder. The root is node 0.
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Number of nodes, `2N - 1` for `N` primitives.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if built over no primitives.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bound of the whole tree.
    pub fn bounds(&self) -> Bbox {
        self.nodes.first().map(|n| n.bounds).unwrap_or_default()
    }

    /// Length of the longest root-to-leaf path in edges.
    pub fn depth(&self) -> usize {
        let mut depths = vec![0usize; self.nodes.len()];
        let mut max = 0;
        // Preorder: parents precede children.
        for (i, node) in self.nodes.iter().enumerate() {
            if let NodeKind::Internal { left, right } = node.kind {
                depths[left as usize] = depths[i] + 1;
                depths[right as usize] = depths[i] + 1;
                max = max.max(depths[i] + 1);
            }
        }
        max
    }

    fn build_node(&mut self, refs: &mut [PrimRef], params: &BuildParams) -> u32 {
        let bounds = refs.iter().fold(Bbox::empty(), |b, r| b.union(&r.bounds));
        let index = self.nodes.len() as u32;

        if refs.len() == 1 {
            self.nodes.push(BvhNode {
                bounds,
                kind: NodeKind::Leaf { prim: refs[0].prim },
            });
            return index;
        }

        // Reserve space for this node
        self.nodes.push(BvhNode {
            bounds,
            kind: NodeKind::Internal { left: 0, right: 0 },
        });

        let mid = match params.builder {
            BuilderKind::Sah => sah_partition(refs, &bounds, params),
            BuilderKind::Median => None,
        }
        .unwrap_or_else(|| median_partition(refs));

        let (left_refs, right_refs) = refs.split_at_mut(mid);
        let left = self.build_node(left_refs, params);
        let right = self.build_node(right_refs, params);
        self.nodes[index as usize].kind = NodeKind::Internal { left, right };
        index
    }
}

/// Sort along the largest centroid axis and split at the middle.
fn median_partition(refs: &mut [PrimRef]) -> usize {
    let centroids = Bbox::from_points(refs.iter().map(|r| &r.centroid));
    let axis = centroids.max_extent_axis();
    let mid = refs.len() / 2;
    refs.select_nth_unstable_by(mid, |a, b| {
        a.centroid[axis]
            .total_cmp(&b.centroid[axis])
            .then(a.prim.cmp(&b.prim))
    });
    mid
}

/// Partition at the cheapest binned SAH split, or `None` if no bin
/// boundary separates the primitives.
fn sah_partition(refs: &mut [PrimRef], bounds: &Bbox, params: &BuildParams) -> Option<usize> {
    let num_bins = params.num_bins.max(2);
    let centroids = Bbox::from_points(refs.iter().map(|r| &r.centroid));
    let extent = centroids.extents();
    let total_area = bounds.surface_area();
    if total_area <= 0.0 {
        return None;
    }

    let bin_of = |c: f32, axis: usize| -> usize {
        let b = ((c - centroids.min[axis]) / extent[axis] * num_bins as f32) as usize;
        b.min(num_bins - 1)
    };

    let mut best: Option<(f32, usize, usize)> = None;
    let mut counts = vec![0usize; num_bins];
    let mut bin_bounds = vec![Bbox::empty(); num_bins];
    let mut right_area = vec![0.0f32; num_bins];
    let mut right_count = vec![0usize; num_bins];

    for axis in 0..3 {
        if extent[axis] <= 0.0 {
            continue;
        }
        counts.fill(0);
        bin_bounds.fill(Bbox::empty());
        for r in refs.iter() {
            let b = bin_of(r.centroid[axis], axis);
            counts[b] += 1;
            bin_bounds[b] = bin_bounds[b].union(&r.bounds);
        }

        // Suffix sweep, then prefix sweep evaluating each boundary.
        let mut acc = Bbox::empty();
        let mut count = 0;
        for split in (1..num_bins).rev() {
            acc = acc.union(&bin_bounds[split]);
            count += counts[split];
            right_area[split] = acc.surface_area();
            right_count[split] = count;
        }
        let mut acc = Bbox::empty();
        let mut count = 0;
        for split in 1..num_bins {
            acc = acc.union(&bin_bounds[split - 1]);
            count += counts[split - 1];
            if count == 0 || right_count[split] == 0 {
                continue;
            }
            let left_cost = acc.surface_area() * count as f32;
            let right_cost = right_area[split] * right_count[split] as f32;
            let cost = params.traversal_cost + (left_cost + right_cost) / total_area;
            match best {
                Some((c, _, _)) if c <= cost => {}
                _ => best = Some((cost, axis, split)),
            }
        }
    }

    let (_, axis, split) = best?;
    let mut mid = 0;
    for i in 0..refs.len() {
        if bin_of(refs[i].centroid[axis], axis) < split {
            refs.swap(i, mid);
            mid += 1;
        }
    }
    (mid != 0 && mid != refs.len()).then_some(mid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_boxes(n: usize, seed: u64) -> Vec<Bbox> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let p = Point3::new(
                    rng.random_range(-10.0..10.0),
                    rng.random_range(-10.0..10.0),
                    rng.random_range(-10.0..10.0),
                );
                let size = rng.random_range(0.01..1.0);
                Bbox {
                    min: p,
                    max: p + nalgebra::Vector3::repeat(size),
                }
            })
            .collect()
    }

    fn check_structure(bvh: &Bvh, prims: &[Bbox]) {
        let n = prims.len();
        assert_eq!(bvh.len(), 2 * n - 1);
        let mut seen = vec![false; n];
        for (i, node) in bvh.nodes().iter().enumerate() {
            match node.kind {
                NodeKind::Leaf { prim } => {
                    assert!(!seen[prim as usize], "primitive {prim} in two leaves");
                    seen[prim as usize] = true;
                    assert_eq!(node.bounds, prims[prim as usize]);
                }
                NodeKind::Internal { left, right } => {
                    assert_eq!(left as usize, i + 1, "left child follows its parent");
                    let l = &bvh.nodes()[left as usize];
                    let r = &bvh.nodes()[right as usize];
                    assert_eq!(node.bounds, l.bounds.union(&r.bounds));
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_sah_one_primitive_per_leaf() {
        let prims = random_boxes(500, 1);
        let bvh = Bvh::build(&prims, &BuildParams::default());
        check_structure(&bvh, &prims);
        assert!(bvh.depth() < 40);
    }

    #[test]
    fn test_median_builder() {
        let prims = random_boxes(257, 2);
        let params = BuildParams {
            builder: BuilderKind::Median,
            ..Default::default()
        };
        let bvh = Bvh::build(&prims, &params);
        check_structure(&bvh, &prims);
        assert_eq!(bvh.depth(), 9);
    }

    #[test]
    fn test_coincident_primitives() {
        let prims = vec![random_boxes(1, 3)[0]; 33];
        let bvh = Bvh::build(&prims, &BuildParams::default());
        check_structure(&bvh, &prims);
        assert_eq!(bvh.depth(), 6);
    }

    #[test]
    fn test_single_and_empty() {
        let prims = random_boxes(1, 4);
        let bvh = Bvh::build(&prims, &BuildParams::default());
        assert_eq!(bvh.len(), 1);
        assert_eq!(bvh.depth(), 0);
        assert!(Bvh::build(&[], &BuildParams::default()).is_empty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let prims = random_boxes(300, 5);
        let a = Bvh::build(&prims, &BuildParams::default());
        let b = Bvh::build(&prims, &BuildParams::default());
        assert_eq!(a.nodes(), b.nodes());
    }
}
