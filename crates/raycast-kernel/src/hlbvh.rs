//! Device-side LBVH construction and refit.
//!
//! The build runs entirely in kernels: per-face bounds, a multi-level
//! reduction to the scene bound, 30-bit Morton codes, a key/value radix
//! sort, Karras hierarchy emission and a bottom-up bound refit using one
//! atomic flag per internal node.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use raycast_calc::{Buffer, BufferType, CalcError, Device, Event, Executable, Function};
use raycast_primitives::PrimitiveLibrary;

use crate::error::{Error, Result};
use crate::kernels::{self, REDUCE_BLOCK, WG_SIZE};
use crate::math::{Bbox, GpuBbox};

/// HLBVH node. 16 bytes.
///
/// Internal nodes occupy `[0, n - 1)` and leaves `[n - 1, 2n - 1)`. A
/// leaf stores its face index in both `left` and `right`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HlbvhNode {
    /// Parent node, -1 for the root.
    pub parent: i32,
    /// Left child, or the face of a leaf.
    pub left: i32,
    /// Right child, or the face of a leaf.
    pub right: i32,
    /// Preorder successor skipping this subtree, or -1.
    pub next: i32,
}

impl HlbvhNode {
    /// Whether the node is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.left == self.right
    }
}

/// Host copy of a built tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HlbvhTree {
    /// Nodes, `2n - 1` of them.
    pub nodes: Vec<HlbvhNode>,
    /// Bound of every node.
    pub bounds: Vec<Bbox>,
}

impl HlbvhTree {
    /// Index of the first leaf.
    pub fn first_leaf(&self) -> usize {
        self.nodes.len() / 2
    }
}

struct BuildBuffers {
    capacity: usize,
    prim_bounds: Buffer,
    reduce_a: Buffer,
    reduce_b: Buffer,
    codes: Buffer,
    indices: Buffer,
    sorted_codes: Buffer,
    sorted_indices: Buffer,
    nodes: Buffer,
    bounds: Buffer,
    flags: Buffer,
}

impl BuildBuffers {
    fn new(device: &dyn Device, capacity: usize) -> Result<Self> {
        let rw = BufferType::ReadWrite;
        let level1 = capacity.div_ceil(REDUCE_BLOCK).max(1);
        let level2 = level1.div_ceil(REDUCE_BLOCK).max(1);
        let num_nodes = 2 * capacity - 1;
        tracing::debug!(capacity, "allocating hlbvh buffers");
        Ok(Self {
            capacity,
            prim_bounds: device.create_typed_buffer::<GpuBbox>(rw, capacity)?,
            reduce_a: device.create_typed_buffer::<GpuBbox>(rw, level1)?,
            reduce_b: device.create_typed_buffer::<GpuBbox>(rw, level2)?,
            codes: device.create_typed_buffer::<u32>(rw, capacity)?,
            indices: device.create_typed_buffer::<i32>(rw, capacity)?,
            sorted_codes: device.create_typed_buffer::<u32>(rw, capacity)?,
            sorted_indices: device.create_typed_buffer::<i32>(rw, capacity)?,
            nodes: device.create_typed_buffer::<HlbvhNode>(rw, num_nodes)?,
            bounds: device.create_typed_buffer::<GpuBbox>(rw, num_nodes)?,
            flags: device.create_typed_buffer::<i32>(rw, capacity)?,
        })
    }
}

/// Builds and refits an HLBVH over device-resident faces.
pub struct HlbvhBuilder {
    device: Arc<dyn Device>,
    primitives: PrimitiveLibrary,
    executable: Executable,
    buffers: Option<BuildBuffers>,
    num_prims: usize,
}

impl HlbvhBuilder {
    /// Face capacity of the first allocation.
    pub const INITIAL_CAPACITY: usize = 100_000;

    /// Compile the build kernels for `device`.
    #[tracing::instrument(skip_all, fields(device = %device.info().name))]
    pub fn new(device: Arc<dyn Device>) -> Result<Self> {
        let executable =
            device.compile_executable(&kernels::build_program(), &kernels::build_options())?;
        let primitives = PrimitiveLibrary::new(device.clone())?;
        Ok(Self {
            device,
            primitives,
            executable,
            buffers: None,
            num_prims: 0,
        })
    }

    /// Number of faces in the current tree.
    pub fn num_prims(&self) -> usize {
        self.num_prims
    }

    /// Face capacity of the current allocation, 0 before the first build.
    pub fn capacity(&self) -> usize {
        self.buffers.as_ref().map_or(0, |b| b.capacity)
    }

    /// Node buffer, once built.
    pub fn nodes(&self) -> Option<&Buffer> {
        self.buffers.as_ref().map(|b| &b.nodes)
    }

    /// Node bound buffer, once built.
    pub fn bounds(&self) -> Option<&Buffer> {
        self.buffers.as_ref().map(|b| &b.bounds)
    }

    fn dispatch(
        &self,
        name: &str,
        queue: u32,
        lanes: usize,
        bind: impl FnOnce(&mut Function) -> raycast_calc::Result<()>,
    ) -> Result<Event> {
        let mut function = self.executable.create_function(name)?;
        bind(&mut function)?;
        Ok(self
            .device
            .execute(&function, queue, lanes.next_multiple_of(WG_SIZE), WG_SIZE, &[])?)
    }

    fn ensure_capacity(&mut self, n: usize) -> Result<()> {
        if self.buffers.as_ref().is_some_and(|b| b.capacity >= n) {
            return Ok(());
        }
        let capacity = n.max(Self::INITIAL_CAPACITY);
        // Drop the old set first so both never live at once.
        self.buffers = None;
        self.buffers = Some(BuildBuffers::new(&*self.device, capacity)?);
        Ok(())
    }

    fn buffers(&self) -> Result<&BuildBuffers> {
        self.buffers.as_ref().ok_or(Error::NotPreprocessed)
    }

    /// Build a tree over the first `n` faces.
    ///
    /// `faces` holds [`Face`](crate::scene::Face) records indexing the
    /// `xyzw` vertices in `vertices`.
    #[tracing::instrument(skip_all, fields(n = n))]
    pub fn build(
        &mut self,
        queue: u32,
        faces: &Buffer,
        vertices: &Buffer,
        n: usize,
    ) -> Result<Event> {
        self.num_prims = 0;
        if n == 0 {
            return Ok(Event::complete());
        }
        self.ensure_capacity(n)?;
        self.calc_prim_bounds(queue, faces, vertices, n)?;
        let scene_bounds = self.reduce_bounds(queue, n)?;

        let b = self.buffers.as_ref().ok_or(Error::NotPreprocessed)?;
        self.dispatch("calc_morton_codes", queue, n, |f| {
            f.set_buffer(0, &b.prim_bounds)?.set_buffer(1, scene_bounds)?;
            f.set_buffer(2, &b.codes)?.set_buffer(3, &b.indices)?;
            f.set_u32(4, n as u32)?;
            Ok(())
        })?;
        self.primitives.sort_radix_key_value_int(
            queue,
            &b.codes,
            &b.indices,
            &b.sorted_codes,
            &b.sorted_indices,
            n,
        )?;

        let num_nodes = 2 * n - 1;
        self.dispatch("emit_hierarchy", queue, num_nodes, |f| {
            f.set_buffer(0, &b.sorted_codes)?.set_buffer(1, &b.sorted_indices)?;
            f.set_buffer(2, &b.prim_bounds)?.set_buffer(3, &b.nodes)?;
            f.set_buffer(4, &b.bounds)?.set_u32(5, n as u32)?;
            Ok(())
        })?;
        self.dispatch("link_next", queue, num_nodes, |f| {
            f.set_buffer(0, &b.nodes)?.set_u32(1, n as u32)?;
            Ok(())
        })?;
        let event = self.refit_internal(queue, n)?;
        tracing::debug!(n, capacity = b.capacity, "built hlbvh");
        self.num_prims = n;
        Ok(event)
    }

    /// Recompute every bound of the current tree after the vertices moved.
    ///
    /// The topology is kept, so `n` must match the last build.
    #[tracing::instrument(skip_all, fields(n = n))]
    pub fn refit(
        &mut self,
        queue: u32,
        faces: &Buffer,
        vertices: &Buffer,
        n: usize,
    ) -> Result<Event> {
        if n != self.num_prims {
            let held = self.num_prims;
            return Err(CalcError::Logic(format!("refit of {n} faces, tree holds {held}")).into());
        }
        if n == 0 {
            return Ok(Event::complete());
        }
        self.calc_prim_bounds(queue, faces, vertices, n)?;
        let b = self.buffers()?;
        self.dispatch("update_leaf_bounds", queue, n, |f| {
            f.set_buffer(0, &b.nodes)?.set_buffer(1, &b.prim_bounds)?;
            f.set_buffer(2, &b.bounds)?.set_u32(3, n as u32)?;
            Ok(())
        })?;
        self.refit_internal(queue, n)
    }

    fn calc_prim_bounds(
        &self,
        queue: u32,
        faces: &Buffer,
        vertices: &Buffer,
        n: usize,
    ) -> Result<Event> {
        let b = self.buffers()?;
        self.dispatch("calc_prim_bounds", queue, n, |f| {
            f.set_buffer(0, faces)?.set_buffer(1, vertices)?;
            f.set_buffer(2, &b.prim_bounds)?.set_u32(3, n as u32)?;
            Ok(())
        })
    }

    /// Reduce the face bounds to one box; returns the buffer holding it
    /// at index 0.
    fn reduce_bounds(&self, queue: u32, n: usize) -> Result<&Buffer> {
        let b = self.buffers()?;
        let mut input = &b.prim_bounds;
        let mut count = n;
        let targets = [&b.reduce_a, &b.reduce_b];
        for level in 0.. {
            let groups = count.div_ceil(REDUCE_BLOCK);
            let output = targets[level % 2];
            self.dispatch("reduce_bounds", queue, groups * WG_SIZE, |f| {
                f.set_buffer(0, input)?.set_buffer(1, output)?.set_u32(2, count as u32)?;
                Ok(())
            })?;
            input = output;
            count = groups;
            if count == 1 {
                break;
            }
        }
        Ok(input)
    }

    fn refit_internal(&self, queue: u32, n: usize) -> Result<Event> {
        let b = self.buffers()?;
        self.dispatch("reset_flags", queue, n, |f| {
            f.set_buffer(0, &b.flags)?.set_u32(1, n as u32)?;
            Ok(())
        })?;
        self.dispatch("refit_bounds", queue, n, |f| {
            f.set_buffer(0, &b.nodes)?.set_buffer(1, &b.flags)?;
            f.set_buffer(2, &b.bounds)?.set_u32(3, n as u32)?;
            Ok(())
        })
    }

    /// Blocking copy of the current tree.
    pub fn read_tree(&self, queue: u32) -> Result<HlbvhTree> {
        if self.num_prims == 0 {
            return Ok(HlbvhTree::default());
        }
        let b = self.buffers()?;
        let num_nodes = 2 * self.num_prims - 1;
        let nodes = self.device.read_vec::<HlbvhNode>(&b.nodes, queue, 0, num_nodes)?;
        let bounds = self
            .device
            .read_vec::<GpuBbox>(&b.bounds, queue, 0, num_nodes)?
            .iter()
            .map(Bbox::from)
            .collect();
        Ok(HlbvhTree { nodes, bounds })
    }
}

impl std::fmt::Debug for HlbvhBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlbvhBuilder")
            .field("num_prims", &self.num_prims)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::FlatScene;
    use crate::shape::Mesh;
    use nalgebra::{Matrix4, Point3};
    use raycast_calc::{Calc, CalcConfig};

    fn host_device() -> Arc<dyn Device> {
        let calc = Calc::new(CalcConfig {
            enable_gpu: false,
            ..Default::default()
        });
        calc.create_device(0).unwrap()
    }

    fn strip(n: usize) -> FlatScene {
        let mut points = Vec::new();
        let mut tris = Vec::new();
        for i in 0..n {
            let x = i as f32;
            let base = points.len() as u32;
            points.extend([
                Point3::new(x, 0.0, 0.0),
                Point3::new(x + 0.5, 0.0, 0.0),
                Point3::new(x, 1.0, 0.0),
            ]);
            tris.push([base, base + 1, base + 2]);
        }
        let mesh = Mesh::from_triangles(&points, &tris).unwrap();
        let mut scene = FlatScene::default();
        scene.push_mesh(&mesh, &Matrix4::identity(), 1, -1);
        scene
    }

    #[test]
    fn test_single_face_tree() {
        let device = host_device();
        let scene = strip(1);
        let faces = device.create_pod_buffer(BufferType::Read, &scene.faces).unwrap();
        let vertices = device.create_pod_buffer(BufferType::Read, &scene.vertices).unwrap();
        let mut builder = HlbvhBuilder::new(device).unwrap();
        builder.build(0, &faces, &vertices, 1).unwrap().wait().unwrap();
        let tree = builder.read_tree(0).unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0], HlbvhNode { parent: -1, left: 0, right: 0, next: -1 });
        assert_eq!(tree.bounds[0], scene.face_bounds()[0]);
        assert_eq!(builder.capacity(), HlbvhBuilder::INITIAL_CAPACITY);
    }

    #[test]
    fn test_refit_rejects_other_sizes() {
        let device = host_device();
        let scene = strip(4);
        let faces = device.create_pod_buffer(BufferType::Read, &scene.faces).unwrap();
        let vertices = device.create_pod_buffer(BufferType::Read, &scene.vertices).unwrap();
        let mut builder = HlbvhBuilder::new(device).unwrap();
        builder.build(0, &faces, &vertices, 4).unwrap().wait().unwrap();
        assert!(matches!(
            builder.refit(0, &faces, &vertices, 3),
            Err(Error::Calc(CalcError::Logic(_)))
        ));
    }
}
