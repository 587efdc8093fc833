use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use raycast_calc::{Buffer, CalcError, Device, Event};

use super::{upload, GpuDataType, Query, QueryKind, Strategy, StrategyKind, TraversalKernels};
use crate::bvh::{self, BuildParams, Bvh, SkipNode};
use crate::error::{Error, Result};
use crate::kernels;
use crate::math::{affine_rows, Bbox};
use crate::scene::Face;
use crate::shape::{Mesh, Shape, ShapeKey, ShapeKind};
use crate::world::World;

/// Per-shape record of the two-level layout. 64 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuShape {
    /// Rows of the world-to-object transform.
    pub m0: [f32; 4],
    /// Second row.
    pub m1: [f32; 4],
    /// Third row.
    pub m2: [f32; 4],
    /// Address of the root of the shape's bottom-level tree.
    pub bvh_start: i32,
    /// Shape id reported in hits.
    pub id: i32,
    /// Shape mask tested against the ray mask.
    pub mask: i32,
    /// Unused.
    pub pad: i32,
}

/// Attached shape with at least one face.
struct Entry<'a> {
    shape: &'a Shape,
    base: ShapeKey,
    mesh: &'a Mesh,
}

fn entries(world: &World) -> Result<Vec<Entry<'_>>> {
    let mut out = Vec::new();
    for (key, shape) in world.attached() {
        let base = match shape.kind() {
            ShapeKind::Mesh(_) => key,
            ShapeKind::Instance { base } => *base,
        };
        let mesh = world.mesh_of(shape)?;
        if mesh.num_faces() > 0 {
            out.push(Entry { shape, base, mesh });
        }
    }
    Ok(out)
}

/// Top-level tree and shape table, both indexed like `entries`.
fn top_level(
    entries: &[Entry<'_>],
    starts: &HashMap<ShapeKey, i32>,
    params: &BuildParams,
) -> (Vec<SkipNode>, Vec<GpuShape>) {
    let bounds: Vec<Bbox> = entries
        .iter()
        .map(|e| e.mesh.bounds().transform(e.shape.transform()))
        .collect();
    let tree = Bvh::build(&bounds, params);
    let nodes = bvh::skip_links(&tree, 0, |prim| prim as i32);
    let shapes = entries
        .iter()
        .map(|e| {
            let [m0, m1, m2] = affine_rows(e.shape.inverse_transform());
            GpuShape {
                m0,
                m1,
                m2,
                bvh_start: starts.get(&e.base).copied().unwrap_or(-1),
                id: e.shape.id(),
                mask: e.shape.mask(),
                pad: 0,
            }
        })
        .collect();
    (nodes, shapes)
}

struct SceneData {
    nodes: Buffer,
    shapes: Buffer,
    vertices: Buffer,
    faces: Buffer,
    /// Root address of each base mesh's bottom tree.
    starts: HashMap<ShapeKey, i32>,
    num_top_nodes: usize,
}

/// Top-level tree over shapes whose leaves enter per-mesh trees built
/// in object space. Instances share their base mesh's tree.
pub(crate) struct TwoLevel {
    kernels: TraversalKernels,
    params: BuildParams,
    data: Option<SceneData>,
}

impl TwoLevel {
    pub(crate) fn new(device: Arc<dyn Device>, params: BuildParams) -> Result<Self> {
        Ok(Self {
            kernels: TraversalKernels::traversal(device, &kernels::two_level_program())?,
            params,
            data: None,
        })
    }

    fn rebuild(&mut self, world: &World) -> Result<()> {
        self.data = None;
        let entries = entries(world)?;
        if entries.is_empty() {
            return Ok(());
        }
        let num_top_nodes = 2 * entries.len() - 1;

        let mut nodes: Vec<SkipNode> = Vec::new();
        let mut vertices: Vec<[f32; 4]> = Vec::new();
        let mut faces: Vec<Face> = Vec::new();
        let mut starts = HashMap::new();
        for e in &entries {
            if starts.contains_key(&e.base) {
                continue;
            }
            let start = (num_top_nodes + nodes.len()) as i32;
            starts.insert(e.base, start);
            let first_vertex = vertices.len() as i32;
            let first_face = faces.len() as i32;
            vertices.extend(e.mesh.vertices().iter().map(|p| [p.x, p.y, p.z, 1.0]));
            faces.extend(e.mesh.triangles().iter().map(|t| Face {
                idx: t.idx.map(|i| first_vertex + i as i32),
                shape_mask: -1,
                shape_id: -1,
                prim_id: t.prim_id as i32,
            }));
            let prim_bounds: Vec<Bbox> = (0..e.mesh.triangles().len())
                .map(|i| e.mesh.triangle_bounds(i))
                .collect();
            let tree = Bvh::build(&prim_bounds, &self.params);
            nodes.extend(bvh::skip_links(&tree, start, |prim| first_face + prim as i32));
        }

        let (top, shapes) = top_level(&entries, &starts, &self.params);
        debug_assert_eq!(top.len(), num_top_nodes);
        let all: Vec<SkipNode> = top.into_iter().chain(nodes).collect();
        let device = self.kernels.device();
        self.data = Some(SceneData {
            nodes: upload(device, &all)?,
            shapes: upload(device, &shapes)?,
            vertices: upload(device, &vertices)?,
            faces: upload(device, &faces)?,
            starts,
            num_top_nodes,
        });
        tracing::debug!(
            shapes = entries.len(),
            meshes = self.data.as_ref().map_or(0, |d| d.starts.len()),
            nodes = all.len(),
            "two-level rebuilt"
        );
        Ok(())
    }

    /// Rewrite the shape table and the top tree in place.
    fn update_top_level(&self, world: &World, data: &SceneData) -> Result<()> {
        let entries = entries(world)?;
        let (top, shapes) = top_level(&entries, &data.starts, &self.params);
        if top.len() != data.num_top_nodes {
            return Err(CalcError::Logic(format!(
                "top tree has {} nodes, {} expected",
                top.len(),
                data.num_top_nodes
            ))
            .into());
        }
        let device = self.kernels.device();
        let a = device.write_slice(&data.nodes, 0, 0, &top)?;
        let b = device.write_slice(&data.shapes, 0, 0, &shapes)?;
        Event::wait_all(&[a, b])?;
        tracing::debug!(shapes = shapes.len(), "two-level top tree updated");
        Ok(())
    }

    fn run(&self, query: &Query<'_>, kind: QueryKind) -> Result<Event> {
        let Some(data) = &self.data else {
            return Err(Error::NotPreprocessed);
        };
        self.kernels.run(query, kind, 6, |f| {
            f.set_buffer(2, &data.nodes)?.set_buffer(3, &data.shapes)?;
            f.set_buffer(4, &data.vertices)?.set_buffer(5, &data.faces)?;
            Ok(())
        })
    }
}

impl Strategy for TwoLevel {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TwoLevel
    }

    #[tracing::instrument(skip_all, name = "two_level_process")]
    fn process(&mut self, world: &World) -> Result<()> {
        match self.data.take() {
            Some(data) if !world.has_changed() => {
                let result = self.update_top_level(world, &data);
                if result.is_ok() {
                    self.data = Some(data);
                }
                result
            }
            _ => self.rebuild(world),
        }
    }

    fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    fn intersect(&self, query: &Query<'_>) -> Result<Event> {
        self.run(query, QueryKind::Intersect)
    }

    fn occluded(&self, query: &Query<'_>) -> Result<Event> {
        self.run(query, QueryKind::Occlude)
    }

    fn gpu_data(&self, kind: GpuDataType) -> Option<&Buffer> {
        let data = self.data.as_ref()?;
        match kind {
            GpuDataType::Bvh => Some(&data.nodes),
            GpuDataType::Shapes => Some(&data.shapes),
            GpuDataType::Vertices => Some(&data.vertices),
            GpuDataType::Faces => Some(&data.faces),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix4, Point3, Vector3};

    fn triangle() -> Mesh {
        Mesh::from_triangles(
            &[Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            &[[0, 1, 2]],
        )
        .unwrap()
    }

    #[test]
    fn test_instances_share_bottom_tree() {
        let mut world = World::new();
        let mesh = world.create_mesh(triangle());
        let inst = world.create_instance(mesh).unwrap();
        let m = Matrix4::new_translation(&Vector3::new(3.0, 0.0, 0.0));
        world.shape_mut(inst).unwrap().set_transform(m, m.try_inverse().unwrap());
        world.attach(mesh).unwrap();
        world.attach(inst).unwrap();

        let entries = entries(&world).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].base, entries[1].base);

        let starts = HashMap::from([(mesh, 3)]);
        let (top, shapes) = top_level(&entries, &starts, &BuildParams::default());
        assert_eq!(top.len(), 3);
        assert!(shapes.iter().all(|s| s.bvh_start == 3));
        // World-to-object translation of the instance.
        assert_eq!(shapes[1].m0[3], -3.0);
        assert_eq!(shapes[1].id, 2);
    }
}
