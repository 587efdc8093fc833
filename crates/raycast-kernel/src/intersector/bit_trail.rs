use std::sync::Arc;

use raycast_calc::{Buffer, Device, Event};

use super::{upload, GpuDataType, Query, QueryKind, Strategy, StrategyKind, TraversalKernels};
use crate::bvh::{self, BuildParams, Bvh, PerfectHashMap};
use crate::error::{Error, Result};
use crate::kernels;
use crate::scene::FlatScene;
use crate::world::World;

struct SceneData {
    nodes: Buffer,
    vertices: Buffer,
    faces: Buffer,
    hash_table: Buffer,
    hash_width: u32,
}

/// Stackless fat-node walk. The path taken is kept as a bit trail and
/// backtracking recovers node addresses from complete-tree indices
/// through a perfect hash.
pub(crate) struct BitTrail {
    kernels: TraversalKernels,
    params: BuildParams,
    data: Option<SceneData>,
}

impl BitTrail {
    pub(crate) fn new(device: Arc<dyn Device>, params: BuildParams) -> Result<Self> {
        Ok(Self {
            kernels: TraversalKernels::traversal(device, &kernels::bit_trail_program())?,
            params,
            data: None,
        })
    }

    fn run(&self, query: &Query<'_>, kind: QueryKind) -> Result<Event> {
        let Some(data) = &self.data else {
            return Err(Error::NotPreprocessed);
        };
        self.kernels.run(query, kind, 6, |f| {
            f.set_buffer(2, &data.nodes)?.set_buffer(3, &data.vertices)?;
            f.set_buffer(4, &data.faces)?.set_buffer(5, &data.hash_table)?;
            f.set_u32(7, data.hash_width)?;
            Ok(())
        })
    }
}

impl Strategy for BitTrail {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BitTrail
    }

    #[tracing::instrument(skip_all, name = "bit_trail_process")]
    fn process(&mut self, world: &World) -> Result<()> {
        self.data = None;
        let scene = FlatScene::build(world)?;
        if scene.is_empty() {
            return Ok(());
        }
        let tree = Bvh::build(&scene.face_bounds(), &self.params);
        let indices = bvh::complete_tree_indices(&tree)?;
        let addresses: Vec<i32> = (0..indices.len() as i32).collect();
        let map = PerfectHashMap::new(&indices, &addresses);
        let nodes = bvh::fat_nodes(&tree, |prim| prim as i32);
        let device = self.kernels.device();
        self.data = Some(SceneData {
            nodes: upload(device, &nodes)?,
            vertices: upload(device, &scene.vertices)?,
            faces: upload(device, &scene.faces)?,
            hash_table: upload(device, &map.to_device_layout())?,
            hash_width: map.width(),
        });
        tracing::debug!(
            faces = scene.len(),
            hash_width = map.width(),
            table = map.table().len(),
            "bit-trail ready"
        );
        Ok(())
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
            GpuDataType::Vertices => Some(&data.vertices),
            GpuDataType::Faces => Some(&data.faces),
            GpuDataType::HashTable => Some(&data.hash_table),
            _ => None,
        }
    }
}
