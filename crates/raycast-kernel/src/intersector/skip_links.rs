use std::sync::Arc;

use raycast_calc::{Buffer, Device, Event};

use super::{upload, GpuDataType, Query, QueryKind, Strategy, StrategyKind, TraversalKernels};
use crate::bvh::{self, BuildParams, Bvh};
use crate::error::{Error, Result};
use crate::kernels;
use crate::scene::FlatScene;
use crate::world::World;

struct SceneData {
    nodes: Buffer,
    vertices: Buffer,
    faces: Buffer,
}

/// Single flat tree over every face in world space.
pub(crate) struct SkipLinks {
    kernels: TraversalKernels,
    params: BuildParams,
    data: Option<SceneData>,
}

impl SkipLinks {
    pub(crate) fn new(device: Arc<dyn Device>, params: BuildParams) -> Result<Self> {
        Ok(Self {
            kernels: TraversalKernels::traversal(device, &kernels::skip_links_program())?,
            params,
            data: None,
        })
    }

    fn run(&self, query: &Query<'_>, kind: QueryKind) -> Result<Event> {
        let Some(data) = &self.data else {
            return Err(Error::NotPreprocessed);
        };
        self.kernels.run(query, kind, 5, |f| {
            f.set_buffer(2, &data.nodes)?.set_buffer(3, &data.vertices)?;
            f.set_buffer(4, &data.faces)?;
            Ok(())
        })
    }
}

impl Strategy for SkipLinks {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SkipLinks
    }

    #[tracing::instrument(skip_all, name = "skip_links_process")]
    fn process(&mut self, world: &World) -> Result<()> {
        self.data = None;
        let scene = FlatScene::build(world)?;
        if scene.is_empty() {
            return Ok(());
        }
        let tree = Bvh::build(&scene.face_bounds(), &self.params);
        let nodes = bvh::skip_links(&tree, 0, |prim| prim as i32);
        let device = self.kernels.device();
        self.data = Some(SceneData {
            nodes: upload(device, &nodes)?,
            vertices: upload(device, &scene.vertices)?,
            faces: upload(device, &scene.faces)?,
        });
        tracing::debug!(faces = scene.len(), nodes = nodes.len(), "skip-links ready");
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
            _ => None,
        }
    }
}
