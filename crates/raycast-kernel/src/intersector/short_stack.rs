use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use raycast_calc::{Buffer, BufferType, Device, Event};

use super::{upload, GpuDataType, Query, QueryKind, Strategy, StrategyKind, TraversalKernels};
use crate::bvh::{self, BuildParams, Bvh};
use crate::error::{Error, Result};
use crate::kernels::{self, GLOBAL_STACK_SIZE, SHORT_STACK_SIZE};
use crate::scene::FlatScene;
use crate::world::World;

/// Deepest tree whose far children fit in the local and global stacks.
pub(crate) const MAX_DEPTH: usize = SHORT_STACK_SIZE + GLOBAL_STACK_SIZE;

struct SceneData {
    nodes: Buffer,
    vertices: Buffer,
    faces: Buffer,
}

/// Fat-node walk pushing far children on a short local stack that spills
/// into a per-ray slice of a global buffer.
pub(crate) struct ShortStack {
    kernels: TraversalKernels,
    params: BuildParams,
    data: Option<SceneData>,
    /// Overflow stacks per queue, with the ray count each was sized for.
    stacks: Mutex<HashMap<u32, (usize, Buffer)>>,
}

impl ShortStack {
    pub(crate) fn new(device: Arc<dyn Device>, params: BuildParams) -> Result<Self> {
        Ok(Self {
            kernels: TraversalKernels::traversal(device, &kernels::short_stack_program())?,
            params,
            data: None,
            stacks: Mutex::new(HashMap::new()),
        })
    }

    fn run(&self, query: &Query<'_>, kind: QueryKind) -> Result<Event> {
        let Some(data) = &self.data else {
            return Err(Error::NotPreprocessed);
        };
        let mut stacks = self.stacks.lock();
        let grow = stacks
            .get(&query.queue)
            .map_or(true, |(capacity, _)| *capacity < query.max_rays);
        if grow {
            let words = query.max_rays.saturating_mul(GLOBAL_STACK_SIZE);
            let buffer = self
                .kernels
                .device()
                .create_typed_buffer::<i32>(BufferType::ReadWrite, words.max(1))?;
            tracing::trace!(queue = query.queue, rays = query.max_rays, "grew global stack");
            stacks.insert(query.queue, (query.max_rays, buffer));
        }
        let Some((_, stack)) = stacks.get(&query.queue) else {
            return Err(Error::NotPreprocessed);
        };
        self.kernels.run(query, kind, 6, |f| {
            f.set_buffer(2, &data.nodes)?.set_buffer(3, &data.vertices)?;
            f.set_buffer(4, &data.faces)?.set_buffer(5, stack)?;
            Ok(())
        })
    }
}

impl Strategy for ShortStack {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ShortStack
    }

    #[tracing::instrument(skip_all, name = "short_stack_process")]
    fn process(&mut self, world: &World) -> Result<()> {
        self.data = None;
        let scene = FlatScene::build(world)?;
        if scene.is_empty() {
            return Ok(());
        }
        let tree = Bvh::build(&scene.face_bounds(), &self.params);
        let depth = tree.depth();
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded {
                strategy: StrategyKind::ShortStack.name(),
                depth,
                limit: MAX_DEPTH,
            });
        }
        let nodes = bvh::fat_nodes(&tree, |prim| prim as i32);
        let device = self.kernels.device();
        self.data = Some(SceneData {
            nodes: upload(device, &nodes)?,
            vertices: upload(device, &scene.vertices)?,
            faces: upload(device, &scene.faces)?,
        });
        tracing::debug!(faces = scene.len(), depth, "short-stack ready");
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
