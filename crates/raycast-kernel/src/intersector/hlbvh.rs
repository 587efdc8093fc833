use std::sync::Arc;

use raycast_calc::{Buffer, Device, Event};

use super::{upload, GpuDataType, Query, QueryKind, Strategy, StrategyKind, TraversalKernels};
use crate::error::{Error, Result};
use crate::hlbvh::HlbvhBuilder;
use crate::kernels;
use crate::scene::FlatScene;
use crate::world::World;

/// Largest ray batch one dispatch accepts.
pub(crate) const MAX_RAYS: usize = 2048 * 2048;

/// Queue the build and refit kernels run on.
const BUILD_QUEUE: u32 = 0;

struct SceneData {
    vertices: Buffer,
    faces: Buffer,
    num_faces: usize,
}

/// Stack walk over a tree built on the device. Transform-only changes
/// rewrite the geometry in place and refit without rebuilding.
pub(crate) struct Hlbvh {
    kernels: TraversalKernels,
    builder: HlbvhBuilder,
    data: Option<SceneData>,
}

impl Hlbvh {
    pub(crate) fn new(device: Arc<dyn Device>) -> Result<Self> {
        Ok(Self {
            kernels: TraversalKernels::traversal(device.clone(), &kernels::hlbvh_program())?,
            builder: HlbvhBuilder::new(device)?,
            data: None,
        })
    }

    fn rebuild(&mut self, scene: &FlatScene) -> Result<()> {
        let device = self.kernels.device();
        let data = SceneData {
            vertices: upload(device, &scene.vertices)?,
            faces: upload(device, &scene.faces)?,
            num_faces: scene.len(),
        };
        self.builder
            .build(BUILD_QUEUE, &data.faces, &data.vertices, data.num_faces)?
            .wait()?;
        self.data = Some(data);
        Ok(())
    }

    fn refit(&mut self, scene: &FlatScene, data: &SceneData) -> Result<()> {
        let device = self.kernels.device();
        device.write_slice(&data.vertices, BUILD_QUEUE, 0, &scene.vertices)?;
        device.write_slice(&data.faces, BUILD_QUEUE, 0, &scene.faces)?;
        self.builder
            .refit(BUILD_QUEUE, &data.faces, &data.vertices, data.num_faces)?
            .wait()?;
        Ok(())
    }

    fn run(&self, query: &Query<'_>, kind: QueryKind) -> Result<Event> {
        let Some(data) = &self.data else {
            return Err(Error::NotPreprocessed);
        };
        if query.max_rays > MAX_RAYS {
            return Err(Error::CapacityExceeded {
                what: "hlbvh ray batch",
                requested: query.max_rays,
                limit: MAX_RAYS,
            });
        }
        let (Some(nodes), Some(bounds)) = (self.builder.nodes(), self.builder.bounds()) else {
            return Err(Error::NotPreprocessed);
        };
        self.kernels.run(query, kind, 6, |f| {
            f.set_buffer(2, nodes)?.set_buffer(3, bounds)?;
            f.set_buffer(4, &data.vertices)?.set_buffer(5, &data.faces)?;
            Ok(())
        })
    }
}

impl Strategy for Hlbvh {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hlbvh
    }

    #[tracing::instrument(skip_all, name = "hlbvh_process")]
    fn process(&mut self, world: &World) -> Result<()> {
        let scene = FlatScene::build(world)?;
        match self.data.take() {
            Some(data) if !world.has_changed() && data.num_faces == scene.len() => {
                let result = self.refit(&scene, &data);
                if result.is_ok() {
                    self.data = Some(data);
                }
                tracing::debug!(faces = scene.len(), "hlbvh refit");
                result
            }
            _ if scene.is_empty() => Ok(()),
            _ => {
                self.rebuild(&scene)?;
                tracing::debug!(
                    faces = scene.len(),
                    capacity = self.builder.capacity(),
                    "hlbvh rebuilt"
                );
                Ok(())
            }
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
            GpuDataType::Bvh => self.builder.nodes(),
            GpuDataType::BvhBounds => self.builder.bounds(),
            GpuDataType::Vertices => Some(&data.vertices),
            GpuDataType::Faces => Some(&data.faces),
            _ => None,
        }
    }
}
