//! Traversal strategies and the query front end shared by all of them.
//!
//! A strategy turns a [`World`] into device data in
//! [`process`](Strategy::process) and answers batched queries against
//! it. [`Intersector`] wraps one strategy with the checks and plumbing
//! every strategy needs: host ray counts, empty worlds and queries
//! issued before preprocessing.

mod bit_trail;
mod hlbvh;
mod short_stack;
mod skip_links;
mod two_level;

pub use two_level::GpuShape;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use raycast_calc::{
    Buffer, BufferType, CalcError, Device, Event, Executable, Function, ProgramSource,
};

use crate::bvh::BuildParams;
use crate::error::{Error, Result};
use crate::kernels::{self, WG_SIZE};
use crate::ray::{Intersection, Ray};
use crate::world::World;

/// Device buffers a strategy can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuDataType {
    /// Node array of the acceleration structure.
    Bvh,
    /// Node bounds, for layouts that keep them apart from the nodes.
    BvhBounds,
    /// Vertex array, `xyzw` per vertex.
    Vertices,
    /// Face records.
    Faces,
    /// Per-shape transform table of the two-level layout.
    Shapes,
    /// Perfect hash of the bit-trail layout.
    HashTable,
}

/// Traversal algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Stackless walk over a preorder tree with miss links.
    SkipLinks,
    /// Skip-link top tree over shapes with per-mesh bottom trees.
    TwoLevel,
    /// Fat-node walk with a local stack spilling to global memory.
    ShortStack,
    /// Stackless fat-node walk backtracking through a perfect hash.
    BitTrail,
    /// Stack walk over a tree built on the device.
    Hlbvh,
}

impl StrategyKind {
    /// Short name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::SkipLinks => "skip-links",
            StrategyKind::TwoLevel => "two-level",
            StrategyKind::ShortStack => "short-stack",
            StrategyKind::BitTrail => "bit-trail",
            StrategyKind::Hlbvh => "hlbvh",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One batched query.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    /// Queue to run on.
    pub queue: u32,
    /// Ray array, at least `max_rays` long.
    pub rays: &'a Buffer,
    /// One `i32` holding the number of rays to trace.
    pub num_rays: &'a Buffer,
    /// Upper bound on the ray count; sizes the dispatch.
    pub max_rays: usize,
    /// Output array, at least `max_rays` long.
    pub hits: &'a Buffer,
    /// Events to wait for before starting.
    pub deps: &'a [Event],
}

/// Closest-hit or any-hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryKind {
    Intersect,
    Occlude,
}

impl QueryKind {
    fn output_size(self) -> usize {
        match self {
            QueryKind::Intersect => std::mem::size_of::<Intersection>(),
            QueryKind::Occlude => std::mem::size_of::<i32>(),
        }
    }
}

/// A traversal algorithm bound to one device.
pub(crate) trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Build device data for `world`. Called on every commit that
    /// changed something; `world.has_changed()` tells a full rebuild
    /// from a state-only update.
    fn process(&mut self, world: &World) -> Result<()>;

    /// Whether the last `process` produced no faces.
    fn is_empty(&self) -> bool;

    fn intersect(&self, query: &Query<'_>) -> Result<Event>;

    fn occluded(&self, query: &Query<'_>) -> Result<Event>;

    fn gpu_data(&self, kind: GpuDataType) -> Option<&Buffer>;
}

/// Compiled intersect and occlude entry points of one program.
pub(crate) struct TraversalKernels {
    device: Arc<dyn Device>,
    executable: Executable,
    intersect: String,
    occlude: String,
}

impl TraversalKernels {
    pub(crate) fn new(
        device: Arc<dyn Device>,
        program: &ProgramSource,
        intersect: String,
        occlude: String,
    ) -> Result<Self> {
        let executable = device.compile_executable(program, &kernels::build_options())?;
        Ok(Self {
            device,
            executable,
            intersect,
            occlude,
        })
    }

    fn traversal(device: Arc<dyn Device>, program: &ProgramSource) -> Result<Self> {
        let (intersect, occlude) = kernels::entry_names(&program.name);
        Self::new(device, program, intersect, occlude)
    }

    pub(crate) fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Bind the query, let `bind` fill the strategy arguments, and run.
    ///
    /// Rays bind at 0, the count at 1 and the output at `output`.
    pub(crate) fn run(
        &self,
        query: &Query<'_>,
        kind: QueryKind,
        output: usize,
        bind: impl FnOnce(&mut Function) -> raycast_calc::Result<()>,
    ) -> Result<Event> {
        check_query(query, kind)?;
        if query.max_rays == 0 {
            return Ok(Event::complete());
        }
        let name = match kind {
            QueryKind::Intersect => &self.intersect,
            QueryKind::Occlude => &self.occlude,
        };
        let mut function = self.executable.create_function(name)?;
        function.set_buffer(0, query.rays)?.set_buffer(1, query.num_rays)?;
        function.set_buffer(output, query.hits)?;
        bind(&mut function)?;
        let global = query.max_rays.next_multiple_of(WG_SIZE);
        Ok(self
            .device
            .execute(&function, query.queue, global, WG_SIZE, query.deps)?)
    }
}

fn check_query(query: &Query<'_>, kind: QueryKind) -> Result<()> {
    let logic = |what: &str, have: usize| {
        Err(Error::Calc(CalcError::Logic(format!(
            "{what} holds {have} bytes, {} rays need more",
            query.max_rays
        ))))
    };
    if query.rays.size() < query.max_rays * std::mem::size_of::<Ray>() {
        return logic("ray buffer", query.rays.size());
    }
    if query.hits.size() < query.max_rays * kind.output_size() {
        return logic("output buffer", query.hits.size());
    }
    if query.num_rays.size() < std::mem::size_of::<i32>() {
        return logic("ray count buffer", query.num_rays.size());
    }
    Ok(())
}

/// Upload `data` as a read-only buffer.
pub(crate) fn upload<T: bytemuck::Pod>(device: &Arc<dyn Device>, data: &[T]) -> Result<Buffer> {
    Ok(device.create_pod_buffer(BufferType::Read, data)?)
}

/// Create the strategy `kind` for `device`.
pub(crate) fn create_strategy(
    kind: StrategyKind,
    device: Arc<dyn Device>,
    params: BuildParams,
) -> Result<Box<dyn Strategy>> {
    Ok(match kind {
        StrategyKind::SkipLinks => Box::new(skip_links::SkipLinks::new(device, params)?),
        StrategyKind::TwoLevel => Box::new(two_level::TwoLevel::new(device, params)?),
        StrategyKind::ShortStack => Box::new(short_stack::ShortStack::new(device, params)?),
        StrategyKind::BitTrail => Box::new(bit_trail::BitTrail::new(device, params)?),
        StrategyKind::Hlbvh => Box::new(hlbvh::Hlbvh::new(device)?),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Empty,
    Ready,
}

/// A strategy with query validation, host ray counts and empty-world
/// handling.
pub struct Intersector {
    strategy: Box<dyn Strategy>,
    empty: TraversalKernels,
    state: State,
    counters: Mutex<HashMap<u32, Buffer>>,
}

impl Intersector {
    /// Compile the kernels of `kind` for `device`.
    #[tracing::instrument(skip_all, fields(strategy = %kind))]
    pub fn new(kind: StrategyKind, device: Arc<dyn Device>, params: BuildParams) -> Result<Self> {
        let empty = TraversalKernels::new(
            device.clone(),
            &kernels::empty_program(),
            kernels::CLEAR_INTERSECTIONS.into(),
            kernels::CLEAR_OCCLUSIONS.into(),
        )?;
        Ok(Self {
            strategy: create_strategy(kind, device, params)?,
            empty,
            state: State::Uninitialized,
            counters: Mutex::new(HashMap::new()),
        })
    }

    /// Strategy in use.
    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Whether [`process`](Self::process) has run.
    pub fn is_processed(&self) -> bool {
        self.state != State::Uninitialized
    }

    /// Build device data for `world`.
    pub fn process(&mut self, world: &World) -> Result<()> {
        if world.is_empty() {
            tracing::debug!(strategy = %self.kind(), "empty world");
            self.state = State::Empty;
            return Ok(());
        }
        // A failed rebuild leaves nothing queryable.
        self.state = State::Uninitialized;
        self.strategy.process(world)?;
        self.state = if self.strategy.is_empty() { State::Empty } else { State::Ready };
        Ok(())
    }

    fn dispatch(&self, query: &Query<'_>, kind: QueryKind) -> Result<Event> {
        match self.state {
            State::Uninitialized => Err(Error::NotPreprocessed),
            State::Empty => self.empty.run(query, kind, 2, |_| Ok(())),
            State::Ready => match kind {
                QueryKind::Intersect => self.strategy.intersect(query),
                QueryKind::Occlude => self.strategy.occluded(query),
            },
        }
    }

    /// Closest hit for the first `num_rays` rays, count read from a
    /// device buffer.
    pub fn intersect_indirect(&self, query: &Query<'_>) -> Result<Event> {
        self.dispatch(query, QueryKind::Intersect)
    }

    /// Any hit for the rays of `query`, count read from a device buffer.
    pub fn occluded_indirect(&self, query: &Query<'_>) -> Result<Event> {
        self.dispatch(query, QueryKind::Occlude)
    }

    /// Closest hit for `num_rays` rays.
    pub fn intersect(
        &self,
        queue: u32,
        rays: &Buffer,
        num_rays: usize,
        hits: &Buffer,
        deps: &[Event],
    ) -> Result<Event> {
        self.with_count(queue, rays, num_rays, hits, deps, QueryKind::Intersect)
    }

    /// Any hit for `num_rays` rays: 1 on a hit, -1 otherwise.
    pub fn occluded(
        &self,
        queue: u32,
        rays: &Buffer,
        num_rays: usize,
        hits: &Buffer,
        deps: &[Event],
    ) -> Result<Event> {
        self.with_count(queue, rays, num_rays, hits, deps, QueryKind::Occlude)
    }

    fn with_count(
        &self,
        queue: u32,
        rays: &Buffer,
        num_rays: usize,
        hits: &Buffer,
        deps: &[Event],
        kind: QueryKind,
    ) -> Result<Event> {
        if self.state == State::Uninitialized {
            return Err(Error::NotPreprocessed);
        }
        let count = i32::try_from(num_rays).map_err(|_| Error::CapacityExceeded {
            what: "ray count",
            requested: num_rays,
            limit: i32::MAX as usize,
        })?;
        // Held across write and dispatch so the count a query reads is its own.
        let mut counters = self.counters.lock();
        let device = self.empty.device();
        let counter = match counters.entry(queue) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(device.create_typed_buffer::<i32>(BufferType::ReadWrite, 1)?)
            }
        };
        let written = device.write_slice(counter, queue, 0, &[count])?;
        let mut all: Vec<Event> = deps.to_vec();
        all.push(written);
        self.dispatch(
            &Query {
                queue,
                rays,
                num_rays: counter,
                max_rays: num_rays,
                hits,
                deps: &all,
            },
            kind,
        )
    }

    /// A device buffer of the current strategy.
    pub fn gpu_data(&self, kind: GpuDataType) -> Option<&Buffer> {
        match self.state {
            State::Ready => self.strategy.gpu_data(kind),
            _ => None,
        }
    }
}

impl fmt::Debug for Intersector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intersector")
            .field("kind", &self.kind())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Mesh;
    use nalgebra::{Point3, Vector3};
    use raycast_calc::{Calc, CalcConfig};

    fn host_device() -> Arc<dyn Device> {
        let calc = Calc::new(CalcConfig {
            enable_gpu: false,
            ..Default::default()
        });
        calc.create_device(0).unwrap()
    }

    fn one_triangle() -> World {
        let mut world = World::new();
        let points = [
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let mesh = Mesh::from_triangles(&points, &[[0, 1, 2]]).unwrap();
        let key = world.create_mesh(mesh);
        world.attach(key).unwrap();
        world
    }

    #[test]
    fn test_query_before_process_fails() {
        let device = host_device();
        let intersector =
            Intersector::new(StrategyKind::SkipLinks, device.clone(), BuildParams::default())
                .unwrap();
        let rays = device.create_typed_buffer::<Ray>(BufferType::Read, 1).unwrap();
        let hits = device.create_typed_buffer::<Intersection>(BufferType::ReadWrite, 1).unwrap();
        assert!(matches!(
            intersector.intersect(0, &rays, 1, &hits, &[]),
            Err(Error::NotPreprocessed)
        ));
        assert!(intersector.gpu_data(GpuDataType::Bvh).is_none());
    }

    #[test]
    fn test_short_output_buffer_is_a_logic_error() {
        let device = host_device();
        let mut intersector =
            Intersector::new(StrategyKind::SkipLinks, device.clone(), BuildParams::default())
                .unwrap();
        intersector.process(&one_triangle()).unwrap();
        let rays = device.create_typed_buffer::<Ray>(BufferType::Read, 4).unwrap();
        let hits = device.create_typed_buffer::<Intersection>(BufferType::ReadWrite, 2).unwrap();
        assert!(matches!(
            intersector.intersect(0, &rays, 4, &hits, &[]),
            Err(Error::Calc(CalcError::Logic(_)))
        ));
    }

    #[test]
    fn test_empty_world_misses() {
        let device = host_device();
        let mut intersector =
            Intersector::new(StrategyKind::Hlbvh, device.clone(), BuildParams::default()).unwrap();
        intersector.process(&World::new()).unwrap();
        let ray = Ray::new(Point3::origin(), Vector3::z(), 10.0);
        let rays = device.create_pod_buffer(BufferType::Read, &[ray, ray]).unwrap();
        let hits = device.create_pod_buffer(BufferType::ReadWrite, &[0i32, 0]).unwrap();
        intersector.occluded(0, &rays, 2, &hits, &[]).unwrap().wait().unwrap();
        assert_eq!(device.read_vec::<i32>(&hits, 0, 0, 2).unwrap(), vec![-1, -1]);
    }
}
