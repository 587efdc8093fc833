//! The public intersection API: one world bound to one device.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use raycast_calc::{Buffer, BufferType, Calc, DeviceInfo, MapType, Mapping};
use raycast_kernel::{
    EventKey, GpuDataType, Intersection, IntersectionDevice, Mesh, Options, Ray, Shape, ShapeKey,
    StrategyKind, World,
};

use crate::config::RaycastConfig;
use crate::error::Result;

/// Queue every query of this API is issued on.
const QUEUE: u32 = 0;

/// Shapes, options and queries against one compute device.
///
/// Shape edits take effect at the next [`commit`](Self::commit), which
/// rebuilds or updates the acceleration structure and blocks until it is
/// ready. Queries return an [`EventKey`] when asked to and block
/// otherwise.
#[derive(Debug)]
pub struct IntersectionApi {
    world: World,
    device: IntersectionDevice,
}

impl IntersectionApi {
    /// Number of devices `calc` enumerated.
    pub fn device_count(calc: &Calc) -> usize {
        calc.device_count()
    }

    /// Description of device `index`.
    pub fn device_info(calc: &Calc, index: usize) -> Result<DeviceInfo> {
        Ok(calc.device_info(index)?.clone())
    }

    /// Bind an empty world to device `index`.
    #[tracing::instrument(skip(calc))]
    pub fn create(calc: &Calc, index: usize) -> Result<Self> {
        let device = calc.create_device(index)?;
        tracing::info!(device = %device.info().name, "intersection api created");
        Ok(Self {
            world: World::new(),
            device: IntersectionDevice::new(device),
        })
    }

    /// Enumerate devices and create the configured one with its options.
    ///
    /// Returns the enumeration too, since it owns the device list.
    pub fn from_config(config: &RaycastConfig) -> Result<(Calc, Self)> {
        let calc = Calc::new(config.calc_config());
        let mut api = Self::create(&calc, config.device)?;
        api.device.set_options(config.options()?);
        Ok((calc, api))
    }

    /// Add a mesh from strided vertex and index arrays.
    ///
    /// Strides count elements; 0 means densely packed. With
    /// `face_vertex_counts` faces may be triangles or quads.
    pub fn create_mesh(
        &mut self,
        vertices: &[f32],
        vertex_stride: usize,
        indices: &[i32],
        index_stride: usize,
        face_vertex_counts: Option<&[i32]>,
    ) -> Result<ShapeKey> {
        let mesh = Mesh::from_raw(
            vertices,
            vertex_stride,
            indices,
            index_stride,
            face_vertex_counts,
        )?;
        Ok(self.add_mesh(mesh))
    }

    /// Add an already built mesh.
    pub fn add_mesh(&mut self, mesh: Mesh) -> ShapeKey {
        self.world.create_mesh(mesh)
    }

    /// Add an instance of the mesh `base`.
    pub fn create_instance(&mut self, base: ShapeKey) -> Result<ShapeKey> {
        Ok(self.world.create_instance(base)?)
    }

    /// Remove a shape, detaching it first.
    pub fn delete_shape(&mut self, shape: ShapeKey) -> Result<()> {
        Ok(self.world.delete_shape(shape)?)
    }

    /// Make a shape visible to queries after the next commit.
    pub fn attach_shape(&mut self, shape: ShapeKey) -> Result<()> {
        Ok(self.world.attach(shape)?)
    }

    /// Hide a shape from queries after the next commit.
    pub fn detach_shape(&mut self, shape: ShapeKey) -> Result<()> {
        Ok(self.world.detach(shape)?)
    }

    /// Detach every shape.
    pub fn detach_all(&mut self) {
        self.world.detach_all();
    }

    /// Bring the acceleration structure up to date with the world.
    pub fn commit(&mut self) -> Result<()> {
        Ok(self.device.preprocess(&mut self.world)?)
    }

    /// Restart automatic shape ids at 1.
    pub fn reset_id_counter(&mut self) {
        self.world.reset_id_counter();
    }

    /// True if no shape is attached.
    pub fn is_world_empty(&self) -> bool {
        self.world.is_empty()
    }

    /// Read access to a shape.
    pub fn shape(&self, shape: ShapeKey) -> Result<&Shape> {
        Ok(self.world.shape(shape)?)
    }

    /// Replace the transform of a shape. `inverse` must be its inverse.
    pub fn set_shape_transform(
        &mut self,
        shape: ShapeKey,
        transform: Matrix4<f32>,
        inverse: Matrix4<f32>,
    ) -> Result<()> {
        self.world.shape_mut(shape)?.set_transform(transform, inverse);
        Ok(())
    }

    /// Replace the id reported for hits on a shape.
    pub fn set_shape_id(&mut self, shape: ShapeKey, id: i32) -> Result<()> {
        self.world.shape_mut(shape)?.set_id(id);
        Ok(())
    }

    /// Replace the visibility mask of a shape.
    pub fn set_shape_mask(&mut self, shape: ShapeKey, mask: i32) -> Result<()> {
        self.world.shape_mut(shape)?.set_mask(mask);
        Ok(())
    }

    /// Replace the linear velocity of a shape.
    pub fn set_shape_linear_velocity(
        &mut self,
        shape: ShapeKey,
        velocity: Vector3<f32>,
    ) -> Result<()> {
        self.world.shape_mut(shape)?.set_linear_velocity(velocity);
        Ok(())
    }

    /// Replace the angular velocity of a shape.
    pub fn set_shape_angular_velocity(
        &mut self,
        shape: ShapeKey,
        velocity: UnitQuaternion<f32>,
    ) -> Result<()> {
        self.world.shape_mut(shape)?.set_angular_velocity(velocity);
        Ok(())
    }

    /// Allocate a device buffer, optionally filled from `init`.
    pub fn create_buffer(
        &self,
        size: usize,
        buffer_type: BufferType,
        init: Option<&[u8]>,
    ) -> Result<Buffer> {
        Ok(self.device.device().create_buffer(size, buffer_type, init)?)
    }

    /// Map `size` bytes at `offset` for host access.
    pub fn map_buffer(
        &self,
        buffer: &Buffer,
        map_type: MapType,
        offset: usize,
        size: usize,
    ) -> Result<Mapping> {
        let (mapping, event) =
            self.device.device().map_buffer(buffer, QUEUE, offset, size, map_type)?;
        event.wait()?;
        Ok(mapping)
    }

    /// Release a mapping. Write mappings are uploaded; with `want_event`
    /// the upload completes asynchronously.
    pub fn unmap_buffer(
        &self,
        buffer: &Buffer,
        mapping: Mapping,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        let event = self.device.device().unmap_buffer(buffer, QUEUE, mapping)?;
        if want_event {
            Ok(Some(self.device.insert_event(event)))
        } else {
            event.wait()?;
            Ok(None)
        }
    }

    /// Closest hit for the first `num_rays` rays of `rays`, written to `hits`.
    pub fn query_intersection(
        &self,
        rays: &Buffer,
        num_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        Ok(self
            .device
            .query_intersection(QUEUE, rays, num_rays, hits, wait, want_event)?)
    }

    /// Any hit for the first `num_rays` rays: 1 on a hit, -1 otherwise.
    pub fn query_occlusion(
        &self,
        rays: &Buffer,
        num_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        Ok(self
            .device
            .query_occlusion(QUEUE, rays, num_rays, hits, wait, want_event)?)
    }

    /// Closest hit with the ray count read from the device buffer `num_rays`.
    pub fn query_intersection_indirect(
        &self,
        rays: &Buffer,
        num_rays: &Buffer,
        max_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        Ok(self
            .device
            .query_intersection_indirect(QUEUE, rays, num_rays, max_rays, hits, wait, want_event)?)
    }

    /// Any hit with the ray count read from the device buffer `num_rays`.
    pub fn query_occlusion_indirect(
        &self,
        rays: &Buffer,
        num_rays: &Buffer,
        max_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        Ok(self
            .device
            .query_occlusion_indirect(QUEUE, rays, num_rays, max_rays, hits, wait, want_event)?)
    }

    /// Block until an event completes.
    pub fn wait_event(&self, event: EventKey) -> Result<()> {
        Ok(self.device.wait_event(event)?)
    }

    /// Whether an event has completed.
    pub fn is_event_complete(&self, event: EventKey) -> bool {
        self.device.event(event).map_or(true, |e| e.is_complete())
    }

    /// Release an event.
    pub fn delete_event(&self, event: EventKey) -> Result<()> {
        Ok(self.device.delete_event(event)?)
    }

    /// Closest hits for `rays`, blocking.
    pub fn intersect_rays(&self, rays: &[Ray]) -> Result<Vec<Intersection>> {
        if rays.is_empty() {
            return Ok(Vec::new());
        }
        let device = self.device.device();
        let ray_buffer = device.create_pod_buffer(BufferType::Read, rays)?;
        let hits = device.create_typed_buffer::<Intersection>(BufferType::Write, rays.len())?;
        self.query_intersection(&ray_buffer, rays.len(), &hits, None, false)?;
        Ok(device.read_vec(&hits, QUEUE, 0, rays.len())?)
    }

    /// Occlusion for `rays`, blocking: 1 on a hit, -1 otherwise.
    pub fn occlude_rays(&self, rays: &[Ray]) -> Result<Vec<i32>> {
        if rays.is_empty() {
            return Ok(Vec::new());
        }
        let device = self.device.device();
        let ray_buffer = device.create_pod_buffer(BufferType::Read, rays)?;
        let hits = device.create_typed_buffer::<i32>(BufferType::Write, rays.len())?;
        self.query_occlusion(&ray_buffer, rays.len(), &hits, None, false)?;
        Ok(device.read_vec(&hits, QUEUE, 0, rays.len())?)
    }

    /// Set a string option. Applies at the next commit.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        Ok(self.device.set_option(name, value)?)
    }

    /// Set a numeric option. Applies at the next commit.
    pub fn set_option_float(&mut self, name: &str, value: f32) -> Result<()> {
        Ok(self.device.set_option_float(name, value)?)
    }

    /// Current options.
    pub fn options(&self) -> &Options {
        self.device.options()
    }

    /// Strategy chosen at the last commit.
    pub fn strategy(&self) -> Option<StrategyKind> {
        self.device.strategy()
    }

    /// A device buffer of the current acceleration structure.
    pub fn gpu_data(&self, kind: GpuDataType) -> Option<&Buffer> {
        self.device.gpu_data(kind)
    }
}
