//! One traversal strategy bound to one compute device.
//!
//! [`IntersectionDevice`] picks a strategy for the current world and
//! options, decides between a full rebuild and an incremental update on
//! each preprocess, and hands out completion events by key.

use std::sync::Arc;

use parking_lot::Mutex;
use raycast_calc::{Buffer, CalcError, Device, Event};
use slotmap::{new_key_type, SlotMap};

use crate::bvh::BuildParams;
use crate::error::{Error, Result};
use crate::intersector::{GpuDataType, Intersector, Query, StrategyKind};
use crate::options::Options;
use crate::shape::StateChange;
use crate::world::World;

new_key_type! {
    /// Handle to a completion event held by an [`IntersectionDevice`].
    pub struct EventKey;
}

/// Strategy the policy picks for `world` under `options`.
///
/// `bvh.force2level` wins, then instances select two-level unless
/// `bvh.forceflat` is set, then `acc.type` chooses a flat layout.
pub fn select_strategy(world: &World, options: &Options) -> StrategyKind {
    if options.force_2level() {
        return StrategyKind::TwoLevel;
    }
    if !options.force_flat() && world.has_instances() {
        return StrategyKind::TwoLevel;
    }
    match options.acc_type() {
        "bvh" => StrategyKind::SkipLinks,
        "fatbvh" | "shortstack" => StrategyKind::ShortStack,
        "hashbvh" | "bittrail" => StrategyKind::BitTrail,
        "hlbvh" => StrategyKind::Hlbvh,
        other => {
            tracing::warn!(acc_type = other, "unknown acceleration structure, using bvh");
            StrategyKind::SkipLinks
        }
    }
}

/// Owns the intersector of one device and the events of its queries.
pub struct IntersectionDevice {
    device: Arc<dyn Device>,
    options: Options,
    intersector: Option<Intersector>,
    params: BuildParams,
    events: Mutex<SlotMap<EventKey, Event>>,
}

impl IntersectionDevice {
    /// Wrap `device`. Nothing is compiled until the first preprocess.
    pub fn new(device: Arc<dyn Device>) -> Self {
        let options = Options::default();
        Self {
            device,
            params: BuildParams::from(&options),
            options,
            intersector: None,
            events: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Compute device the queries run on.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Current options. Changes apply at the next preprocess.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Set a string option.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.options.set_string(name, value)
    }

    /// Set a numeric option.
    pub fn set_option_float(&mut self, name: &str, value: f32) -> Result<()> {
        self.options.set_float(name, value)
    }

    /// Replace every option.
    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    /// Strategy built by the last preprocess.
    pub fn strategy(&self) -> Option<StrategyKind> {
        self.intersector.as_ref().map(Intersector::kind)
    }

    /// Bring the device data up to date with `world` and commit it.
    ///
    /// Blocks until every build kernel has finished. Must not run while
    /// queries against the previous data are in flight. On failure the
    /// world keeps its change flags so the next call retries in full.
    #[tracing::instrument(skip_all, fields(shapes = world.num_attached()))]
    pub fn preprocess(&mut self, world: &mut World) -> Result<()> {
        let kind = select_strategy(world, &self.options);
        let params = BuildParams::from(&self.options);

        let stale = match &self.intersector {
            Some(intersector) => intersector.kind() != kind || self.params != params,
            None => true,
        };
        if stale {
            tracing::info!(strategy = %kind, "creating intersector");
            // Drop the old strategy's buffers before building the new one.
            self.intersector = None;
            self.intersector = Some(Intersector::new(kind, self.device.clone(), params)?);
            self.params = params;
        }
        let Some(intersector) = self.intersector.as_mut() else {
            return Err(Error::NotPreprocessed);
        };

        let changes = world.state_change();
        if stale || world.has_changed() || !intersector.is_processed() {
            tracing::debug!(strategy = %kind, "full rebuild");
            intersector.process(world)?;
        } else if changes != StateChange::NONE {
            tracing::debug!(strategy = %kind, ?changes, "state update");
            intersector.process(world)?;
        } else {
            tracing::trace!("world unchanged");
        }
        world.on_commit();
        Ok(())
    }

    fn intersector(&self) -> Result<&Intersector> {
        self.intersector.as_ref().ok_or(Error::NotPreprocessed)
    }

    fn dependencies(&self, wait: Option<EventKey>) -> Result<Vec<Event>> {
        match wait {
            None => Ok(Vec::new()),
            Some(key) => Ok(vec![self.event(key).ok_or_else(unknown_event)?]),
        }
    }

    /// Block on `event` or store it, depending on `want_event`.
    fn complete(&self, event: Event, want_event: bool) -> Result<Option<EventKey>> {
        if want_event {
            Ok(Some(self.events.lock().insert(event)))
        } else {
            event.wait()?;
            Ok(None)
        }
    }

    /// Closest hit for the first `num_rays` rays of `rays`.
    ///
    /// Starts after `wait` completes. Returns an event key when
    /// `want_event` is set; otherwise blocks until the hits are written.
    pub fn query_intersection(
        &self,
        queue: u32,
        rays: &Buffer,
        num_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        let deps = self.dependencies(wait)?;
        let event = self.intersector()?.intersect(queue, rays, num_rays, hits, &deps)?;
        self.complete(event, want_event)
    }

    /// Any hit for the first `num_rays` rays: 1 on a hit, -1 otherwise.
    pub fn query_occlusion(
        &self,
        queue: u32,
        rays: &Buffer,
        num_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        let deps = self.dependencies(wait)?;
        let event = self.intersector()?.occluded(queue, rays, num_rays, hits, &deps)?;
        self.complete(event, want_event)
    }

    /// Closest hit with the ray count read from `num_rays` on the device.
    /// `max_rays` bounds the count and sizes the dispatch.
    #[allow(clippy::too_many_arguments)]
    pub fn query_intersection_indirect(
        &self,
        queue: u32,
        rays: &Buffer,
        num_rays: &Buffer,
        max_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        let deps = self.dependencies(wait)?;
        let query = Query {
            queue,
            rays,
            num_rays,
            max_rays,
            hits,
            deps: &deps,
        };
        let event = self.intersector()?.intersect_indirect(&query)?;
        self.complete(event, want_event)
    }

    /// Any hit with the ray count read from `num_rays` on the device.
    #[allow(clippy::too_many_arguments)]
    pub fn query_occlusion_indirect(
        &self,
        queue: u32,
        rays: &Buffer,
        num_rays: &Buffer,
        max_rays: usize,
        hits: &Buffer,
        wait: Option<EventKey>,
        want_event: bool,
    ) -> Result<Option<EventKey>> {
        let deps = self.dependencies(wait)?;
        let query = Query {
            queue,
            rays,
            num_rays,
            max_rays,
            hits,
            deps: &deps,
        };
        let event = self.intersector()?.occluded_indirect(&query)?;
        self.complete(event, want_event)
    }

    /// Keep `event` until deleted and return its key.
    pub fn insert_event(&self, event: Event) -> EventKey {
        self.events.lock().insert(event)
    }

    /// The event behind `key`.
    pub fn event(&self, key: EventKey) -> Option<Event> {
        self.events.lock().get(key).cloned()
    }

    /// Block until the event behind `key` completes.
    pub fn wait_event(&self, key: EventKey) -> Result<()> {
        let event = self.event(key).ok_or_else(unknown_event)?;
        Ok(event.wait()?)
    }

    /// Release `key`. Its slot is reused by later queries.
    pub fn delete_event(&self, key: EventKey) -> Result<()> {
        self.events.lock().remove(key).map(|_| ()).ok_or_else(unknown_event)
    }

    /// Number of events not yet deleted.
    pub fn num_events(&self) -> usize {
        self.events.lock().len()
    }

    /// A device buffer of the current strategy.
    pub fn gpu_data(&self, kind: GpuDataType) -> Option<&Buffer> {
        self.intersector.as_ref()?.gpu_data(kind)
    }
}

fn unknown_event() -> Error {
    Error::Calc(CalcError::Logic("unknown event".into()))
}

impl std::fmt::Debug for IntersectionDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntersectionDevice")
            .field("device", &self.device.info().name)
            .field("strategy", &self.strategy())
            .field("events", &self.num_events())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ACC_TYPE, FORCE_2LEVEL, FORCE_FLAT};
    use crate::shape::Mesh;
    use nalgebra::Point3;

    fn world(instanced: bool) -> World {
        let mut world = World::new();
        let mesh = Mesh::from_triangles(
            &[Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            &[[0, 1, 2]],
        )
        .unwrap();
        let key = world.create_mesh(mesh);
        world.attach(key).unwrap();
        if instanced {
            let inst = world.create_instance(key).unwrap();
            world.attach(inst).unwrap();
        }
        world
    }

    #[test]
    fn test_default_policy_is_skip_links() {
        assert_eq!(select_strategy(&world(false), &Options::default()), StrategyKind::SkipLinks);
    }

    #[test]
    fn test_acc_type_selects_flat_layout() {
        let mut options = Options::default();
        for (name, kind) in [
            ("fatbvh", StrategyKind::ShortStack),
            ("shortstack", StrategyKind::ShortStack),
            ("hashbvh", StrategyKind::BitTrail),
            ("bittrail", StrategyKind::BitTrail),
            ("hlbvh", StrategyKind::Hlbvh),
            ("grid", StrategyKind::SkipLinks),
        ] {
            options.set_string(ACC_TYPE, name).unwrap();
            assert_eq!(select_strategy(&world(false), &options), kind, "{name}");
        }
    }

    #[test]
    fn test_instances_select_two_level_unless_forced_flat() {
        let mut options = Options::default();
        options.set_string(ACC_TYPE, "hlbvh").unwrap();
        assert_eq!(select_strategy(&world(true), &options), StrategyKind::TwoLevel);
        options.set_float(FORCE_FLAT, 1.0).unwrap();
        assert_eq!(select_strategy(&world(true), &options), StrategyKind::Hlbvh);
    }

    #[test]
    fn test_force_2level_wins() {
        let mut options = Options::default();
        options.set_float(FORCE_2LEVEL, 1.0).unwrap();
        options.set_float(FORCE_FLAT, 1.0).unwrap();
        assert_eq!(select_strategy(&world(false), &options), StrategyKind::TwoLevel);
    }
}
