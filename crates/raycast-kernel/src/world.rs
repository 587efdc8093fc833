//! The set of shapes a query runs against.

use slotmap::SlotMap;

use crate::error::{Error, Result};
use crate::shape::{Mesh, Shape, ShapeKey, ShapeKind, StateChange};

/// Owns every shape and tracks which are attached.
///
/// Attaching or detaching marks the world changed, which forces a full
/// rebuild on the next preprocess. Editing an attached shape only raises
/// its [`StateChange`] bits, which strategies may handle incrementally.
#[derive(Debug)]
pub struct World {
    shapes: SlotMap<ShapeKey, Shape>,
    attached: Vec<ShapeKey>,
    has_changed: bool,
    next_id: i32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// An empty world. Shape ids start at 1.
    pub fn new() -> Self {
        Self {
            shapes: SlotMap::with_key(),
            attached: Vec::new(),
            has_changed: true,
            next_id: 1,
        }
    }

    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add a mesh. It is not attached.
    pub fn create_mesh(&mut self, mesh: Mesh) -> ShapeKey {
        let id = self.take_id();
        self.shapes.insert(Shape::new(id, ShapeKind::Mesh(mesh)))
    }

    /// Add an instance of the mesh `base`. It is not attached.
    pub fn create_instance(&mut self, base: ShapeKey) -> Result<ShapeKey> {
        match self.shapes.get(base) {
            Some(shape) if !shape.is_instance() => {}
            Some(_) => return Err(Error::InvalidMesh("instances must reference a mesh".into())),
            None => return Err(Error::UnknownShape),
        }
        let id = self.take_id();
        Ok(self.shapes.insert(Shape::new(id, ShapeKind::Instance { base })))
    }

    /// Remove a shape, detaching it first.
    pub fn delete_shape(&mut self, key: ShapeKey) -> Result<()> {
        self.shapes.remove(key).ok_or(Error::UnknownShape)?;
        if let Some(pos) = self.attached.iter().position(|&k| k == key) {
            self.attached.remove(pos);
            self.has_changed = true;
        }
        Ok(())
    }

    /// Make a shape visible to queries. Attaching twice is a no-op.
    pub fn attach(&mut self, key: ShapeKey) -> Result<()> {
        if !self.shapes.contains_key(key) {
            return Err(Error::UnknownShape);
        }
        if !self.attached.contains(&key) {
            self.attached.push(key);
            self.has_changed = true;
        }
        Ok(())
    }

    /// Hide a shape from queries.
    pub fn detach(&mut self, key: ShapeKey) -> Result<()> {
        if !self.shapes.contains_key(key) {
            return Err(Error::UnknownShape);
        }
        if let Some(pos) = self.attached.iter().position(|&k| k == key) {
            self.attached.remove(pos);
            self.has_changed = true;
        }
        Ok(())
    }

    /// Detach every shape.
    pub fn detach_all(&mut self) {
        if !self.attached.is_empty() {
            self.attached.clear();
            self.has_changed = true;
        }
    }

    /// Shape behind `key`.
    pub fn shape(&self, key: ShapeKey) -> Result<&Shape> {
        self.shapes.get(key).ok_or(Error::UnknownShape)
    }

    /// Mutable shape behind `key`.
    pub fn shape_mut(&mut self, key: ShapeKey) -> Result<&mut Shape> {
        self.shapes.get_mut(key).ok_or(Error::UnknownShape)
    }

    /// Geometry of `shape`, following instances to their base mesh.
    pub fn mesh_of<'a>(&'a self, shape: &'a Shape) -> Result<&'a Mesh> {
        match shape.kind() {
            ShapeKind::Mesh(mesh) => Ok(mesh),
            ShapeKind::Instance { base } => self.shape(*base)?.as_mesh().ok_or(Error::UnknownShape),
        }
    }

    /// Attached shapes in attachment order.
    pub fn attached(&self) -> impl Iterator<Item = (ShapeKey, &Shape)> + '_ {
        self.attached
            .iter()
            .filter_map(move |&key| self.shapes.get(key).map(|shape| (key, shape)))
    }

    /// Number of attached shapes.
    pub fn num_attached(&self) -> usize {
        self.attached.len()
    }

    /// True if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// True if shapes were attached or detached since the last commit.
    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    /// Union of the state changes of attached shapes.
    pub fn state_change(&self) -> StateChange {
        self.attached()
            .fold(StateChange::NONE, |acc, (_, shape)| acc | shape.state_change())
    }

    /// Clear the changed flag and every shape's state bits.
    pub fn on_commit(&mut self) {
        self.has_changed = false;
        for shape in self.shapes.values_mut() {
            shape.clear_state_change();
        }
    }

    /// Restart automatic ids at 1.
    pub fn reset_id_counter(&mut self) {
        self.next_id = 1;
    }

    /// True if any attached shape is an instance.
    pub fn has_instances(&self) -> bool {
        self.attached().any(|(_, shape)| shape.is_instance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix4, Point3};

    fn triangle() -> Mesh {
        Mesh::from_triangles(
            &[Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            &[[0, 1, 2]],
        )
        .unwrap()
    }

    #[test]
    fn test_ids_start_at_one() {
        let mut world = World::new();
        let a = world.create_mesh(triangle());
        let b = world.create_instance(a).unwrap();
        assert_eq!(world.shape(a).unwrap().id(), 1);
        assert_eq!(world.shape(b).unwrap().id(), 2);
        world.reset_id_counter();
        let c = world.create_mesh(triangle());
        assert_eq!(world.shape(c).unwrap().id(), 1);
    }

    #[test]
    fn test_dirty_flags() {
        let mut world = World::new();
        let a = world.create_mesh(triangle());
        world.on_commit();
        assert!(!world.has_changed());

        world.attach(a).unwrap();
        assert!(world.has_changed());
        world.on_commit();
        world.attach(a).unwrap();
        assert!(!world.has_changed(), "attaching twice is a no-op");

        world.shape_mut(a).unwrap().set_transform(Matrix4::identity(), Matrix4::identity());
        assert!(!world.has_changed());
        assert_eq!(world.state_change(), StateChange::TRANSFORM);
        world.on_commit();
        assert_eq!(world.state_change(), StateChange::NONE);

        world.detach_all();
        assert!(world.has_changed());
        assert!(world.is_empty());
    }

    #[test]
    fn test_detached_shape_changes_are_ignored() {
        let mut world = World::new();
        let a = world.create_mesh(triangle());
        world.on_commit();
        world.shape_mut(a).unwrap().set_mask(2);
        assert_eq!(world.state_change(), StateChange::NONE);
    }

    #[test]
    fn test_instances() {
        let mut world = World::new();
        let a = world.create_mesh(triangle());
        let b = world.create_instance(a).unwrap();
        assert!(matches!(world.create_instance(b), Err(Error::InvalidMesh(_))));
        world.attach(b).unwrap();
        assert!(world.has_instances());
        let inst = world.shape(b).unwrap();
        assert_eq!(world.mesh_of(inst).unwrap().triangles().len(), 1);

        world.delete_shape(a).unwrap();
        let inst = world.shape(b).unwrap();
        assert!(matches!(world.mesh_of(inst), Err(Error::UnknownShape)));
        world.delete_shape(b).unwrap();
        assert!(world.is_empty());
        assert!(matches!(world.attach(b), Err(Error::UnknownShape)));
    }
}
