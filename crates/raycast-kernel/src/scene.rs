//! World geometry flattened into device arrays.

use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;

use crate::error::Result;
use crate::math::Bbox;
use crate::shape::Mesh;
use crate::world::World;

/// A triangle as seen by the traversal kernels. 24 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Face {
    /// Vertex indices into the vertex array.
    pub idx: [i32; 3],
    /// Mask of the owning shape.
    pub shape_mask: i32,
    /// Id of the owning shape.
    pub shape_id: i32,
    /// Index of the source face within its mesh.
    pub prim_id: i32,
}

/// Vertices and faces of every attached shape in world space.
///
/// Instances are expanded into copies of their base mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatScene {
    /// Vertices as `xyz1`.
    pub vertices: Vec<[f32; 4]>,
    /// Faces indexing `vertices`.
    pub faces: Vec<Face>,
}

impl FlatScene {
    /// Flatten the attached shapes of `world`.
    pub fn build(world: &World) -> Result<Self> {
        let mut scene = Self::default();
        for (_, shape) in world.attached() {
            let mesh = world.mesh_of(shape)?;
            scene.push_mesh(mesh, shape.transform(), shape.id(), shape.mask());
        }
        Ok(scene)
    }

    /// Append `mesh` under `transform`.
    pub fn push_mesh(
        &mut self,
        mesh: &Mesh,
        transform: &Matrix4<f32>,
        shape_id: i32,
        shape_mask: i32,
    ) {
        let base = self.vertices.len() as i32;
        self.vertices.extend(mesh.vertices().iter().map(|p| {
            let w = transform.transform_point(p);
            [w.x, w.y, w.z, 1.0]
        }));
        self.faces.extend(mesh.triangles().iter().map(|t| Face {
            idx: t.idx.map(|i| base + i as i32),
            shape_mask,
            shape_id,
            prim_id: t.prim_id as i32,
        }));
    }

    /// Number of faces.
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    /// True if there are no faces.
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Bound of every face.
    pub fn face_bounds(&self) -> Vec<Bbox> {
        self.faces
            .iter()
            .map(|f| {
                f.idx.iter().fold(Bbox::empty(), |b, &i| {
                    let v = self.vertices[i as usize];
                    b.grow(&nalgebra::Point3::new(v[0], v[1], v[2]))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3};

    #[test]
    fn test_instances_are_expanded_in_world_space() {
        let mut world = World::new();
        let mesh = Mesh::from_triangles(
            &[Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            &[[0, 1, 2]],
        )
        .unwrap();
        let a = world.create_mesh(mesh);
        let b = world.create_instance(a).unwrap();
        let m = Matrix4::new_translation(&Vector3::new(0.0, 0.0, 5.0));
        world.shape_mut(b).unwrap().set_transform(m, m.try_inverse().unwrap());
        world.attach(a).unwrap();
        world.attach(b).unwrap();

        let scene = FlatScene::build(&world).unwrap();
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.vertices.len(), 6);
        assert_eq!(scene.faces[1].idx, [3, 4, 5]);
        assert_eq!(scene.faces[1].shape_id, 2);
        assert_eq!(scene.vertices[3], [0.0, 0.0, 5.0, 1.0]);
        let bounds = scene.face_bounds();
        assert_eq!(bounds[1].min.z, 5.0);
    }
}
