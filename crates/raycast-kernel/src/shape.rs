//! Triangle meshes and instances.

use bitflags::bitflags;
use nalgebra::{Matrix4, Point3, UnitQuaternion, Vector3};
use slotmap::new_key_type;

use crate::error::{Error, Result};
use crate::math::Bbox;

new_key_type! {
    /// Handle to a shape owned by a [`World`](crate::World).
    pub struct ShapeKey;
}

bitflags! {
    /// Which properties of a shape changed since the last commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateChange: u32 {
        /// Transform was replaced.
        const TRANSFORM = 0x1;
        /// Linear or angular velocity was replaced.
        const MOTION = 0x2;
        /// User id was replaced.
        const ID = 0x4;
        /// Visibility mask was replaced.
        const MASK = 0x8;
    }
}

impl StateChange {
    /// No change.
    pub const NONE: Self = Self::empty();
}

/// One triangle of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    /// Vertex indices.
    pub idx: [u32; 3],
    /// Index of the source face. Both halves of a quad share it.
    pub prim_id: u32,
}

/// Indexed triangle geometry in object space.
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<Point3<f32>>,
    triangles: Vec<Triangle>,
    num_faces: usize,
    bounds: Bbox,
}

impl Mesh {
    /// Build a mesh from strided arrays.
    ///
    /// `vertex_stride` and `index_stride` count elements, with 0 meaning
    /// densely packed. Without `face_vertex_counts` every face is a
    /// triangle; otherwise each face has 3 or 4 vertices and quads are
    /// split in two. For mixed faces `index_stride` is the distance
    /// between faces, or the face's own vertex count when 0.
    pub fn from_raw(
        vertices: &[f32],
        vertex_stride: usize,
        indices: &[i32],
        index_stride: usize,
        face_vertex_counts: Option<&[i32]>,
    ) -> Result<Self> {
        let vertex_stride = if vertex_stride == 0 { 3 } else { vertex_stride };
        if vertex_stride < 3 {
            return Err(Error::InvalidMesh(format!("vertex stride {vertex_stride} is below 3")));
        }
        let num_vertices = if vertices.len() < 3 {
            0
        } else {
            (vertices.len() - 3) / vertex_stride + 1
        };
        let points: Vec<Point3<f32>> = (0..num_vertices)
            .map(|i| {
                let v = &vertices[i * vertex_stride..i * vertex_stride + 3];
                Point3::new(v[0], v[1], v[2])
            })
            .collect();

        let fetch = |at: usize| -> Result<u32> {
            let index = *indices.get(at).ok_or_else(|| {
                Error::InvalidMesh(format!("index {at} is past the end of the index array"))
            })?;
            if index < 0 || index as usize >= num_vertices {
                return Err(Error::InvalidMesh(format!(
                    "vertex index {index} out of range for {num_vertices} vertices"
                )));
            }
            Ok(index as u32)
        };

        let mut triangles = Vec::new();
        let num_faces;
        match face_vertex_counts {
            None => {
                let stride = if index_stride == 0 { 3 } else { index_stride };
                num_faces = indices.len() / stride;
                for face in 0..num_faces {
                    let base = face * stride;
                    triangles.push(Triangle {
                        idx: [fetch(base)?, fetch(base + 1)?, fetch(base + 2)?],
                        prim_id: face as u32,
                    });
                }
            }
            Some(counts) => {
                num_faces = counts.len();
                let mut base = 0;
                for (face, &count) in counts.iter().enumerate() {
                    let prim_id = face as u32;
                    match count {
                        3 => triangles.push(Triangle {
                            idx: [fetch(base)?, fetch(base + 1)?, fetch(base + 2)?],
                            prim_id,
                        }),
                        4 => {
                            let q = [
                                fetch(base)?,
                                fetch(base + 1)?,
                                fetch(base + 2)?,
                                fetch(base + 3)?,
                            ];
                            triangles.push(Triangle {
                                idx: [q[0], q[1], q[2]],
                                prim_id,
                            });
                            triangles.push(Triangle {
                                idx: [q[0], q[2], q[3]],
                                prim_id,
                            });
                        }
                        other => {
                            return Err(Error::InvalidMesh(format!(
                                "face {face} has {other} vertices, expected 3 or 4"
                            )))
                        }
                    }
                    base += if index_stride == 0 { count as usize } else { index_stride };
                }
            }
        }

        let bounds = Bbox::from_points(&points);
        Ok(Self {
            vertices: points,
            triangles,
            num_faces,
            bounds,
        })
    }

    /// Build a triangle mesh from points and index triples.
    pub fn from_triangles(vertices: &[Point3<f32>], faces: &[[u32; 3]]) -> Result<Self> {
        let flat: Vec<f32> = vertices.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
        let indices: Vec<i32> = faces.iter().flatten().map(|&i| i as i32).collect();
        Self::from_raw(&flat, 3, &indices, 3, None)
    }

    /// Object-space vertices.
    pub fn vertices(&self) -> &[Point3<f32>] {
        &self.vertices
    }

    /// Triangles after quad splitting.
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Number of faces passed at creation, before quad splitting.
    pub fn num_faces(&self) -> usize {
        self.num_faces
    }

    /// Object-space bound.
    pub fn bounds(&self) -> Bbox {
        self.bounds
    }

    /// Object-space bound of triangle `i`.
    pub fn triangle_bounds(&self, i: usize) -> Bbox {
        let t = &self.triangles[i];
        Bbox::from_points(t.idx.iter().map(|&v| &self.vertices[v as usize]))
    }
}

/// Properties every shape carries.
#[derive(Debug, Clone)]
pub struct ShapeCommon {
    id: i32,
    mask: i32,
    transform: Matrix4<f32>,
    inverse: Matrix4<f32>,
    linear_velocity: Vector3<f32>,
    angular_velocity: UnitQuaternion<f32>,
    state: StateChange,
}

impl ShapeCommon {
    pub(crate) fn new(id: i32) -> Self {
        Self {
            id,
            mask: -1,
            transform: Matrix4::identity(),
            inverse: Matrix4::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: UnitQuaternion::identity(),
            state: StateChange::NONE,
        }
    }
}

/// What a shape is made of.
#[derive(Debug, Clone)]
pub enum ShapeKind {
    /// Owns its geometry.
    Mesh(Mesh),
    /// Reuses the geometry of another mesh under its own transform.
    Instance {
        /// The mesh being instanced.
        base: ShapeKey,
    },
}

/// A mesh or an instance together with its placement.
#[derive(Debug, Clone)]
pub struct Shape {
    common: ShapeCommon,
    kind: ShapeKind,
}

impl Shape {
    pub(crate) fn new(id: i32, kind: ShapeKind) -> Self {
        Self {
            common: ShapeCommon::new(id),
            kind,
        }
    }

    /// Mesh or instance.
    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    /// The mesh if this shape owns one.
    pub fn as_mesh(&self) -> Option<&Mesh> {
        match &self.kind {
            ShapeKind::Mesh(mesh) => Some(mesh),
            ShapeKind::Instance { .. } => None,
        }
    }

    /// True for instances.
    pub fn is_instance(&self) -> bool {
        matches!(self.kind, ShapeKind::Instance { .. })
    }

    /// User id reported in hits.
    pub fn id(&self) -> i32 {
        self.common.id
    }

    /// Visibility mask tested against ray masks.
    pub fn mask(&self) -> i32 {
        self.common.mask
    }

    /// Object-to-world transform.
    pub fn transform(&self) -> &Matrix4<f32> {
        &self.common.transform
    }

    /// World-to-object transform.
    pub fn inverse_transform(&self) -> &Matrix4<f32> {
        &self.common.inverse
    }

    /// Linear velocity.
    pub fn linear_velocity(&self) -> Vector3<f32> {
        self.common.linear_velocity
    }

    /// Angular velocity.
    pub fn angular_velocity(&self) -> UnitQuaternion<f32> {
        self.common.angular_velocity
    }

    /// Changes since the last commit.
    pub fn state_change(&self) -> StateChange {
        self.common.state
    }

    /// Replace the transform and its inverse.
    pub fn set_transform(&mut self, transform: Matrix4<f32>, inverse: Matrix4<f32>) {
        self.common.transform = transform;
        self.common.inverse = inverse;
        self.common.state |= StateChange::TRANSFORM;
    }

    /// Replace the linear velocity.
    pub fn set_linear_velocity(&mut self, velocity: Vector3<f32>) {
        self.common.linear_velocity = velocity;
        self.common.state |= StateChange::MOTION;
    }

    /// Replace the angular velocity.
    pub fn set_angular_velocity(&mut self, velocity: UnitQuaternion<f32>) {
        self.common.angular_velocity = velocity;
        self.common.state |= StateChange::MOTION;
    }

    /// Replace the user id.
    pub fn set_id(&mut self, id: i32) {
        self.common.id = id;
        self.common.state |= StateChange::ID;
    }

    /// Replace the visibility mask.
    pub fn set_mask(&mut self, mask: i32) {
        self.common.mask = mask;
        self.common.state |= StateChange::MASK;
    }

    pub(crate) fn clear_state_change(&mut self) {
        self.common.state = StateChange::NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quads_are_split() {
        let vertices = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0];
        let indices = [0, 1, 2, 3, 1, 4, 2];
        let mesh = Mesh::from_raw(&vertices, 3, &indices, 0, Some(&[4, 3])).unwrap();
        assert_eq!(mesh.num_faces(), 2);
        let tris = mesh.triangles();
        assert_eq!(tris.len(), 3);
        assert_eq!(tris[0], Triangle { idx: [0, 1, 2], prim_id: 0 });
        assert_eq!(tris[1], Triangle { idx: [0, 2, 3], prim_id: 0 });
        assert_eq!(tris[2], Triangle { idx: [1, 4, 2], prim_id: 1 });
    }

    #[test]
    fn test_strided_vertices() {
        // xyz plus a padding float per vertex, last vertex unpadded
        let vertices = [0.0, 0.0, 0.0, 9.0, 1.0, 0.0, 0.0, 9.0, 0.0, 1.0, 0.0];
        let mesh = Mesh::from_raw(&vertices, 4, &[0, 1, 2], 0, None).unwrap();
        assert_eq!(mesh.vertices().len(), 3);
        assert_eq!(mesh.vertices()[2], Point3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_bad_meshes_are_rejected() {
        let vertices = [0.0; 9];
        assert!(matches!(
            Mesh::from_raw(&vertices, 3, &[0, 1, 3], 0, None),
            Err(Error::InvalidMesh(_))
        ));
        assert!(matches!(
            Mesh::from_raw(&vertices, 3, &[0, 1, 2, 0, 1], 0, Some(&[5])),
            Err(Error::InvalidMesh(_))
        ));
    }

    #[test]
    fn test_setters_raise_state_bits() {
        let points = [Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
        let mesh = Mesh::from_triangles(&points, &[[0, 1, 2]]).unwrap();
        let mut shape = Shape::new(1, ShapeKind::Mesh(mesh));
        assert_eq!(shape.state_change(), StateChange::NONE);
        shape.set_mask(1);
        shape.set_id(7);
        assert_eq!(shape.state_change(), StateChange::MASK | StateChange::ID);
        shape.set_linear_velocity(Vector3::x());
        assert!(shape.state_change().contains(StateChange::MOTION));
        assert!(!shape.state_change().contains(StateChange::TRANSFORM));
        shape.clear_state_change();
        assert_eq!(shape.state_change(), StateChange::NONE);
        assert_eq!(shape.id(), 7);
    }
}
