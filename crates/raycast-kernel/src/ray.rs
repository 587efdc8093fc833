//! Ray and hit records shared with the device.

use bytemuck::{Pod, Zeroable};
use nalgebra::{Point3, Vector3};

/// Id written for shapes and primitives when nothing was hit.
pub const NULL_ID: i32 = -1;

/// Occlusion output for a ray that hit something.
pub const HIT: i32 = 1;

/// Occlusion output for a ray that hit nothing.
pub const MISS: i32 = -1;

/// A ray as stored in a ray batch. 48 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Ray {
    /// Origin in `xyz`, maximum distance in `w`.
    pub o: [f32; 4],
    /// Direction in `xyz`, time in `w`.
    pub d: [f32; 4],
    /// Visibility mask and active flag.
    pub extra: [i32; 2],
    /// Unused.
    pub padding: [i32; 2],
}

impl Ray {
    /// An active ray with every mask bit set.
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>, max_t: f32) -> Self {
        Self {
            o: [origin.x, origin.y, origin.z, max_t],
            d: [direction.x, direction.y, direction.z, 0.0],
            extra: [-1, 1],
            padding: [0; 2],
        }
    }

    /// Same ray with a different visibility mask.
    #[must_use]
    pub fn with_mask(mut self, mask: i32) -> Self {
        self.extra[0] = mask;
        self
    }

    /// Same ray at a different time.
    #[must_use]
    pub fn with_time(mut self, time: f32) -> Self {
        self.d[3] = time;
        self
    }

    /// Same ray marked active or inactive.
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.extra[1] = active as i32;
        self
    }

    /// Origin.
    pub fn origin(&self) -> Point3<f32> {
        Point3::new(self.o[0], self.o[1], self.o[2])
    }

    /// Direction, not necessarily normalized.
    pub fn direction(&self) -> Vector3<f32> {
        Vector3::new(self.d[0], self.d[1], self.d[2])
    }

    /// Maximum hit distance.
    pub fn max_t(&self) -> f32 {
        self.o[3]
    }

    /// Visibility mask.
    pub fn mask(&self) -> i32 {
        self.extra[0]
    }

    /// Inactive rays are skipped and their outputs left untouched.
    pub fn is_active(&self) -> bool {
        self.extra[1] != 0
    }
}

/// Closest-hit result for one ray. 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Intersection {
    /// Id of the shape hit, or [`NULL_ID`].
    pub shape_id: i32,
    /// Primitive index within the shape, or [`NULL_ID`].
    pub prim_id: i32,
    /// Unused.
    pub padding: [i32; 2],
    /// Barycentrics in `xy`, hit distance in `w`.
    pub uvwt: [f32; 4],
}

impl Intersection {
    /// The record written for a ray that hit nothing.
    pub fn miss(max_t: f32) -> Self {
        Self {
            shape_id: NULL_ID,
            prim_id: NULL_ID,
            padding: [0; 2],
            uvwt: [0.0, 0.0, 0.0, max_t],
        }
    }

    /// True if a shape was hit.
    pub fn is_hit(&self) -> bool {
        self.shape_id != NULL_ID
    }

    /// Hit distance along the ray.
    pub fn t(&self) -> f32 {
        self.uvwt[3]
    }

    /// Barycentric coordinates of the hit.
    pub fn uv(&self) -> [f32; 2] {
        [self.uvwt[0], self.uvwt[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<Ray>(), 48);
        assert_eq!(std::mem::size_of::<Intersection>(), 32);
    }

    #[test]
    fn test_ray_builders() {
        let r = Ray::new(Point3::new(1.0, 2.0, 3.0), Vector3::z(), 10.0)
            .with_mask(0b10)
            .with_time(0.5);
        assert_eq!(r.max_t(), 10.0);
        assert_eq!(r.mask(), 2);
        assert_eq!(r.d[3], 0.5);
        assert!(r.is_active());
        assert!(!r.with_active(false).is_active());
    }
}
