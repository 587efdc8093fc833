//! Bounding boxes and transform helpers.

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};

/// Axis-aligned bounding box.
///
/// The empty box has `min = +inf` and `max = -inf`, so union with it is
/// the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    /// Minimum corner.
    pub min: Point3<f32>,
    /// Maximum corner.
    pub max: Point3<f32>,
}

impl Default for Bbox {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bbox {
    /// A box containing nothing.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    /// A degenerate box around one point.
    pub fn from_point(p: Point3<f32>) -> Self {
        Self { min: p, max: p }
    }

    /// Smallest box containing all `points`.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f32>>) -> Self {
        points.into_iter().fold(Self::empty(), |b, p| b.grow(p))
    }

    /// True if the box contains nothing.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// This box grown to include `p`.
    #[must_use]
    pub fn grow(&self, p: &Point3<f32>) -> Self {
        Self {
            min: self.min.inf(p),
            max: self.max.sup(p),
        }
    }

    /// Union of two boxes. Commutative, associative and idempotent.
    #[must_use]
    pub fn union(&self, other: &Bbox) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Center point.
    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    /// `max - min`.
    pub fn extents(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Surface area, zero for empty boxes.
    pub fn surface_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.extents();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Axis of the largest extent.
    pub fn max_extent_axis(&self) -> usize {
        let e = self.extents();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }

    /// True if `other` lies entirely inside this box.
    pub fn contains(&self, other: &Bbox) -> bool {
        other.is_empty()
            || (0..3).all(|i| self.min[i] <= other.min[i] && self.max[i] >= other.max[i])
    }

    /// Bound of this box after transforming its eight corners.
    #[must_use]
    pub fn transform(&self, m: &Matrix4<f32>) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::empty();
        for i in 0..8 {
            let corner = Point3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out = out.grow(&m.transform_point(&corner));
        }
        out
    }
}

/// Device layout of a bounding box.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBbox {
    /// Minimum corner, `w` unused.
    pub pmin: [f32; 4],
    /// Maximum corner, `w` unused.
    pub pmax: [f32; 4],
}

impl From<&Bbox> for GpuBbox {
    fn from(b: &Bbox) -> Self {
        Self {
            pmin: [b.min.x, b.min.y, b.min.z, 0.0],
            pmax: [b.max.x, b.max.y, b.max.z, 0.0],
        }
    }
}

impl From<&GpuBbox> for Bbox {
    fn from(b: &GpuBbox) -> Self {
        Self {
            min: Point3::new(b.pmin[0], b.pmin[1], b.pmin[2]),
            max: Point3::new(b.pmax[0], b.pmax[1], b.pmax[2]),
        }
    }
}

/// First three rows of a 4×4 affine matrix, as stored on the device.
pub(crate) fn affine_rows(m: &Matrix4<f32>) -> [[f32; 4]; 3] {
    let mut rows = [[0.0; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bbox(min: [f32; 3], max: [f32; 3]) -> Bbox {
        Bbox {
            min: Point3::from(min),
            max: Point3::from(max),
        }
    }

    #[test]
    fn test_union_laws() {
        let a = bbox([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let b = bbox([-1.0, 0.5, 0.0], [0.5, 2.0, 0.5]);
        let c = bbox([3.0, 3.0, 3.0], [4.0, 4.0, 4.0]);
        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.union(&b).union(&c), a.union(&b.union(&c)));
        assert_eq!(a.union(&a), a);
        assert_eq!(a.union(&Bbox::empty()), a);
    }

    #[test]
    fn test_surface_area() {
        let b = bbox([0.0, 0.0, 0.0], [1.0, 2.0, 3.0]);
        assert_relative_eq!(b.surface_area(), 22.0);
        assert_eq!(Bbox::empty().surface_area(), 0.0);
        assert_eq!(b.max_extent_axis(), 2);
    }

    #[test]
    fn test_transform_translates() {
        let b = bbox([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let m = Matrix4::new_translation(&Vector3::new(2.0, 0.0, -1.0));
        let t = b.transform(&m);
        assert_eq!(t, bbox([2.0, 0.0, -1.0], [3.0, 1.0, 0.0]));
        assert!(t.contains(&bbox([2.5, 0.5, -0.5], [2.6, 0.6, -0.4])));
    }
}
