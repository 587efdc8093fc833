//! Host versions of the shared ray/box and ray/triangle tests.
//!
//! Operation order matches `common.wgsl` so both backends round alike.

use nalgebra::Vector3;
use raycast_calc::{HostBuffer, WorkGroup};

use crate::ray::{Intersection, Ray, HIT, MISS, NULL_ID};
use crate::scene::Face;

/// Smallest direction magnitude inverted as is (2^-80).
const INVDIR_EPS: f32 = 8.271806e-25;

fn safe_component(x: f32) -> f32 {
    if x.abs() > INVDIR_EPS {
        x
    } else if x >= 0.0 {
        INVDIR_EPS
    } else {
        -INVDIR_EPS
    }
}

/// A ray with its precomputed slab test terms.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RayState {
    pub o: Vector3<f32>,
    pub d: Vector3<f32>,
    invdir: Vector3<f32>,
    oxinvdir: Vector3<f32>,
    pub mask: i32,
}

impl RayState {
    pub fn new(o: Vector3<f32>, d: Vector3<f32>, mask: i32) -> Self {
        let invdir = Vector3::new(
            1.0 / safe_component(d.x),
            1.0 / safe_component(d.y),
            1.0 / safe_component(d.z),
        );
        let oxinvdir = (-o).component_mul(&invdir);
        Self {
            o,
            d,
            invdir,
            oxinvdir,
            mask,
        }
    }

    pub fn from_ray(r: &Ray) -> Self {
        Self::new(r.origin().coords, r.direction(), r.mask())
    }

    /// Entry and exit distances; the box is hit iff `t0 <= t1`.
    pub fn intersect_box(&self, pmin: &[f32; 3], pmax: &[f32; 3], t_max: f32) -> (f32, f32) {
        let mut t0 = 0.0f32;
        let mut t1 = t_max;
        let mut tmin3 = [0.0f32; 3];
        let mut tmax3 = [0.0f32; 3];
        for k in 0..3 {
            let f = pmax[k] * self.invdir[k] + self.oxinvdir[k];
            let n = pmin[k] * self.invdir[k] + self.oxinvdir[k];
            tmax3[k] = f.max(n);
            tmin3[k] = f.min(n);
        }
        t1 = t1.min(tmax3[0].min(tmax3[1].min(tmax3[2])));
        t0 = t0.max(tmin3[0].max(tmin3[1].max(tmin3[2])));
        (t0, t1)
    }

    pub fn hits_box(&self, pmin: &[f32; 3], pmax: &[f32; 3], t_max: f32) -> Option<f32> {
        let (t0, t1) = self.intersect_box(pmin, pmax, t_max);
        (t0 <= t1).then_some(t0)
    }
}

/// Hit distance, or `t_max` on a miss.
pub(crate) fn intersect_triangle(
    s: &RayState,
    v1: &Vector3<f32>,
    v2: &Vector3<f32>,
    v3: &Vector3<f32>,
    t_max: f32,
) -> f32 {
    let e1 = v2 - v1;
    let e2 = v3 - v1;
    let s1 = s.d.cross(&e2);
    let invd = 1.0 / s1.dot(&e1);
    let diff = s.o - v1;
    let b1 = diff.dot(&s1) * invd;
    let s2 = diff.cross(&e1);
    let b2 = s.d.dot(&s2) * invd;
    let temp = e2.dot(&s2) * invd;
    if b1 < 0.0 || b1 > 1.0 || b2 < 0.0 || b1 + b2 > 1.0 || temp < 0.0 || temp > t_max {
        t_max
    } else {
        temp
    }
}

pub(crate) fn barycentrics(
    p: &Vector3<f32>,
    v1: &Vector3<f32>,
    v2: &Vector3<f32>,
    v3: &Vector3<f32>,
) -> [f32; 2] {
    let e1 = v2 - v1;
    let e2 = v3 - v1;
    let e = p - v1;
    let d00 = e1.dot(&e1);
    let d01 = e1.dot(&e2);
    let d11 = e2.dot(&e2);
    let d20 = e.dot(&e1);
    let d21 = e.dot(&e2);
    let invdenom = 1.0 / (d00 * d11 - d01 * d01);
    [
        (d11 * d20 - d01 * d21) * invdenom,
        (d00 * d21 - d01 * d20) * invdenom,
    ]
}

/// Closest hit found so far.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Hit {
    pub shape_id: i32,
    pub prim_id: i32,
    pub uv: [f32; 2],
    pub t: f32,
}

impl Hit {
    pub fn none(max_t: f32) -> Self {
        Self {
            shape_id: NULL_ID,
            prim_id: NULL_ID,
            uv: [0.0; 2],
            t: max_t,
        }
    }

    pub fn to_intersection(self) -> Intersection {
        Intersection {
            shape_id: self.shape_id,
            prim_id: self.prim_id,
            padding: [0; 2],
            uvwt: [self.uv[0], self.uv[1], 0.0, self.t],
        }
    }
}

/// Vertex and face arrays bound to a traversal dispatch.
pub(crate) struct Geometry<'a> {
    pub vertices: &'a HostBuffer,
    pub faces: &'a HostBuffer,
}

impl Geometry<'_> {
    fn vertex(&self, i: i32) -> Vector3<f32> {
        let v: [f32; 4] = self.vertices.load(i as usize);
        Vector3::new(v[0], v[1], v[2])
    }

    /// Test face `index` on behalf of a shape, updating `hit` if closer.
    pub fn test_face(
        &self,
        s: &RayState,
        index: i32,
        shape_id: i32,
        shape_mask: i32,
        hit: &mut Hit,
    ) -> bool {
        if shape_mask & s.mask == 0 {
            return false;
        }
        let face: Face = self.faces.load(index as usize);
        let v1 = self.vertex(face.idx[0]);
        let v2 = self.vertex(face.idx[1]);
        let v3 = self.vertex(face.idx[2]);
        let t = intersect_triangle(s, &v1, &v2, &v3, hit.t);
        if t < hit.t {
            *hit = Hit {
                shape_id,
                prim_id: face.prim_id,
                uv: barycentrics(&(s.o + s.d * t), &v1, &v2, &v3),
                t,
            };
            return true;
        }
        false
    }

    /// Test face `index` using the shape id and mask stored on the face.
    pub fn test_flat_face(&self, s: &RayState, index: i32, hit: &mut Hit) -> bool {
        let face: Face = self.faces.load(index as usize);
        self.test_face(s, index, face.shape_id, face.shape_mask, hit)
    }
}

/// Run `trace` for every active ray of the workgroup.
///
/// Argument 0 holds the rays, argument 1 the ray count, `output` the
/// hits. Occlusion writes [`HIT`]/[`MISS`], intersection a full record.
pub(crate) fn for_each_ray(
    wg: &WorkGroup<'_>,
    output: usize,
    any_hit: bool,
    trace: impl Fn(&Ray, usize) -> Hit,
) {
    let rays = wg.buffer(0);
    let capacity = rays.num_words() / (std::mem::size_of::<Ray>() / 4);
    let count = (wg.buffer(1).load_i32(0).max(0) as usize).min(capacity);
    let out = wg.buffer(output);
    for i in wg.global_ids() {
        if i >= count {
            continue;
        }
        let ray: Ray = rays.load(i);
        if !ray.is_active() {
            continue;
        }
        let hit = trace(&ray, i);
        if any_hit {
            out.store_i32(i, if hit.shape_id != NULL_ID { HIT } else { MISS });
        } else {
            out.store(i, &hit.to_intersection());
        }
    }
}
