//! Queries through `IntersectionDevice` on the host device, comparing the
//! traversal strategies against each other.

use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::{Matrix4, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use raycast_calc::{Buffer, BufferType, Calc, CalcConfig, CalcError, Device};
use raycast_kernel::options::{ACC_TYPE, FORCE_2LEVEL, SAH_NUM_BINS};
use raycast_kernel::{
    Error, GpuDataType, Intersection, IntersectionDevice, Mesh, Ray, ShapeKey, StrategyKind, World,
    HIT, MISS, NULL_ID,
};

fn host_device() -> Arc<dyn Device> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let calc = Calc::new(CalcConfig {
        enable_gpu: false,
        ..Default::default()
    });
    calc.create_device(0).unwrap()
}

/// Option settings selecting each strategy on a world without instances.
const STRATEGIES: [(StrategyKind, &str, f32); 5] = [
    (StrategyKind::SkipLinks, "bvh", 0.0),
    (StrategyKind::ShortStack, "fatbvh", 0.0),
    (StrategyKind::BitTrail, "bittrail", 0.0),
    (StrategyKind::Hlbvh, "hlbvh", 0.0),
    (StrategyKind::TwoLevel, "bvh", 1.0),
];

fn intersection_device(acc_type: &str, force_2level: f32) -> IntersectionDevice {
    let mut device = IntersectionDevice::new(host_device());
    device.set_option(ACC_TYPE, acc_type).unwrap();
    device.set_option_float(FORCE_2LEVEL, force_2level).unwrap();
    device
}

fn random_mesh(rng: &mut StdRng, num_triangles: usize) -> Mesh {
    let mut points = Vec::new();
    let mut faces = Vec::new();
    for _ in 0..num_triangles {
        let c = Point3::new(
            rng.random_range(-5.0..5.0f32),
            rng.random_range(-5.0..5.0f32),
            rng.random_range(-5.0..5.0f32),
        );
        let base = points.len() as u32;
        for _ in 0..3 {
            let offset = Vector3::new(
                rng.random_range(-0.6..0.6f32),
                rng.random_range(-0.6..0.6f32),
                rng.random_range(-0.6..0.6f32),
            );
            points.push(c + offset);
        }
        faces.push([base, base + 1, base + 2]);
    }
    Mesh::from_triangles(&points, &faces).unwrap()
}

fn random_world(seed: u64) -> World {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut world = World::new();
    for _ in 0..4 {
        let mesh = random_mesh(&mut rng, 150);
        let key = world.create_mesh(mesh);
        world.attach(key).unwrap();
    }
    world
}

fn random_rays(seed: u64, n: usize) -> Vec<Ray> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let dir = Vector3::new(
                rng.random_range(-1.0..1.0f32),
                rng.random_range(-1.0..1.0f32),
                rng.random_range(-1.0..1.0f32),
            )
            .normalize();
            let target = Point3::new(
                rng.random_range(-4.0..4.0f32),
                rng.random_range(-4.0..4.0f32),
                rng.random_range(-4.0..4.0f32),
            );
            Ray::new(target - dir * 20.0, dir, 100.0)
        })
        .collect()
}

fn triangle_mesh() -> Mesh {
    Mesh::from_triangles(
        &[Point3::new(-1.0, -1.0, 0.0), Point3::new(1.0, -1.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
        &[[0, 1, 2]],
    )
    .unwrap()
}

fn single_triangle() -> (World, ShapeKey) {
    let mut world = World::new();
    let key = world.create_mesh(triangle_mesh());
    world.attach(key).unwrap();
    (world, key)
}

fn down_ray(x: f32, y: f32) -> Ray {
    Ray::new(Point3::new(x, y, 5.0), -Vector3::z(), 100.0)
}

struct Batch {
    rays: Buffer,
    hits: Buffer,
    occlusion: Buffer,
    len: usize,
}

fn batch(device: &IntersectionDevice, rays: &[Ray]) -> Batch {
    let calc = device.device();
    Batch {
        rays: calc.create_pod_buffer(BufferType::Read, rays).unwrap(),
        hits: calc
            .create_typed_buffer::<Intersection>(BufferType::ReadWrite, rays.len())
            .unwrap(),
        occlusion: calc.create_typed_buffer::<i32>(BufferType::ReadWrite, rays.len()).unwrap(),
        len: rays.len(),
    }
}

fn intersect(device: &IntersectionDevice, rays: &[Ray]) -> Vec<Intersection> {
    let b = batch(device, rays);
    assert!(device
        .query_intersection(0, &b.rays, b.len, &b.hits, None, false)
        .unwrap()
        .is_none());
    device.device().read_vec(&b.hits, 0, 0, b.len).unwrap()
}

fn occlude(device: &IntersectionDevice, rays: &[Ray]) -> Vec<i32> {
    let b = batch(device, rays);
    device
        .query_occlusion(0, &b.rays, b.len, &b.occlusion, None, false)
        .unwrap();
    device.device().read_vec(&b.occlusion, 0, 0, b.len).unwrap()
}

fn assert_same_hits(expected: &[Intersection], actual: &[Intersection], label: &str) {
    assert_eq!(expected.len(), actual.len());
    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        assert_eq!((e.shape_id, e.prim_id), (a.shape_id, a.prim_id), "{label}: ray {i}");
        if e.is_hit() {
            assert_relative_eq!(e.t(), a.t(), epsilon = 1e-4);
            assert_relative_eq!(e.uv()[0], a.uv()[0], epsilon = 1e-4);
            assert_relative_eq!(e.uv()[1], a.uv()[1], epsilon = 1e-4);
        }
    }
}

#[test]
fn test_strategies_agree_on_random_scene() {
    let rays = random_rays(11, 600);
    let mut reference = None;
    for (kind, acc_type, force) in STRATEGIES {
        let mut world = random_world(3);
        let mut device = intersection_device(acc_type, force);
        device.preprocess(&mut world).unwrap();
        assert_eq!(device.strategy(), Some(kind));
        let hits = intersect(&device, &rays);
        match &reference {
            None => {
                assert!(hits.iter().filter(|h| h.is_hit()).count() > 50, "scene too sparse");
                reference = Some(hits);
            }
            Some(expected) => assert_same_hits(expected, &hits, kind.name()),
        }
    }
}

#[test]
fn test_occlusion_matches_closest_hit() {
    let rays = random_rays(23, 400);
    for (kind, acc_type, force) in STRATEGIES {
        let mut world = random_world(5);
        let mut device = intersection_device(acc_type, force);
        device.preprocess(&mut world).unwrap();
        let hits = intersect(&device, &rays);
        let occluded = occlude(&device, &rays);
        for (i, (hit, occ)) in hits.iter().zip(&occluded).enumerate() {
            let expected = if hit.is_hit() { HIT } else { MISS };
            assert_eq!(*occ, expected, "{kind}: ray {i}");
        }
    }
}

#[test]
fn test_single_triangle_hit_and_miss() {
    for (kind, acc_type, force) in STRATEGIES {
        let (mut world, key) = single_triangle();
        let id = world.shape(key).unwrap().id();
        let mut device = intersection_device(acc_type, force);
        device.preprocess(&mut world).unwrap();

        let centroid = down_ray(0.0, -1.0 / 3.0);
        let away = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::z(), 100.0);
        let hits = intersect(&device, &[centroid, away]);

        assert_eq!(hits[0].shape_id, id, "{kind}");
        assert_eq!(hits[0].prim_id, 0, "{kind}");
        assert_relative_eq!(hits[0].t(), 5.0, epsilon = 1e-5);
        let [u, v] = hits[0].uv();
        assert!(u >= 0.0 && v >= 0.0 && u + v <= 1.0 + 1e-6, "{kind}: uv {u} {v}");
        assert_relative_eq!(u, 1.0 / 3.0, epsilon = 1e-4);
        assert_relative_eq!(v, 1.0 / 3.0, epsilon = 1e-4);

        assert_eq!(hits[1].shape_id, NULL_ID, "{kind}");
        assert_eq!(hits[1].prim_id, NULL_ID, "{kind}");
    }
}

#[test]
fn test_max_t_limits_hits() {
    let (mut world, _) = single_triangle();
    let mut device = intersection_device("bvh", 0.0);
    device.preprocess(&mut world).unwrap();
    let short = Ray::new(Point3::new(0.0, 0.0, 5.0), -Vector3::z(), 4.0);
    assert!(!intersect(&device, &[short])[0].is_hit());
    assert_eq!(occlude(&device, &[short]), vec![MISS]);
}

#[test]
fn test_preprocess_twice_is_idempotent() {
    let rays = random_rays(31, 300);
    for (kind, acc_type, force) in STRATEGIES {
        let mut world = random_world(9);
        let mut device = intersection_device(acc_type, force);
        device.preprocess(&mut world).unwrap();
        let first = intersect(&device, &rays);
        device.preprocess(&mut world).unwrap();
        let second = intersect(&device, &rays);
        assert_eq!(first, second, "{kind}");
    }
}

#[test]
fn test_masks_skip_shapes() {
    for (kind, acc_type, force) in STRATEGIES {
        let (mut world, key) = single_triangle();
        world.shape_mut(key).unwrap().set_mask(0b10);
        let mut device = intersection_device(acc_type, force);
        device.preprocess(&mut world).unwrap();

        let rays = [down_ray(0.0, -0.3).with_mask(0b01), down_ray(0.0, -0.3).with_mask(0b11)];
        let hits = intersect(&device, &rays);
        assert!(!hits[0].is_hit(), "{kind}");
        assert!(hits[1].is_hit(), "{kind}");
        assert_eq!(occlude(&device, &rays), vec![MISS, HIT], "{kind}");
    }
}

#[test]
fn test_inactive_rays_leave_output_untouched() {
    for (kind, acc_type, force) in STRATEGIES {
        let (mut world, _) = single_triangle();
        let mut device = intersection_device(acc_type, force);
        device.preprocess(&mut world).unwrap();

        let rays = [down_ray(0.0, -0.3), down_ray(0.0, -0.3).with_active(false)];
        let sentinel = Intersection {
            shape_id: 77,
            prim_id: 77,
            padding: [0; 2],
            uvwt: [0.5, 0.5, 0.0, 1.0],
        };
        let calc = device.device();
        let ray_buffer = calc.create_pod_buffer(BufferType::Read, &rays).unwrap();
        let hits = calc
            .create_pod_buffer(BufferType::ReadWrite, &[sentinel, sentinel])
            .unwrap();
        device.query_intersection(0, &ray_buffer, 2, &hits, None, false).unwrap();
        let out: Vec<Intersection> = calc.read_vec(&hits, 0, 0, 2).unwrap();
        assert_eq!(out[0].shape_id, 1, "{kind}");
        assert_eq!(out[1], sentinel, "{kind}");

        let occlusion = calc.create_pod_buffer(BufferType::ReadWrite, &[5i32, 5]).unwrap();
        device
            .query_occlusion(0, &ray_buffer, 2, &occlusion, None, false)
            .unwrap();
        assert_eq!(calc.read_vec::<i32>(&occlusion, 0, 0, 2).unwrap(), vec![HIT, 5], "{kind}");
    }
}

#[test]
fn test_indirect_count_limits_traced_rays() {
    let (mut world, _) = single_triangle();
    let mut device = intersection_device("hlbvh", 0.0);
    device.preprocess(&mut world).unwrap();

    let calc = device.device().clone();
    let rays = calc
        .create_pod_buffer(BufferType::Read, &[down_ray(0.0, -0.3), down_ray(0.0, -0.3)])
        .unwrap();
    let count = calc.create_pod_buffer(BufferType::Read, &[1i32]).unwrap();
    let hits = calc.create_pod_buffer(BufferType::ReadWrite, &[0i32, 0]).unwrap();
    let key = device
        .query_occlusion_indirect(0, &rays, &count, 2, &hits, None, true)
        .unwrap()
        .unwrap();
    device.wait_event(key).unwrap();
    device.delete_event(key).unwrap();
    assert_eq!(calc.read_vec::<i32>(&hits, 0, 0, 2).unwrap(), vec![HIT, 0]);
}

#[test]
fn test_queries_before_preprocess_fail() {
    let device = IntersectionDevice::new(host_device());
    let b = batch(&device, &[down_ray(0.0, 0.0)]);
    assert!(matches!(
        device.query_intersection(0, &b.rays, 1, &b.hits, None, false),
        Err(Error::NotPreprocessed)
    ));
    assert!(device.gpu_data(GpuDataType::Bvh).is_none());
}

#[test]
fn test_empty_world_misses() {
    for (kind, acc_type, force) in STRATEGIES {
        let mut world = World::new();
        let mut device = intersection_device(acc_type, force);
        device.preprocess(&mut world).unwrap();
        let rays = [down_ray(0.0, 0.0)];
        assert!(!intersect(&device, &rays)[0].is_hit(), "{kind}");
        assert_eq!(occlude(&device, &rays), vec![MISS], "{kind}");
    }
}

#[test]
fn test_events_are_pooled() {
    let (mut world, _) = single_triangle();
    let mut device = intersection_device("bvh", 0.0);
    device.preprocess(&mut world).unwrap();
    let b = batch(&device, &[down_ray(0.0, -0.3)]);

    let first = device
        .query_intersection(0, &b.rays, 1, &b.hits, None, true)
        .unwrap()
        .unwrap();
    let second = device
        .query_occlusion(0, &b.rays, 1, &b.occlusion, Some(first), true)
        .unwrap()
        .unwrap();
    assert_eq!(device.num_events(), 2);
    device.wait_event(second).unwrap();
    assert!(device.event(first).unwrap().is_complete());

    device.delete_event(first).unwrap();
    device.delete_event(second).unwrap();
    assert_eq!(device.num_events(), 0);
    assert!(device.event(first).is_none());
    assert!(matches!(
        device.delete_event(first),
        Err(Error::Calc(CalcError::Logic(_)))
    ));
    assert!(matches!(
        device.query_intersection(0, &b.rays, 1, &b.hits, Some(first), false),
        Err(Error::Calc(CalcError::Logic(_)))
    ));
}

#[test]
fn test_option_change_rebuilds_with_new_strategy() {
    let (mut world, _) = single_triangle();
    let mut device = intersection_device("bvh", 0.0);
    device.preprocess(&mut world).unwrap();
    assert_eq!(device.strategy(), Some(StrategyKind::SkipLinks));
    assert!(device.gpu_data(GpuDataType::BvhBounds).is_none());

    device.set_option(ACC_TYPE, "hlbvh").unwrap();
    device.preprocess(&mut world).unwrap();
    assert_eq!(device.strategy(), Some(StrategyKind::Hlbvh));
    assert!(device.gpu_data(GpuDataType::BvhBounds).is_some());
    assert!(intersect(&device, &[down_ray(0.0, -0.3)])[0].is_hit());
}

#[test]
fn test_two_level_follows_instance_transforms() {
    let mut world = World::new();
    let mesh = world.create_mesh(triangle_mesh());
    let inst = world.create_instance(mesh).unwrap();
    let m = Matrix4::new_translation(&Vector3::new(10.0, 0.0, 0.0));
    world.shape_mut(inst).unwrap().set_transform(m, m.try_inverse().unwrap());
    world.attach(mesh).unwrap();
    world.attach(inst).unwrap();
    let (mesh_id, inst_id) = (world.shape(mesh).unwrap().id(), world.shape(inst).unwrap().id());

    let mut device = IntersectionDevice::new(host_device());
    device.preprocess(&mut world).unwrap();
    assert_eq!(device.strategy(), Some(StrategyKind::TwoLevel));
    assert!(device.gpu_data(GpuDataType::Shapes).is_some());

    let rays = [down_ray(0.0, -0.3), down_ray(10.0, -0.3), down_ray(0.0, 19.7)];
    let hits = intersect(&device, &rays);
    assert_eq!(hits[0].shape_id, mesh_id);
    assert_eq!(hits[1].shape_id, inst_id);
    assert!(!hits[2].is_hit());

    // Transform-only change: the shape table and top tree are updated in place.
    let m = Matrix4::new_translation(&Vector3::new(0.0, 20.0, 0.0));
    world.shape_mut(inst).unwrap().set_transform(m, m.try_inverse().unwrap());
    world.shape_mut(mesh).unwrap().set_id(42);
    assert!(!world.has_changed());
    device.preprocess(&mut world).unwrap();

    let hits = intersect(&device, &rays);
    assert_eq!(hits[0].shape_id, 42);
    assert!(!hits[1].is_hit());
    assert_eq!(hits[2].shape_id, inst_id);
}

#[test]
fn test_hlbvh_refits_after_transform_change() {
    let mut rng = StdRng::seed_from_u64(41);
    let mut world = World::new();
    let key = world.create_mesh(random_mesh(&mut rng, 300));
    world.attach(key).unwrap();
    let mut device = intersection_device("hlbvh", 0.0);
    device.preprocess(&mut world).unwrap();

    let m = Matrix4::new_translation(&Vector3::new(2.0, -1.0, 0.5)) * Matrix4::new_scaling(0.5);
    world.shape_mut(key).unwrap().set_transform(m, m.try_inverse().unwrap());
    device.preprocess(&mut world).unwrap();

    let mut reference = intersection_device("bvh", 0.0);
    reference.preprocess(&mut world).unwrap();
    let rays = random_rays(43, 400);
    assert_same_hits(&intersect(&reference, &rays), &intersect(&device, &rays), "hlbvh refit");
}

#[test]
fn test_hlbvh_rejects_oversized_batches() {
    let (mut world, _) = single_triangle();
    let mut device = intersection_device("hlbvh", 0.0);
    device.preprocess(&mut world).unwrap();
    let b = batch(&device, &[down_ray(0.0, 0.0)]);
    let result = device.query_occlusion(0, &b.rays, 2048 * 2048 + 1, &b.occlusion, None, false);
    assert!(matches!(
        result,
        Err(Error::CapacityExceeded {
            what: "hlbvh ray batch",
            ..
        })
    ));
}

/// Triangles at x = 4^i. With two SAH bins only the farthest triangle
/// lands in the upper bin, so every split peels off one primitive and the
/// tree is a chain of depth `n - 1`.
fn chain_world(n: usize) -> World {
    let mut points = Vec::new();
    let mut faces = Vec::new();
    for i in 0..n {
        let x = 4.0f32.powi(i as i32);
        let base = points.len() as u32;
        points.extend([
            Point3::new(x, 0.0, 0.0),
            Point3::new(x, 1.0, 0.0),
            Point3::new(x, 0.0, 1.0),
        ]);
        faces.push([base, base + 1, base + 2]);
    }
    let mut world = World::new();
    let key = world.create_mesh(Mesh::from_triangles(&points, &faces).unwrap());
    world.attach(key).unwrap();
    world
}

fn chain_device(acc_type: &str) -> IntersectionDevice {
    let mut device = intersection_device(acc_type, 0.0);
    device.set_option_float(SAH_NUM_BINS, 2.0).unwrap();
    device
}

#[test]
fn test_bit_trail_rejects_deep_trees() {
    let mut world = chain_world(34);
    let mut device = chain_device("bittrail");
    match device.preprocess(&mut world) {
        Err(Error::DepthExceeded { depth, limit, .. }) => {
            assert_eq!(limit, 31);
            assert_eq!(depth, 33);
        }
        other => panic!("expected a depth error, got {other:?}"),
    }

    // Skip links have no depth bound.
    let mut device = chain_device("bvh");
    device.preprocess(&mut chain_world(34)).unwrap();
    let ray = Ray::new(Point3::new(1023.0, 0.2, 0.2), Vector3::x(), 2.0);
    let hit = intersect(&device, &[ray])[0];
    assert_eq!(hit.prim_id, 5);
    assert_relative_eq!(hit.t(), 1.0, epsilon = 1e-4);
}

#[test]
fn test_short_stack_rejects_deep_trees() {
    let mut device = chain_device("fatbvh");
    device.preprocess(&mut chain_world(40)).unwrap();

    let mut world = chain_world(50);
    assert!(matches!(
        device.preprocess(&mut world),
        Err(Error::DepthExceeded { depth: 49, limit: 48, .. })
    ));
}
