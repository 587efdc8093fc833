//! End-to-end use of `IntersectionApi` on the host device.

use approx::assert_relative_eq;
use nalgebra::{Matrix4, Point3, Vector3};
use raycast::options::{ACC_TYPE, FORCE_FLAT};
use raycast::{
    BufferType, Calc, CalcConfig, DeviceType, Error, GpuDataType, Intersection, IntersectionApi,
    MapType, Ray, RaycastConfig, StrategyKind, HIT, MISS, NULL_ID,
};

fn host_calc() -> Calc {
    Calc::new(CalcConfig {
        enable_gpu: false,
        ..Default::default()
    })
}

const TRIANGLE: [f32; 9] = [-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0];

fn down_ray(x: f32, y: f32) -> Ray {
    Ray::new(Point3::new(x, y, 5.0), -Vector3::z(), 100.0)
}

#[test]
fn test_device_enumeration() {
    let calc = host_calc();
    assert!(IntersectionApi::device_count(&calc) >= 1);
    let info = IntersectionApi::device_info(&calc, 0).unwrap();
    assert_eq!(info.device_type, DeviceType::Cpu);
    let count = IntersectionApi::device_count(&calc);
    assert!(IntersectionApi::device_info(&calc, count).is_err());
    assert!(IntersectionApi::create(&calc, count).is_err());
}

#[test]
fn test_triangle_hit_and_miss() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    let shape = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    api.attach_shape(shape).unwrap();
    assert!(!api.is_world_empty());
    api.commit().unwrap();
    assert_eq!(api.strategy(), Some(StrategyKind::SkipLinks));

    let hits = api.intersect_rays(&[down_ray(0.0, -1.0 / 3.0), down_ray(3.0, 3.0)]).unwrap();
    assert_eq!(hits[0].shape_id, api.shape(shape).unwrap().id());
    assert_eq!(hits[0].prim_id, 0);
    assert_relative_eq!(hits[0].t(), 5.0, epsilon = 1e-5);
    assert_eq!(hits[1].shape_id, NULL_ID);
    let occluded = api.occlude_rays(&[down_ray(0.0, 0.0), down_ray(3.0, 3.0)]).unwrap();
    assert_eq!(occluded, vec![HIT, MISS]);
    assert!(api.intersect_rays(&[]).unwrap().is_empty());
}

#[test]
fn test_quads_keep_their_face_id() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    // A triangle at z = 10 and a unit quad at x in [5, 6], stride 4 with junk in w.
    #[rustfmt::skip]
    let vertices = [
        -1.0, -1.0, 10.0, 9.0,
         1.0, -1.0, 10.0, 9.0,
         0.0,  1.0, 10.0, 9.0,
         5.0,  0.0,  0.0, 9.0,
         6.0,  0.0,  0.0, 9.0,
         6.0,  1.0,  0.0, 9.0,
         5.0,  1.0,  0.0, 9.0,
    ];
    let indices = [0, 1, 2, 3, 4, 5, 6];
    let shape = api.create_mesh(&vertices, 4, &indices, 0, Some(&[3, 4])).unwrap();
    api.attach_shape(shape).unwrap();
    api.commit().unwrap();

    // Both halves of the quad report face 1.
    let hits = api.intersect_rays(&[down_ray(5.8, 0.2), down_ray(5.2, 0.8)]).unwrap();
    assert_eq!(hits[0].prim_id, 1);
    assert_eq!(hits[1].prim_id, 1);
    let above = Ray::new(Point3::new(0.0, -0.3, 20.0), -Vector3::z(), 100.0);
    let hit = api.intersect_rays(&[above]).unwrap()[0];
    assert_eq!(hit.prim_id, 0);
    assert_relative_eq!(hit.t(), 10.0, epsilon = 1e-5);
}

#[test]
fn test_bad_indices_are_rejected() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    assert!(matches!(
        api.create_mesh(&TRIANGLE, 3, &[0, 1, 7], 3, None),
        Err(Error::Kernel(raycast_kernel::Error::InvalidMesh(_)))
    ));
}

#[test]
fn test_instances_and_detach() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    let mesh = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    let inst = api.create_instance(mesh).unwrap();
    let m = Matrix4::new_translation(&Vector3::new(4.0, 0.0, 0.0));
    api.set_shape_transform(inst, m, m.try_inverse().unwrap()).unwrap();
    api.set_shape_id(inst, 100).unwrap();
    api.attach_shape(mesh).unwrap();
    api.attach_shape(inst).unwrap();
    api.commit().unwrap();
    assert_eq!(api.strategy(), Some(StrategyKind::TwoLevel));

    let rays = [down_ray(0.0, -0.3), down_ray(4.0, -0.3)];
    let hits = api.intersect_rays(&rays).unwrap();
    assert_eq!(hits[1].shape_id, 100);
    assert!(hits[0].shape_id > 0);

    // Forcing a flat layout expands the instance into world space.
    api.set_option_float(FORCE_FLAT, 1.0).unwrap();
    api.commit().unwrap();
    assert_eq!(api.strategy(), Some(StrategyKind::SkipLinks));
    let flat = api.intersect_rays(&rays).unwrap();
    for (a, b) in flat.iter().zip(&hits) {
        assert_eq!((a.shape_id, a.prim_id), (b.shape_id, b.prim_id));
        assert_relative_eq!(a.t(), b.t(), epsilon = 1e-5);
    }

    api.detach_shape(inst).unwrap();
    api.commit().unwrap();
    assert_eq!(api.occlude_rays(&rays).unwrap(), vec![HIT, MISS]);

    api.detach_all();
    assert!(api.is_world_empty());
    api.commit().unwrap();
    assert_eq!(api.occlude_rays(&rays).unwrap(), vec![MISS, MISS]);

    api.delete_shape(inst).unwrap();
    assert!(api.shape(inst).is_err());
}

#[test]
fn test_masks_and_ids_update_without_reattach() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    api.set_option(ACC_TYPE, "hlbvh").unwrap();
    let shape = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    api.attach_shape(shape).unwrap();
    api.commit().unwrap();

    api.set_shape_mask(shape, 0b100).unwrap();
    api.set_shape_id(shape, 9).unwrap();
    api.commit().unwrap();
    let rays = [down_ray(0.0, -0.3).with_mask(0b011), down_ray(0.0, -0.3).with_mask(0b100)];
    let hits = api.intersect_rays(&rays).unwrap();
    assert!(!hits[0].is_hit());
    assert_eq!(hits[1].shape_id, 9);
}

#[test]
fn test_buffers_map_and_async_queries() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    let shape = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    api.attach_shape(shape).unwrap();
    api.commit().unwrap();

    let ray_size = std::mem::size_of::<Ray>();
    let rays = api.create_buffer(2 * ray_size, BufferType::Read, None).unwrap();
    let mut mapping = api.map_buffer(&rays, MapType::Write, 0, 2 * ray_size).unwrap();
    mapping.write(&[down_ray(0.0, -0.3), down_ray(3.0, 3.0)]);
    let uploaded = api.unmap_buffer(&rays, mapping, true).unwrap().unwrap();

    let hits = api
        .create_buffer(2 * std::mem::size_of::<Intersection>(), BufferType::Write, None)
        .unwrap();
    let queried = api
        .query_intersection(&rays, 2, &hits, Some(uploaded), true)
        .unwrap()
        .unwrap();
    api.wait_event(queried).unwrap();
    assert!(api.is_event_complete(uploaded));
    api.delete_event(uploaded).unwrap();
    api.delete_event(queried).unwrap();

    let size = 2 * std::mem::size_of::<Intersection>();
    let out = api.map_buffer(&hits, MapType::Read, 0, size).unwrap();
    let hits_out: Vec<Intersection> = out.to_vec();
    assert!(hits_out[0].is_hit());
    assert!(!hits_out[1].is_hit());
    assert!(api.unmap_buffer(&hits, out, false).unwrap().is_none());

    let count = api
        .create_buffer(4, BufferType::Read, Some(bytemuck::bytes_of(&1i32)))
        .unwrap();
    let occlusion = api.create_buffer(8, BufferType::ReadWrite, None).unwrap();
    api.query_occlusion_indirect(&rays, &count, 2, &occlusion, None, false)
        .unwrap();
    let out = api.map_buffer(&occlusion, MapType::Read, 0, 8).unwrap();
    assert_eq!(out.to_vec::<i32>(), vec![HIT, 0]);
}

#[test]
fn test_gpu_data_follows_strategy() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    assert!(api.gpu_data(GpuDataType::Bvh).is_none());
    let shape = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    api.attach_shape(shape).unwrap();
    api.set_option(ACC_TYPE, "bittrail").unwrap();
    api.commit().unwrap();
    assert!(api.gpu_data(GpuDataType::HashTable).is_some());
    assert!(api.gpu_data(GpuDataType::Vertices).unwrap().size() >= 3 * 16);
    assert!(api.gpu_data(GpuDataType::Shapes).is_none());
}

#[test]
fn test_from_config() {
    let config = RaycastConfig::from_toml(
        r#"
        enable_gpu = false

        [options]
        "acc.type" = "fatbvh"
        "#,
    )
    .unwrap();
    let (calc, mut api) = IntersectionApi::from_config(&config).unwrap();
    assert_eq!(IntersectionApi::device_count(&calc), 1);
    assert_eq!(api.options().acc_type(), "fatbvh");
    let shape = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    api.attach_shape(shape).unwrap();
    api.commit().unwrap();
    assert_eq!(api.strategy(), Some(StrategyKind::ShortStack));
}

#[test]
fn test_reset_id_counter() {
    let calc = host_calc();
    let mut api = IntersectionApi::create(&calc, 0).unwrap();
    let a = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    api.reset_id_counter();
    let b = api.create_mesh(&TRIANGLE, 3, &[0, 1, 2], 3, None).unwrap();
    assert_eq!(api.shape(a).unwrap().id(), api.shape(b).unwrap().id());
}

#[test]
fn test_query_before_commit_fails() {
    let calc = host_calc();
    let api = IntersectionApi::create(&calc, 0).unwrap();
    assert!(matches!(
        api.intersect_rays(&[down_ray(0.0, 0.0)]),
        Err(Error::Kernel(raycast_kernel::Error::NotPreprocessed))
    ));
}
