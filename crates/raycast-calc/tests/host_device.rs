//! Host backend behaviour through the public device interface.

use std::sync::Arc;

use approx::assert_relative_eq;
use raycast_calc::{
    ArgKind, BufferType, BuildOptions, Calc, CalcConfig, CalcError, Device, Event, HostConfig,
    KernelSource, MapType, ProgramSource, WorkGroup, STATUS_KERNEL_PANIC,
};

const SAXPY_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> y: array<f32>;
struct Params { a: f32, n: u32 }
@group(1) @binding(0) var<uniform> params: Params;

@compute @workgroup_size(64)
fn saxpy(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x < params.n {
        y[gid.x] = params.a * x[gid.x] + y[gid.x];
    }
}
"#;

fn saxpy(wg: &WorkGroup<'_>) {
    let (x, y) = (wg.buffer(0), wg.buffer(1));
    let (a, n) = (wg.f32(2), wg.u32(3) as usize);
    for i in wg.global_ids().filter(|&i| i < n) {
        y.store_f32(i, a * x.load_f32(i) + y.load_f32(i));
    }
}

fn explode(_: &WorkGroup<'_>) {
    panic!("kernel fault");
}

fn program() -> ProgramSource {
    ProgramSource::new("test")
        .kernel(KernelSource::new(
            "saxpy",
            &[ArgKind::ReadBuffer, ArgKind::RwBuffer, ArgKind::Scalar, ArgKind::Scalar],
            SAXPY_WGSL,
            saxpy,
        ))
        .kernel(KernelSource::new("explode", &[], "", explode))
}

fn host_device(num_queues: u32) -> Arc<dyn Device> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let calc = Calc::new(CalcConfig {
        enable_gpu: false,
        host: HostConfig {
            num_threads: 4,
            num_queues,
        },
    });
    calc.create_device(0).unwrap()
}

#[test]
fn test_saxpy_kernel() {
    let device = host_device(1);
    let n = 1000;
    let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let xb = device.create_pod_buffer(BufferType::Read, &x).unwrap();
    let yb = device.create_pod_buffer(BufferType::ReadWrite, &vec![1.0f32; n]).unwrap();

    let exe = device.compile_executable(&program(), &BuildOptions::default()).unwrap();
    let mut f = exe.create_function("saxpy").unwrap();
    f.set_buffer(0, &xb).unwrap().set_buffer(1, &yb).unwrap();
    f.set_f32(2, 2.0).unwrap().set_u32(3, n as u32).unwrap();
    device.execute(&f, 0, n, 64, &[]).unwrap().wait().unwrap();

    let y = device.read_vec::<f32>(&yb, 0, 0, n).unwrap();
    for (i, v) in y.iter().enumerate() {
        assert_relative_eq!(*v, 2.0 * i as f32 + 1.0);
    }
}

#[test]
fn test_unset_argument_is_logic_error() {
    let device = host_device(1);
    let exe = device.compile_executable(&program(), &BuildOptions::default()).unwrap();
    let mut f = exe.create_function("saxpy").unwrap();
    assert!(matches!(f.set_u32(0, 1), Err(CalcError::Logic(_))));
    assert!(matches!(device.execute(&f, 0, 64, 64, &[]), Err(CalcError::Logic(_))));
    assert!(matches!(exe.create_function("missing"), Err(CalcError::Logic(_))));
}

#[test]
fn test_kernel_panic_fails_event() {
    let device = host_device(1);
    let exe = device.compile_executable(&program(), &BuildOptions::default()).unwrap();
    let f = exe.create_function("explode").unwrap();
    let event = device.execute(&f, 0, 64, 64, &[]).unwrap();
    match event.wait() {
        Err(CalcError::Backend { status, .. }) => assert_eq!(status, STATUS_KERNEL_PANIC),
        other => panic!("unexpected {other:?}"),
    }
    // The queue keeps working after a failed command.
    device.finish(0).unwrap();
}

#[test]
fn test_map_unmap_write_back() {
    let device = host_device(1);
    let buffer = device.create_pod_buffer(BufferType::ReadWrite, &[0u32; 8]).unwrap();
    let (mut mapping, ready) = device.map_buffer(&buffer, 0, 8, 16, MapType::Write).unwrap();
    assert!(ready.is_complete());
    mapping.write(&[5u32, 6, 7, 8]);
    device.unmap_buffer(&buffer, 0, mapping).unwrap().wait().unwrap();
    assert_eq!(
        device.read_vec::<u32>(&buffer, 0, 0, 8).unwrap(),
        vec![0, 0, 5, 6, 7, 8, 0, 0]
    );
}

#[test]
fn test_cross_queue_dependency() {
    let device = host_device(2);
    let src = device.create_pod_buffer(BufferType::ReadWrite, &[0u32; 1024]).unwrap();
    let dst = device.create_typed_buffer::<u32>(BufferType::ReadWrite, 1024).unwrap();

    let data: Vec<u32> = (0..1024).collect();
    let written = device.write_slice(&src, 0, 0, &data).unwrap();
    // Transfers carry no dependency list; order queue 1 after queue 0 on the host.
    Event::wait_all(&[written]).unwrap();
    device.copy_buffer(&src, &dst, 1, 0, 0, 4096).unwrap().wait().unwrap();
    assert_eq!(device.read_vec::<u32>(&dst, 1, 0, 1024).unwrap(), data);
}

#[test]
fn test_execute_waits_for_dependencies() {
    let device = host_device(2);
    let n = 4096;
    let xb = device.create_typed_buffer::<f32>(BufferType::Read, n).unwrap();
    let yb = device.create_typed_buffer::<f32>(BufferType::ReadWrite, n).unwrap();
    let written = device.write_slice(&xb, 1, 0, &vec![3.0f32; n]).unwrap();

    let exe = device.compile_executable(&program(), &BuildOptions::default()).unwrap();
    let mut f = exe.create_function("saxpy").unwrap();
    f.set_buffer(0, &xb).unwrap().set_buffer(1, &yb).unwrap();
    f.set_f32(2, 1.0).unwrap().set_u32(3, n as u32).unwrap();
    device.execute(&f, 0, n, 64, &[written]).unwrap().wait().unwrap();

    assert!(device.read_vec::<f32>(&yb, 0, 0, n).unwrap().iter().all(|&v| v == 3.0));
}

#[test]
fn test_out_of_range_access() {
    let device = host_device(1);
    let buffer = device.create_typed_buffer::<u32>(BufferType::ReadWrite, 4).unwrap();
    let mut out = [0u8; 8];
    assert!(matches!(device.read_buffer(&buffer, 0, 12, &mut out), Err(CalcError::Logic(_))));
    assert!(matches!(device.read_buffer(&buffer, 0, 2, &mut out), Err(CalcError::Logic(_))));
    assert!(matches!(device.finish(5), Err(CalcError::Logic(_))));
}

fn upload_and_read_back(device: &dyn Device, values: &[i32]) -> Vec<i32> {
    let buffer = device.create_typed_buffer::<i32>(BufferType::ReadWrite, values.len()).unwrap();
    device.write_slice(&buffer, 0, 0, values).unwrap().wait().unwrap();
    device.read_vec(&buffer, 0, 0, values.len()).unwrap()
}

#[test]
fn test_helpers_on_borrowed_device() {
    let device = host_device(1);
    assert_eq!(upload_and_read_back(device.as_ref(), &[4, -2, 9]), vec![4, -2, 9]);
}
