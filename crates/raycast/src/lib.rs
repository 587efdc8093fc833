#![warn(missing_docs)]

//! raycast: batched ray intersection queries on GPUs and the host.
//!
//! Build a world of triangle meshes and instances, commit it, and trace
//! whole buffers of rays for closest hits or occlusion. The acceleration
//! structure is chosen from the world and the options: a stackless BVH by
//! default, a two-level BVH when instances are attached, or a BVH built
//! on the device with `acc.type = "hlbvh"`.
//!
//! # Example
//!
//! ```
//! use nalgebra::{Point3, Vector3};
//! use raycast::{Calc, CalcConfig, IntersectionApi, Ray};
//!
//! let calc = Calc::new(CalcConfig { enable_gpu: false, ..Default::default() });
//! let mut api = IntersectionApi::create(&calc, 0).unwrap();
//!
//! let vertices = [-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0];
//! let triangle = api.create_mesh(&vertices, 3, &[0, 1, 2], 3, None).unwrap();
//! api.attach_shape(triangle).unwrap();
//! api.commit().unwrap();
//!
//! let ray = Ray::new(Point3::new(0.0, 0.0, 5.0), -Vector3::z(), 100.0);
//! let hits = api.intersect_rays(&[ray]).unwrap();
//! assert_eq!(hits[0].shape_id, api.shape(triangle).unwrap().id());
//! ```

mod api;
pub mod config;
mod error;

pub use api::IntersectionApi;
pub use config::RaycastConfig;
pub use error::{Error, Result};

pub use raycast_calc::{
    Buffer, BufferType, Calc, CalcConfig, DeviceInfo, DeviceType, MapType, Mapping, Platform,
};
pub use raycast_kernel::options;
pub use raycast_kernel::{
    EventKey, GpuDataType, Intersection, Mesh, Options, Ray, Shape, ShapeKey, StateChange,
    StrategyKind, HIT, MISS, NULL_ID,
};
