#![warn(missing_docs)]

//! Acceleration structures and batched ray queries for raycast.
//!
//! Shapes live in a [`World`]. An [`IntersectionDevice`] turns the
//! attached shapes into device data with one of five traversal
//! strategies and answers closest-hit and any-hit queries over ray
//! buffers.
//!
//! # Architecture
//!
//! - [`math`], [`shape`], [`world`]: host geometry, shapes and change tracking
//! - [`bvh`]: SAH/median BVH built on the host, with skip-link, fat-node
//!   and perfect-hash device layouts
//! - [`hlbvh`]: LBVH construction and refit running entirely in kernels
//! - [`intersector`]: the traversal strategies behind one [`Intersector`]
//! - [`device`]: strategy selection, rebuild decisions and query events
//!
//! Every kernel is written twice, in WGSL for GPU devices and in Rust for
//! the host device, with identical argument layouts.

pub mod bvh;
pub mod device;
mod error;
pub mod hlbvh;
pub mod intersector;
mod kernels;
pub mod math;
pub mod options;
mod ray;
mod scene;
pub mod shape;
pub mod world;

pub use device::{select_strategy, EventKey, IntersectionDevice};
pub use error::{Error, Result};
pub use hlbvh::{HlbvhBuilder, HlbvhNode, HlbvhTree};
pub use intersector::{GpuDataType, GpuShape, Intersector, Query, StrategyKind};
pub use math::{Bbox, GpuBbox};
pub use options::{BuilderKind, OptionValue, Options};
pub use ray::{Intersection, Ray, HIT, MISS, NULL_ID};
pub use scene::{Face, FlatScene};
pub use shape::{Mesh, Shape, ShapeKey, ShapeKind, StateChange, Triangle};
pub use world::World;
