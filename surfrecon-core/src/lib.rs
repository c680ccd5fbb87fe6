//! Core data structures and traits for surfrecon
//!
//! This crate provides the fundamental types shared by the spatial index, the
//! implicit fitter and the isosurface extractors: points and oriented samples,
//! point clouds, triangle meshes, the error type and the search traits.

pub mod point;
pub mod point_cloud;
pub mod mesh;
pub mod traits;
pub mod error;

pub use point::*;
pub use point_cloud::*;
pub use mesh::*;
pub use traits::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3, DVector};

// Type aliases for easier imports
pub type Point = Point3d;
pub type Mesh = TriangleMesh;
