//! # Surfrecon Algorithms
//!
//! Spatial indexing over scattered 3D points.
//!
//! [`KdTree`] answers nearest-point, k-nearest and radius queries and is the
//! index used while fitting and evaluating implicit surfaces.
//! [`BruteForceSearch`] implements the same [`NearestNeighborSearch`] trait
//! with a linear scan and is useful as a reference for small inputs.
//!
//! [`NearestNeighborSearch`]: surfrecon_core::NearestNeighborSearch

pub mod nearest_neighbor;

pub use nearest_neighbor::*;
