//! # surfrecon
//!
//! Surface reconstruction from oriented 3D point clouds.
//!
//! This is the umbrella crate that provides convenient access to all surfrecon functionality.
//! You can use this crate to get everything in one place, or use individual crates for
//! more granular control over dependencies.
//!
//! ## Features
//!
//! - **Core**: Points, point clouds, triangle meshes and the error type
//! - **Algorithms**: KD-tree spatial index
//! - **Reconstruction**: RBF implicit fitting, lattice sampling and isosurface extraction
//!
//! ## Quick Start
//!
//! ```rust
//! use surfrecon::prelude::*;
//!
//! let tree = KdTree::from_points(&[
//!     Point3d::new(0.0, 0.0, 0.0),
//!     Point3d::new(1.0, 0.0, 0.0),
//!     Point3d::new(0.0, 1.0, 0.0),
//! ]);
//! let nearest = tree.nearest(&Point3d::new(0.9, 0.1, 0.0)).unwrap();
//! assert_eq!(nearest.index, Some(1));
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Enables algorithms and reconstruction
//! - `algorithms`: Spatial indexing
//! - `reconstruction`: The reconstruction pipeline (implies `algorithms`)
//! - `all`: Enables all features

// Re-export core functionality
pub use surfrecon_core::*;

// Re-export sub-crates
#[cfg(feature = "algorithms")]
pub use surfrecon_algorithms as algorithms;

#[cfg(feature = "reconstruction")]
pub use surfrecon_reconstruction as reconstruction;

/// Convenient imports for common use cases
pub mod prelude {
    pub use surfrecon_core::*;

    #[cfg(feature = "algorithms")]
    pub use surfrecon_algorithms::*;

    #[cfg(feature = "reconstruction")]
    pub use surfrecon_reconstruction::*;
}
