//! # surfrecon Reconstruction
//!
//! Implicit surface reconstruction from oriented point clouds.
//!
//! The pipeline fits a compactly supported radial basis function to the
//! input points and their off-surface offsets, samples the fitted field on a
//! regular lattice, and extracts its zero level with marching cubes,
//! marching tetrahedra or dual contouring.

pub mod implicit;
pub mod linalg;
pub mod marching_cubes;
pub mod parallel;
pub mod pipeline;
pub mod progress;
pub mod volume;

// Re-export commonly used items
pub use implicit::*;
pub use linalg::{bicgstab, CsrMatrix, SolveReport, SolverSettings, TripletBuilder};
pub use marching_cubes::*;
pub use parallel::{init_thread_pool, ThreadPoolConfig};
pub use pipeline::*;
pub use progress::{channel_sink, CancelHandle, ChannelSink, ProgressMsg, ProgressSink, TracingSink};
pub use volume::*;
