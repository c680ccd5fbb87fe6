//! End-to-end reconstruction pipeline
//!
//! Runs the implicit fit, samples the fitted field on a lattice, extracts the
//! isosurface and maps its vertices back into the coordinate frame of the
//! input cloud.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use surfrecon_core::{Error, NormalPoint3d, PointCloud, Result, TriangleMesh};
use tracing::{info, info_span};

use crate::implicit::{ImplicitFitter, NormalizationFrame, RbfConfig};
use crate::linalg::SolveReport;
use crate::marching_cubes::{MarchingCubes, MarchingCubesConfig};
use crate::progress::{ProgressMsg, ProgressSink};

/// Configuration for [`reconstruct`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    pub rbf: RbfConfig,
    /// Lattice samples along x, y and z
    pub resolution: [usize; 3],
    pub extraction: MarchingCubesConfig,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            rbf: RbfConfig::default(),
            resolution: [64; 3],
            extraction: MarchingCubesConfig::default(),
        }
    }
}

impl ReconstructionConfig {
    pub fn with_rbf(mut self, rbf: RbfConfig) -> Self {
        self.rbf = rbf;
        self
    }

    /// Use `n` lattice samples along every axis
    pub fn with_resolution(mut self, n: usize) -> Self {
        self.resolution = [n; 3];
        self
    }

    pub fn with_resolution_xyz(mut self, resolution: [usize; 3]) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_extraction(mut self, extraction: MarchingCubesConfig) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution.iter().any(|&n| n < 2) {
            return Err(Error::DegenerateInput(format!(
                "lattice resolution {:?} needs at least 2 samples per axis",
                self.resolution
            )));
        }
        self.rbf.validate()?;
        self.extraction.validate()
    }
}

/// A reconstructed mesh together with how it was obtained
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Mesh in the coordinate frame of the input cloud
    pub mesh: TriangleMesh,
    /// Isovalue the mesh was extracted at
    pub iso_level: f64,
    pub solve: SolveReport,
    pub frame: NormalizationFrame,
    /// Wall-clock time in seconds
    pub processing_time: f32,
}

fn check_cancelled(progress: Option<&dyn ProgressSink>, phase: &str) -> Result<()> {
    match progress {
        Some(sink) if sink.should_cancel() => {
            Err(Error::Cancelled(format!("reconstruction cancelled before {}", phase)))
        }
        _ => Ok(()),
    }
}

fn start_phase(progress: Option<&dyn ProgressSink>, name: &'static str) -> Result<()> {
    check_cancelled(progress, name)?;
    if let Some(sink) = progress {
        sink.emit(ProgressMsg::Phase { name });
    }
    Ok(())
}

/// Reconstruct a triangle mesh from an oriented point cloud.
///
/// Cancellation requested through `progress` is honoured between phases.
pub fn reconstruct(
    cloud: &PointCloud<NormalPoint3d>,
    config: &ReconstructionConfig,
    progress: Option<&dyn ProgressSink>,
) -> Result<Reconstruction> {
    let start_time = Instant::now();

    if cloud.is_empty() {
        return Err(Error::DegenerateInput("point cloud is empty".to_string()));
    }
    config.validate()?;

    let _span = info_span!("reconstruct", points = cloud.len()).entered();

    start_phase(progress, "fit")?;
    let surface = ImplicitFitter::new(config.rbf.clone()).fit(cloud, progress)?;

    start_phase(progress, "rasterize")?;
    let volume = surface.rasterize(config.resolution, progress)?;
    let frame = *surface.frame();
    let solve = *surface.solve_report();
    drop(surface);

    start_phase(progress, "extract")?;
    let extractor = MarchingCubes::new(config.extraction.clone());
    let iso_level = extractor.resolve_iso_level(&volume);
    let mut mesh = extractor.extract_at(&volume, iso_level, progress)?;
    drop(volume);

    let resolution = config.resolution;
    mesh.map_vertices(|p| frame.lattice_to_world(p, resolution));

    let processing_time = start_time.elapsed().as_secs_f32();
    info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        iso_level,
        processing_time,
        "reconstruction finished"
    );

    Ok(Reconstruction {
        mesh,
        iso_level,
        solve,
        frame,
        processing_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use surfrecon_core::Point3d;

    #[derive(Debug)]
    struct CancelImmediately;

    impl ProgressSink for CancelImmediately {
        fn emit(&self, _msg: ProgressMsg) {}

        fn should_cancel(&self) -> bool {
            true
        }
    }

    fn tetrahedron_cloud() -> PointCloud<NormalPoint3d> {
        let corners = [
            Point3d::new(1.0, 1.0, 1.0),
            Point3d::new(1.0, -1.0, -1.0),
            Point3d::new(-1.0, 1.0, -1.0),
            Point3d::new(-1.0, -1.0, 1.0),
        ];
        PointCloud::from_points(
            corners
                .iter()
                .map(|p| NormalPoint3d::new(*p, p.coords.normalize()))
                .collect(),
        )
    }

    #[test]
    fn test_config_default() {
        let config = ReconstructionConfig::default();
        assert_eq!(config.resolution, [64, 64, 64]);
        assert_eq!(config.extraction.iso_level, Some(0.5));
        assert!(config.validate().is_ok());
        assert_eq!(config.with_resolution(8).resolution, [8, 8, 8]);
    }

    #[test]
    fn test_empty_cloud_is_degenerate() {
        let cloud = PointCloud::<NormalPoint3d>::new();
        let result = reconstruct(&cloud, &ReconstructionConfig::default(), None);
        assert!(matches!(result, Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn test_small_resolution_is_degenerate() {
        let config = ReconstructionConfig::default().with_resolution_xyz([16, 1, 16]);
        let result = reconstruct(&tetrahedron_cloud(), &config, None);
        assert!(matches!(result, Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn test_cancelled_before_fit() {
        let config = ReconstructionConfig::default().with_resolution(8);
        let result = reconstruct(&tetrahedron_cloud(), &config, Some(&CancelImmediately));
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[test]
    fn test_vertices_land_in_world_frame() {
        let config = ReconstructionConfig::default()
            .with_rbf(RbfConfig::default().with_support_radius(0.6).with_tolerance(1e-10))
            .with_resolution(12);
        let result = reconstruct(&tetrahedron_cloud(), &config, None).unwrap();

        assert_eq!(result.iso_level, 0.5);
        let half = result.frame.extent * 0.5 + 1e-9;
        for v in &result.mesh.vertices {
            let offset: Vector3<f64> = *v - result.frame.center;
            assert!(offset.amax() <= half, "vertex {:?} outside the frame", v);
        }
    }
}
