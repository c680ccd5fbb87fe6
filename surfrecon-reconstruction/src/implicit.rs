//! Implicit surface fitting with compactly supported radial basis functions
//!
//! An oriented point cloud is turned into a scalar field that is zero on the
//! samples, positive a small step along each normal and negative a small step
//! against it. The field is a sparse sum of Wendland kernels plus an affine
//! trend, fitted by solving one sparse linear system.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use surfrecon_algorithms::KdTree;
use surfrecon_core::{Error, NormalPoint3d, Point3d, PointCloud, Result, SampleRecord};
use tracing::{debug, info, info_span, warn};

use crate::linalg::{bicgstab, SolveReport, SolverSettings, TripletBuilder};
use crate::parallel;
use crate::progress::{PlaneCounter, ProgressMsg, ProgressSink};
use crate::volume::{quantize, Volume};

/// Number of affine trend terms appended to the system
const TREND_TERMS: usize = 4;

/// Configuration for RBF fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbfConfig {
    /// Kernel support radius in normalized units
    pub support_radius: f64,
    /// Off-surface offset along the normals; `None` means half the support radius
    pub jitter: Option<f64>,
    /// Bounding-box padding factor applied when normalizing
    pub padding: f64,
    /// Maximum number of solver iterations
    pub max_iterations: usize,
    /// Relative residual at which the solver stops
    pub tolerance: f64,
    /// Treat solver non-convergence as an error instead of a warning
    pub strict_convergence: bool,
}

impl Default for RbfConfig {
    fn default() -> Self {
        Self {
            support_radius: 0.05,
            jitter: None,
            padding: 1.1,
            max_iterations: 500,
            tolerance: 1e-12,
            strict_convergence: false,
        }
    }
}

impl RbfConfig {
    pub fn with_support_radius(mut self, support_radius: f64) -> Self {
        self.support_radius = support_radius;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn with_padding(mut self, padding: f64) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_strict_convergence(mut self, strict: bool) -> Self {
        self.strict_convergence = strict;
        self
    }

    /// Offset actually used for off-surface samples
    pub fn effective_jitter(&self) -> f64 {
        self.jitter.unwrap_or(self.support_radius * 0.5)
    }

    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Kernel distances are divided by the support radius
        if self.support_radius == 0.0 {
            return Err(Error::ZeroDivision("support radius is zero".to_string()));
        }
        if self.support_radius < 0.0 || !self.support_radius.is_finite() {
            return Err(Error::InvalidData(format!(
                "support radius must be positive, got {}",
                self.support_radius
            )));
        }
        // Off-surface values are divided by the jitter
        let jitter = self.effective_jitter();
        if jitter == 0.0 {
            return Err(Error::ZeroDivision("jitter is zero".to_string()));
        }
        if jitter < 0.0 || !jitter.is_finite() {
            return Err(Error::InvalidData(format!(
                "jitter must be positive, got {}",
                jitter
            )));
        }
        if self.padding < 1.0 || !self.padding.is_finite() {
            return Err(Error::InvalidData(format!(
                "padding must be at least 1, got {}",
                self.padding
            )));
        }
        if self.tolerance < 0.0 || self.tolerance.is_nan() {
            return Err(Error::InvalidData(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Wendland φ₃,₁ kernel on a distance already divided by the support radius
#[inline]
pub fn wendland(r: f64) -> f64 {
    if r >= 1.0 {
        return 0.0;
    }
    let s = 1.0 - r;
    s * s * s * s * (4.0 * r + 1.0)
}

/// Maps a point cloud's padded bounding cube onto `[-0.5, 0.5]³`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationFrame {
    pub center: Point3d,
    /// Edge length of the padded bounding cube
    pub extent: f64,
}

impl NormalizationFrame {
    /// Frame around the bounding box of `points`, longest side scaled by `padding`
    pub fn from_points(points: &[Point3d], padding: f64) -> Result<Self> {
        let Some(first) = points.first() else {
            return Err(Error::DegenerateInput("point cloud is empty".to_string()));
        };

        let (min, max) = points
            .iter()
            .fold((*first, *first), |(min, max), p| (min.inf(p), max.sup(p)));

        let extent = (max - min).max() * padding;
        if extent <= 0.0 || !extent.is_finite() {
            return Err(Error::DegenerateInput(format!(
                "point cloud has zero or non-finite extent ({})",
                extent
            )));
        }

        Ok(Self {
            center: nalgebra::center(&min, &max),
            extent,
        })
    }

    /// Corner of the padded bounding cube
    pub fn origin(&self) -> Point3d {
        self.center - nalgebra::Vector3::repeat(self.extent * 0.5)
    }

    pub fn to_unit(&self, p: &Point3d) -> Point3d {
        Point3d::from((p - self.center) / self.extent)
    }

    pub fn from_unit(&self, p: &Point3d) -> Point3d {
        self.center + p.coords * self.extent
    }

    /// Normalized coordinate of lattice index `i` on an axis with `n` samples
    #[inline]
    pub fn lattice_to_unit(i: f64, n: usize) -> f64 {
        i / (n - 1) as f64 - 0.5
    }

    /// World position of a (possibly fractional) lattice coordinate
    pub fn lattice_to_world(&self, p: &Point3d, resolution: [usize; 3]) -> Point3d {
        self.from_unit(&Point3d::new(
            Self::lattice_to_unit(p.x, resolution[0]),
            Self::lattice_to_unit(p.y, resolution[1]),
            Self::lattice_to_unit(p.z, resolution[2]),
        ))
    }
}

/// Fits an [`ImplicitSurface`] to an oriented point cloud
#[derive(Debug, Clone, Default)]
pub struct ImplicitFitter {
    config: RbfConfig,
}

/// Interpolation constraints derived from the oriented samples
struct Constraints {
    positions: Vec<Point3d>,
    values: Vec<f64>,
    skipped_normals: usize,
}

impl ImplicitFitter {
    pub fn new(config: RbfConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RbfConfig {
        &self.config
    }

    /// Fit the implicit field.
    ///
    /// Fails with [`Error::DegenerateInput`] on an empty or zero-extent cloud
    /// and when no point carries a usable normal. Solver non-convergence is
    /// only an error with `strict_convergence`.
    pub fn fit(
        &self,
        cloud: &PointCloud<NormalPoint3d>,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<ImplicitSurface> {
        self.config.validate()?;
        let _span = info_span!("fit", points = cloud.len()).entered();

        if cloud.is_empty() {
            return Err(Error::DegenerateInput("point cloud is empty".to_string()));
        }

        let frame = NormalizationFrame::from_points(&cloud.positions(), self.config.padding)?;
        debug!(center = ?frame.center, extent = frame.extent, "normalized point cloud");

        let constraints = self.generate_constraints(cloud, &frame)?;
        let n = constraints.positions.len();

        let tree = KdTree::from_points(&constraints.positions);
        let matrix = self.assemble(&constraints.positions, &tree)?;
        debug!(
            samples = n,
            nnz = matrix.nnz(),
            size = matrix.nrows(),
            "assembled sparse system"
        );

        let mut rhs = DVector::<f64>::zeros(n + TREND_TERMS);
        rhs.rows_mut(0, n).copy_from_slice(&constraints.values);

        let (weights, report) = bicgstab(&matrix, &rhs, &self.config.solver_settings(), progress)?;

        if !report.converged {
            if self.config.strict_convergence {
                return Err(Error::SolverNonconvergence {
                    iterations: report.iterations,
                    residual: report.residual,
                });
            }
            warn!(
                iterations = report.iterations,
                residual = report.residual,
                "solver did not converge, keeping best-effort weights"
            );
        }

        info!(
            samples = n,
            iterations = report.iterations,
            residual = report.residual,
            "fitted implicit surface"
        );

        Ok(ImplicitSurface {
            frame,
            support_radius: self.config.support_radius,
            centers: constraints.positions,
            tree,
            weights,
            report,
            skipped_normals: constraints.skipped_normals,
        })
    }

    /// One on-surface and two off-surface constraints per usable point
    fn generate_constraints(
        &self,
        cloud: &PointCloud<NormalPoint3d>,
        frame: &NormalizationFrame,
    ) -> Result<Constraints> {
        let jitter = self.config.effective_jitter();

        let oriented: Vec<SampleRecord> = cloud
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let norm = p.normal.norm();
                (norm > f64::EPSILON && norm.is_finite()).then(|| {
                    SampleRecord::new(frame.to_unit(&p.position))
                        .with_normal(p.normal / norm)
                        .with_index(i)
                })
            })
            .collect();

        let skipped_normals = cloud.len() - oriented.len();
        if skipped_normals > 0 {
            warn!(skipped = skipped_normals, "skipped points with zero-length normals");
        }
        if oriented.is_empty() {
            return Err(Error::DegenerateInput(
                "no point has a usable normal".to_string(),
            ));
        }

        let surface = KdTree::new(oriented.clone());

        let lost_normal = || Error::InvalidState("oriented sample lost its normal".to_string());

        let triples = parallel::parallel_map(&oriented, |record| -> Result<[(Point3d, f64); 3]> {
            let p = record.position;
            let n = record.normal.ok_or_else(lost_normal)?;

            let off_surface = |direction: f64| -> Result<(Point3d, f64)> {
                let query = p + n * (direction * jitter);
                let near = surface.nearest(&query)?;
                let near_normal = near.normal.ok_or_else(lost_normal)?;
                Ok((query, (query - near.position).dot(&near_normal) / jitter))
            };

            Ok([(p, 0.0), off_surface(1.0)?, off_surface(-1.0)?])
        });

        let mut positions = Vec::with_capacity(oriented.len() * 3);
        let mut values = Vec::with_capacity(oriented.len() * 3);
        for triple in triples {
            for (position, value) in triple? {
                positions.push(position);
                values.push(value);
            }
        }

        Ok(Constraints {
            positions,
            values,
            skipped_normals,
        })
    }

    /// Kernel block from ball queries plus the symmetric trend border
    fn assemble(&self, positions: &[Point3d], tree: &KdTree) -> Result<crate::linalg::CsrMatrix> {
        let n = positions.len();
        let support = self.config.support_radius;

        let rows: Vec<Vec<(usize, usize, f64)>> = parallel::parallel_map_indexed(positions, |i, p| {
            tree.inside_ball(p, support)
                .into_iter()
                .filter_map(|record| {
                    let j = record.index?;
                    Some((i, j, wendland(record.distance(p) / support)))
                })
                .collect()
        });

        let nnz = rows.iter().map(Vec::len).sum::<usize>() + 2 * TREND_TERMS * n;
        let mut builder = TripletBuilder::with_capacity(n + TREND_TERMS, n + TREND_TERMS, nnz);
        builder.extend(rows.into_iter().flatten());

        for (i, p) in positions.iter().enumerate() {
            let trend = [p.x, p.y, p.z, 1.0];
            for (k, c) in trend.into_iter().enumerate() {
                builder.push(i, n + k, c);
                builder.push(n + k, i, c);
            }
        }

        builder.build()
    }
}

/// A fitted implicit field
#[derive(Debug, Clone)]
pub struct ImplicitSurface {
    frame: NormalizationFrame,
    support_radius: f64,
    centers: Vec<Point3d>,
    tree: KdTree,
    weights: DVector<f64>,
    report: SolveReport,
    skipped_normals: usize,
}

impl ImplicitSurface {
    pub fn frame(&self) -> &NormalizationFrame {
        &self.frame
    }

    pub fn solve_report(&self) -> &SolveReport {
        &self.report
    }

    /// Number of RBF centers (three per usable input point)
    pub fn center_count(&self) -> usize {
        self.centers.len()
    }

    /// Points dropped because their normal had zero length
    pub fn skipped_normals(&self) -> usize {
        self.skipped_normals
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// Field value at a point in normalized coordinates
    pub fn evaluate_unit(&self, p: &Point3d) -> f64 {
        let n = self.centers.len();
        let kernel_sum: f64 = self
            .tree
            .inside_ball(p, self.support_radius)
            .into_iter()
            .filter_map(|record| {
                let j = record.index?;
                Some(self.weights[j] * wendland(record.distance(p) / self.support_radius))
            })
            .sum();

        kernel_sum
            + self.weights[n] * p.x
            + self.weights[n + 1] * p.y
            + self.weights[n + 2] * p.z
            + self.weights[n + 3]
    }

    /// Field value at a point in world coordinates
    pub fn evaluate(&self, p: &Point3d) -> f64 {
        self.evaluate_unit(&self.frame.to_unit(p))
    }

    /// Sample the field on a lattice spanning the normalized cube.
    ///
    /// Values are clamped to `[-1, 1]` and remapped to `[0, 1]` before
    /// quantization, so the zero level sits at the middle of the range.
    pub fn rasterize(
        &self,
        resolution: [usize; 3],
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Volume> {
        if resolution.iter().any(|&n| n < 2) {
            return Err(Error::DegenerateInput(format!(
                "lattice resolution {:?} needs at least 2 samples per axis",
                resolution
            )));
        }

        let _span = info_span!("rasterize", ?resolution).entered();
        let [nx, ny, nz] = resolution;
        let mut volume = Volume::new(nx, ny, nz)?;
        let counter = PlaneCounter::new(nz, progress);

        parallel::parallel_for_each_chunk_mut(volume.samples_mut(), nx * ny, |z, plane| {
            let pz = NormalizationFrame::lattice_to_unit(z as f64, nz);
            for y in 0..ny {
                let py = NormalizationFrame::lattice_to_unit(y as f64, ny);
                for x in 0..nx {
                    let px = NormalizationFrame::lattice_to_unit(x as f64, nx);
                    let value = self.evaluate_unit(&Point3d::new(px, py, pz));
                    plane[y * nx + x] = quantize((value.clamp(-1.0, 1.0) + 1.0) * 0.5);
                }
            }
            counter.tick(|planes_done, planes_total| ProgressMsg::Lattice {
                planes_done,
                planes_total,
            });
        });

        debug!(planes = counter.done(), "lattice evaluated");
        Ok(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use surfrecon_core::Vector3d;

    fn cube_corners() -> PointCloud<NormalPoint3d> {
        let mut cloud = PointCloud::new();
        for i in 0..8 {
            let corner = Vector3d::new((i & 1) as f64, ((i >> 1) & 1) as f64, ((i >> 2) & 1) as f64);
            let normal = (corner - Vector3d::repeat(0.5)).normalize();
            cloud.push(NormalPoint3d::new(Point3d::from(corner), normal));
        }
        cloud
    }

    #[test]
    fn test_config_defaults_and_builders() {
        let config = RbfConfig::default();
        assert_eq!(config.support_radius, 0.05);
        assert_eq!(config.effective_jitter(), 0.025);
        assert_eq!(config.padding, 1.1);
        assert_eq!(config.max_iterations, 500);
        assert_eq!(config.tolerance, 1e-12);
        assert!(!config.strict_convergence);

        let config = config.with_support_radius(0.6).with_jitter(0.1);
        assert_eq!(config.effective_jitter(), 0.1);
        assert!(config.validate().is_ok());

        assert!(matches!(
            RbfConfig::default().with_support_radius(0.0).validate(),
            Err(Error::ZeroDivision(_))
        ));
        assert!(matches!(
            RbfConfig::default().with_jitter(0.0).validate(),
            Err(Error::ZeroDivision(_))
        ));
        assert!(matches!(
            RbfConfig::default().with_support_radius(-0.1).validate(),
            Err(Error::InvalidData(_))
        ));
        assert!(RbfConfig::default().with_padding(0.5).validate().is_err());
        assert!(RbfConfig::default().with_jitter(-1.0).validate().is_err());
    }

    #[test]
    fn test_wendland_kernel() {
        assert_eq!(wendland(0.0), 1.0);
        assert_eq!(wendland(1.0), 0.0);
        assert_eq!(wendland(1.5), 0.0);
        assert_relative_eq!(wendland(0.5), 0.0625 * 3.0);

        // Monotone decreasing and smooth at the support boundary
        let mut previous = wendland(0.0);
        for i in 1..=100 {
            let value = wendland(i as f64 / 100.0);
            assert!(value <= previous);
            previous = value;
        }
        assert!(wendland(0.999) < 1e-10);
    }

    #[test]
    fn test_normalization_frame() {
        let points = [Point3d::new(0.0, 0.0, 0.0), Point3d::new(2.0, 1.0, 0.5)];
        let frame = NormalizationFrame::from_points(&points, 1.0).unwrap();
        assert_eq!(frame.center, Point3d::new(1.0, 0.5, 0.25));
        assert_eq!(frame.extent, 2.0);
        assert_eq!(frame.origin(), Point3d::new(0.0, -0.5, -0.75));

        let unit = frame.to_unit(&points[1]);
        assert_eq!(unit, Point3d::new(0.5, 0.25, 0.125));
        assert_eq!(frame.from_unit(&unit), points[1]);

        assert_eq!(NormalizationFrame::lattice_to_unit(0.0, 5), -0.5);
        assert_eq!(NormalizationFrame::lattice_to_unit(4.0, 5), 0.5);
        assert_eq!(frame.lattice_to_world(&Point3d::new(0.0, 0.0, 0.0), [3, 3, 3]), frame.origin());
    }

    #[test]
    fn test_degenerate_frames() {
        assert!(matches!(
            NormalizationFrame::from_points(&[], 1.1),
            Err(Error::DegenerateInput(_))
        ));
        let same = [Point3d::new(1.0, 1.0, 1.0); 4];
        assert!(matches!(
            NormalizationFrame::from_points(&same, 1.1),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_constraints_for_cube_corners() {
        let fitter = ImplicitFitter::new(RbfConfig::default().with_support_radius(0.6).with_jitter(0.1));
        let cloud = cube_corners();
        let frame = NormalizationFrame::from_points(&cloud.positions(), 1.1).unwrap();
        let constraints = fitter.generate_constraints(&cloud, &frame).unwrap();

        assert_eq!(constraints.positions.len(), 24);
        assert_eq!(constraints.skipped_normals, 0);
        for chunk in constraints.values.chunks(3) {
            assert_eq!(chunk[0], 0.0);
            assert_relative_eq!(chunk[1], 1.0, epsilon = 1e-12);
            assert_relative_eq!(chunk[2], -1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_zero_normals_are_skipped() {
        let mut cloud = cube_corners();
        cloud.push(NormalPoint3d::new(Point3d::new(0.5, 0.5, 0.5), Vector3d::zeros()));
        let fitter = ImplicitFitter::new(RbfConfig::default().with_support_radius(0.6).with_jitter(0.1));
        let frame = NormalizationFrame::from_points(&cloud.positions(), 1.1).unwrap();
        let constraints = fitter.generate_constraints(&cloud, &frame).unwrap();
        assert_eq!(constraints.skipped_normals, 1);
        assert_eq!(constraints.positions.len(), 24);

        let unoriented: PointCloud<NormalPoint3d> = cloud
            .iter()
            .map(|p| NormalPoint3d::new(p.position, Vector3d::zeros()))
            .collect();
        assert!(matches!(
            fitter.fit(&unoriented, None),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_assembled_system_is_symmetric() {
        let fitter = ImplicitFitter::new(RbfConfig::default().with_support_radius(0.6).with_jitter(0.1));
        let cloud = cube_corners();
        let frame = NormalizationFrame::from_points(&cloud.positions(), 1.1).unwrap();
        let constraints = fitter.generate_constraints(&cloud, &frame).unwrap();
        let tree = KdTree::from_points(&constraints.positions);
        let matrix = fitter.assemble(&constraints.positions, &tree).unwrap();

        assert_eq!(matrix.nrows(), 28);
        assert!(matrix.is_symmetric(1e-15));
        assert_eq!(matrix.get(0, 0), 1.0);
        assert_eq!(matrix.get(0, 27), 1.0);
        assert_eq!(matrix.get(27, 27), 0.0);
    }

    #[test]
    fn test_fit_interpolates_constraints() {
        let config = RbfConfig::default()
            .with_support_radius(0.6)
            .with_jitter(0.1)
            .with_tolerance(1e-10);
        let cloud = cube_corners();
        let surface = ImplicitFitter::new(config).fit(&cloud, None).unwrap();

        assert!(surface.solve_report().converged);
        assert_eq!(surface.center_count(), 24);
        assert_eq!(surface.weights().len(), 28);

        for point in cloud.iter() {
            assert_relative_eq!(surface.evaluate(&point.position), 0.0, epsilon = 1e-6);
            let outside = point.position + point.normal * (0.1 * surface.frame().extent);
            assert_relative_eq!(surface.evaluate(&outside), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rasterize() {
        let config = RbfConfig::default().with_support_radius(0.6).with_jitter(0.1);
        let surface = ImplicitFitter::new(config).fit(&cube_corners(), None).unwrap();

        let volume = surface.rasterize([5, 4, 3], None).unwrap();
        assert_eq!(volume.dimensions(), [5, 4, 3]);

        let expected = (surface.evaluate_unit(&Point3d::new(0.25, 1.0 / 3.0 - 0.5, 0.0)).clamp(-1.0, 1.0) + 1.0) * 0.5;
        assert_eq!(volume.get(3, 1, 1), Some(quantize(expected)));

        assert!(matches!(
            surface.rasterize([1, 4, 4], None),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_strict_convergence() {
        let config = RbfConfig::default()
            .with_support_radius(0.6)
            .with_jitter(0.1)
            .with_max_iterations(1)
            .with_tolerance(1e-15)
            .with_strict_convergence(true);
        let result = ImplicitFitter::new(config).fit(&cube_corners(), None);
        assert!(matches!(
            result,
            Err(Error::SolverNonconvergence { iterations: 1, .. })
        ));
    }
}
