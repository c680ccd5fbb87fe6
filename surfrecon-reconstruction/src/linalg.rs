//! Sparse linear algebra for the RBF system
//!
//! Systems are assembled as an append-only list of `(row, col, value)`
//! triplets and finalized into compressed sparse rows. [`bicgstab`] solves
//! the resulting square system with a Jacobi preconditioner.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use surfrecon_core::{Error, Result};

use crate::parallel;
use crate::progress::{progress_from_residual, ProgressMsg, ProgressSink};

/// Append-only triplet list for sparse matrix assembly
#[derive(Debug, Clone, Default)]
pub struct TripletBuilder {
    n_rows: usize,
    n_cols: usize,
    triplets: Vec<(usize, usize, f64)>,
}

impl TripletBuilder {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            triplets: Vec::new(),
        }
    }

    pub fn with_capacity(n_rows: usize, n_cols: usize, capacity: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            triplets: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.triplets.push((row, col, value));
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Finalize into CSR; entries at the same position are summed
    pub fn build(mut self) -> Result<CsrMatrix> {
        if let Some(&(row, col, _)) = self
            .triplets
            .iter()
            .find(|(r, c, _)| *r >= self.n_rows || *c >= self.n_cols)
        {
            return Err(Error::InvalidData(format!(
                "triplet ({}, {}) outside a {}x{} matrix",
                row, col, self.n_rows, self.n_cols
            )));
        }

        self.triplets
            .sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_offsets = vec![0usize; self.n_rows + 1];
        let mut col_indices: Vec<usize> = Vec::with_capacity(self.triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(self.triplets.len());
        let mut last: Option<(usize, usize)> = None;

        for (row, col, value) in self.triplets {
            if last == Some((row, col)) {
                if let Some(v) = values.last_mut() {
                    *v += value;
                }
                continue;
            }
            col_indices.push(col);
            values.push(value);
            row_offsets[row + 1] += 1;
            last = Some((row, col));
        }

        for r in 0..self.n_rows {
            row_offsets[r + 1] += row_offsets[r];
        }

        Ok(CsrMatrix {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            row_offsets,
            col_indices,
            values,
        })
    }
}

impl Extend<(usize, usize, f64)> for TripletBuilder {
    fn extend<I: IntoIterator<Item = (usize, usize, f64)>>(&mut self, iter: I) {
        self.triplets.extend(iter);
    }
}

/// Compressed sparse row matrix
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn nrows(&self) -> usize {
        self.n_rows
    }

    pub fn ncols(&self) -> usize {
        self.n_cols
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Stored columns and values of `row`
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.row_offsets[row]..self.row_offsets[row + 1];
        (&self.col_indices[range.clone()], &self.values[range])
    }

    /// Entry at `(row, col)`; zero when not stored
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.n_rows {
            return 0.0;
        }
        let (cols, values) = self.row(row);
        cols.binary_search(&col).map_or(0.0, |i| values[i])
    }

    pub fn diagonal(&self) -> DVector<f64> {
        DVector::from_fn(self.n_rows.min(self.n_cols), |i, _| self.get(i, i))
    }

    /// `self * x`, rows computed in parallel
    pub fn mul_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        if x.len() != self.n_cols {
            return Err(Error::InvalidData(format!(
                "vector of length {} cannot multiply a {}x{} matrix",
                x.len(),
                self.n_rows,
                self.n_cols
            )));
        }

        let rows = parallel::parallel_map_range(self.n_rows, |r| {
            let (cols, values) = self.row(r);
            cols.iter().zip(values).map(|(&c, v)| v * x[c]).sum::<f64>()
        });
        Ok(DVector::from_vec(rows))
    }

    /// Whether the matrix equals its transpose up to `tol`
    pub fn is_symmetric(&self, tol: f64) -> bool {
        self.n_rows == self.n_cols
            && (0..self.n_rows).all(|r| {
                let (cols, values) = self.row(r);
                cols.iter()
                    .zip(values)
                    .all(|(&c, v)| (self.get(c, r) - v).abs() <= tol)
            })
    }
}

/// Outcome of an iterative solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    /// Relative residual `‖b − Ax‖ / ‖b‖` of the returned solution
    pub residual: f64,
    pub converged: bool,
}

/// Stopping criteria for [`bicgstab`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-12,
        }
    }
}

/// Jacobi-preconditioned BiCGSTAB for square systems.
///
/// Stops once the relative residual drops to `settings.tolerance` or after
/// `settings.max_iterations`. The recurrences restart from the current
/// iterate when they break down. Returns the best-effort solution together
/// with its [`SolveReport`]; non-convergence is not an error here.
pub fn bicgstab(
    a: &CsrMatrix,
    b: &DVector<f64>,
    settings: &SolverSettings,
    progress: Option<&dyn ProgressSink>,
) -> Result<(DVector<f64>, SolveReport)> {
    let n = b.len();
    if a.nrows() != n || a.ncols() != n {
        return Err(Error::InvalidData(format!(
            "{}x{} matrix does not match right-hand side of length {}",
            a.nrows(),
            a.ncols(),
            n
        )));
    }

    let mut x = DVector::<f64>::zeros(n);
    let rhs_norm = b.norm();
    if rhs_norm == 0.0 {
        return Ok((
            x,
            SolveReport {
                iterations: 0,
                residual: 0.0,
                converged: true,
            },
        ));
    }

    // Zero diagonal entries (the trend block) are left unscaled
    let inv_diag = a
        .diagonal()
        .map(|d| if d.abs() > f64::EPSILON { 1.0 / d } else { 1.0 });
    let precondition = |v: &DVector<f64>| v.component_mul(&inv_diag);

    let within_tolerance = |r: &DVector<f64>| r.norm() / rhs_norm <= settings.tolerance;
    let breakdown = f64::EPSILON * f64::EPSILON;

    let mut r = b - a.mul_vec(&x)?;
    let mut r0 = r.clone();
    let mut r0_sq = r0.norm_squared();
    let mut rho = 1.0;
    let mut alpha = 1.0;
    let mut w = 1.0;
    let mut v = DVector::<f64>::zeros(n);
    let mut p = DVector::<f64>::zeros(n);

    let mut iterations = 0;
    let mut restarts = 0usize;
    let mut restart = false;

    loop {
        if within_tolerance(&r) {
            // The recurrence residual drifts from b − Ax, so confirm before stopping
            r = b - a.mul_vec(&x)?;
            if within_tolerance(&r) {
                break;
            }
            restart = true;
        }
        if iterations >= settings.max_iterations {
            break;
        }

        let rho_old = rho;
        rho = r0.dot(&r);

        let restarting = restart || rho.abs() < breakdown * r0_sq;
        if restarting {
            // Restart the recurrences from the current iterate
            r = b - a.mul_vec(&x)?;
            r0 = r.clone();
            r0_sq = r0.norm_squared();
            rho = r0_sq;
            alpha = 1.0;
            w = 1.0;
            v.fill(0.0);
            p.fill(0.0);
            restart = false;
            restarts += 1;
            if rho == 0.0 {
                break;
            }
        }

        let beta = if restarting {
            0.0
        } else {
            (rho / rho_old) * (alpha / w)
        };
        p = &r + beta * (&p - w * &v);

        let y = precondition(&p);
        v = a.mul_vec(&y)?;

        let r0v = r0.dot(&v);
        if r0v.abs() < breakdown * r0_sq {
            restart = true;
            iterations += 1;
            continue;
        }
        alpha = rho / r0v;

        let s = &r - alpha * &v;
        let z = precondition(&s);
        let t = a.mul_vec(&z)?;

        let tt = t.norm_squared();
        w = if tt > 0.0 { t.dot(&s) / tt } else { 0.0 };

        x += alpha * &y + w * &z;
        r = &s - w * &t;
        iterations += 1;

        // w = 0 would divide the next beta by zero
        restart = w == 0.0;

        if let Some(sink) = progress {
            let residual = r.norm() / rhs_norm;
            sink.emit(ProgressMsg::SolverIteration {
                iter: iterations,
                residual,
                progress: progress_from_residual(residual, 1.0, settings.tolerance),
            });
        }
    }

    let residual = (b - a.mul_vec(&x)?).norm() / rhs_norm;
    let converged = residual <= settings.tolerance;

    tracing::debug!(iterations, restarts, residual, converged, "bicgstab finished");

    Ok((
        x,
        SolveReport {
            iterations,
            residual,
            converged,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn laplacian_1d(n: usize) -> CsrMatrix {
        let mut builder = TripletBuilder::new(n, n);
        for i in 0..n {
            builder.push(i, i, 2.0);
            if i > 0 {
                builder.push(i, i - 1, -1.0);
            }
            if i + 1 < n {
                builder.push(i, i + 1, -1.0);
            }
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_duplicates_are_summed() {
        let mut builder = TripletBuilder::new(2, 2);
        builder.push(1, 0, 1.5);
        builder.push(0, 0, 1.0);
        builder.push(1, 0, 2.5);
        builder.push(0, 1, -1.0);
        let m = builder.build().unwrap();

        assert_eq!(m.nnz(), 3);
        assert_eq!(m.get(1, 0), 4.0);
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(m.row(0).0, &[0, 1]);
    }

    #[test]
    fn test_out_of_range_triplet() {
        let mut builder = TripletBuilder::new(2, 2);
        builder.push(2, 0, 1.0);
        assert!(matches!(builder.build(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_empty_rows() {
        let mut builder = TripletBuilder::new(4, 4);
        builder.push(3, 3, 1.0);
        let m = builder.build().unwrap();
        assert_eq!(m.row(0).0.len(), 0);
        assert_eq!(m.row(3).1, &[1.0]);
    }

    #[test]
    fn test_mul_vec() {
        let m = laplacian_1d(4);
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let y = m.mul_vec(&x).unwrap();
        assert_eq!(y, DVector::from_vec(vec![0.0, 0.0, 0.0, 5.0]));

        assert!(m.mul_vec(&DVector::zeros(3)).is_err());
        assert!(m.is_symmetric(0.0));
    }

    #[test]
    fn test_bicgstab_spd_system() {
        let n = 50;
        let m = laplacian_1d(n);
        let expected = DVector::from_fn(n, |i, _| (i as f64 * 0.3).sin());
        let b = m.mul_vec(&expected).unwrap();

        let settings = SolverSettings {
            max_iterations: 500,
            tolerance: 1e-10,
        };
        let (x, report) = bicgstab(&m, &b, &settings, None).unwrap();

        assert!(report.converged);
        assert!(report.residual < 1e-8);
        for i in 0..n {
            assert_relative_eq!(x[i], expected[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_bicgstab_saddle_point_system() {
        // [[K, P], [Pᵀ, 0]] with K diagonal dominant and P a column of ones
        let n = 6;
        let mut builder = TripletBuilder::new(n + 1, n + 1);
        for i in 0..n {
            builder.push(i, i, 4.0);
            if i + 1 < n {
                builder.push(i, i + 1, 1.0);
                builder.push(i + 1, i, 1.0);
            }
            builder.push(i, n, 1.0);
            builder.push(n, i, 1.0);
        }
        let m = builder.build().unwrap();
        let b = DVector::from_fn(n + 1, |i, _| if i < n { i as f64 - 2.5 } else { 0.0 });

        let (x, report) = bicgstab(&m, &b, &SolverSettings { max_iterations: 200, tolerance: 1e-10 }, None).unwrap();

        assert!(report.converged);
        let residual = (&b - m.mul_vec(&x).unwrap()).norm() / b.norm();
        assert!(residual < 1e-8);
    }

    #[test]
    fn test_bicgstab_zero_rhs() {
        let m = laplacian_1d(3);
        let (x, report) = bicgstab(&m, &DVector::zeros(3), &SolverSettings::default(), None).unwrap();
        assert_eq!(x, DVector::zeros(3));
        assert_eq!(report.iterations, 0);
        assert!(report.converged);
    }

    #[test]
    fn test_bicgstab_iteration_budget() {
        let n = 200;
        let m = laplacian_1d(n);
        let b = DVector::from_element(n, 1.0);
        let settings = SolverSettings {
            max_iterations: 2,
            tolerance: 1e-14,
        };
        let (_, report) = bicgstab(&m, &b, &settings, None).unwrap();
        assert_eq!(report.iterations, 2);
        assert!(!report.converged);
        assert!(report.residual > 1e-14);
    }

    #[test]
    fn test_converged_agrees_with_true_residual() {
        let n = 100;
        let m = laplacian_1d(n);
        let b = DVector::from_fn(n, |i, _| ((i * 7) % 11) as f64 - 5.0);

        for tolerance in [1e-6, 1e-8, 1e-10] {
            let settings = SolverSettings {
                max_iterations: 2000,
                tolerance,
            };
            let (x, report) = bicgstab(&m, &b, &settings, None).unwrap();
            let residual = (&b - m.mul_vec(&x).unwrap()).norm() / b.norm();

            assert!(report.converged, "tolerance {}", tolerance);
            assert_relative_eq!(report.residual, residual, max_relative = 1e-9);
            assert!(report.residual <= tolerance);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let m = laplacian_1d(3);
        assert!(bicgstab(&m, &DVector::zeros(4), &SolverSettings::default(), None).is_err());
    }
}
