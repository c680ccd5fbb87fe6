//! Error types for surfrecon

use thiserror::Error;

/// Main error type for surfrecon operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A query was issued against a structure that cannot answer it (e.g. an empty index)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Axis index outside {0, 1, 2}
    #[error("Dimension index {index} out of range (expected 0, 1 or 2)")]
    DimensionOutOfRange { index: usize },

    /// The iterative solver exhausted its iteration budget
    #[error("Solver did not converge after {iterations} iterations (residual {residual:e})")]
    SolverNonconvergence { iterations: usize, residual: f64 },

    /// Input that cannot produce a surface (empty cloud, lattice too small, ...)
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// A parameter used as a divisor is zero (support radius, jitter)
    #[error("Division by zero: {0}")]
    ZeroDivision(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Whether the error reports a numerical quality problem rather than a structural one.
    ///
    /// Callers may choose to continue with best-effort results for these.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::SolverNonconvergence { .. })
    }
}

/// Result type alias for surfrecon operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::DimensionOutOfRange { index: 3 };
        assert!(err.to_string().contains("3"));

        let err = Error::SolverNonconvergence { iterations: 500, residual: 1.5e-3 };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("1.5e-3"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::SolverNonconvergence { iterations: 1, residual: 1.0 }.is_recoverable());
        assert!(!Error::InvalidState("empty".to_string()).is_recoverable());
        assert!(!Error::DegenerateInput("no points".to_string()).is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.vol");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
