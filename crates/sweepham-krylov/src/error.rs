//! Error type shared by the iterative solvers.

use thiserror::Error;

/// Failure modes of the iterative solvers.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The hard iteration cap was exhausted without convergence.
    #[error("{solver} exceeded the hard iteration cap of {max_iter}")]
    MaxIterationExceeded {
        solver: &'static str,
        max_iter: usize,
    },

    /// The iteration broke down (e.g. a division by a vanishing pivot).
    #[error("{solver} broke down: {reason}")]
    Breakdown {
        solver: &'static str,
        reason: String,
    },

    /// Inconsistent input dimensions.
    #[error("{solver}: dimension mismatch ({expected} vs {actual})")]
    DimensionMismatch {
        solver: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Result type for solver routines.
pub type Result<T> = std::result::Result<T, SolverError>;
