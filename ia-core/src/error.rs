//! Error types for the interference alignment solvers.

use thiserror::Error;

/// Errors that can occur while building channels or running a solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IaError {
    /// Per-user dimension vectors disagree with K, or a stream count
    /// exceeds the available antennas.
    #[error("Dimension error: {0}")]
    Dimension(String),

    /// A user index fell outside `[0, K)`.
    #[error("Index {index} out of range for {k} users")]
    Index {
        /// Offending index
        index: usize,
        /// Number of users
        k: usize,
    },

    /// Operation has no implementation on the base solver state.
    #[error("{0} is not implemented for this solver")]
    NotImplemented(&'static str),

    /// Closed-form solver invoked outside its supported pattern.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// A matrix that must be inverted is singular. Callers usually redraw
    /// the channel and retry the trial.
    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    /// Non-Hermitian eigen-decomposition failed to converge.
    #[error("Eigen-decomposition failed: {0}")]
    EigenDecomposition(String),

    /// Invalid scalar parameter (noise variance, powers, tolerances).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for IA operations.
pub type IaResult<T> = Result<T, IaError>;

/// Check that `index` is a valid user index for `k` users.
pub(crate) fn check_index(index: usize, k: usize) -> IaResult<()> {
    if index >= k {
        return Err(IaError::Index { index, k });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_index() {
        assert!(check_index(0, 3).is_ok());
        assert!(check_index(2, 3).is_ok());
        assert_eq!(check_index(3, 3), Err(IaError::Index { index: 3, k: 3 }));
    }

    #[test]
    fn test_error_display() {
        let err = IaError::Index { index: 4, k: 2 };
        assert_eq!(err.to_string(), "Index 4 out of range for 2 users");

        let err = IaError::NotImplemented("solve");
        assert_eq!(err.to_string(), "solve is not implemented for this solver");
    }
}
