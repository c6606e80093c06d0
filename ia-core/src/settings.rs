//! Solver settings, per-user dimension arguments and solve reports.

use std::fmt;

use crate::error::{IaError, IaResult};

/// Per-user dimension argument.
///
/// Antenna and stream counts can be given either once for every user or as
/// one value per user:
///
/// ```
/// use ia_core::UserDims;
///
/// let uniform: UserDims = 3.into();
/// let per_user: UserDims = vec![2, 3, 5].into();
/// assert_eq!(uniform.resolve(3).unwrap(), vec![3, 3, 3]);
/// assert_eq!(per_user.resolve(3).unwrap(), vec![2, 3, 5]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDims {
    /// Same value for every user.
    Uniform(usize),
    /// One value per user.
    PerUser(Vec<usize>),
}

impl UserDims {
    /// Expand to a vector of length `k`.
    ///
    /// Fails with [`IaError::Dimension`] when a per-user vector does not have
    /// exactly `k` entries.
    pub fn resolve(&self, k: usize) -> IaResult<Vec<usize>> {
        match self {
            UserDims::Uniform(v) => Ok(vec![*v; k]),
            UserDims::PerUser(values) => {
                if values.len() != k {
                    return Err(IaError::Dimension(format!(
                        "expected {} per-user values, got {}",
                        k,
                        values.len()
                    )));
                }
                Ok(values.clone())
            }
        }
    }
}

impl From<usize> for UserDims {
    fn from(v: usize) -> Self {
        UserDims::Uniform(v)
    }
}

impl From<Vec<usize>> for UserDims {
    fn from(v: Vec<usize>) -> Self {
        UserDims::PerUser(v)
    }
}

impl From<&[usize]> for UserDims {
    fn from(v: &[usize]) -> Self {
        UserDims::PerUser(v.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for UserDims {
    fn from(v: [usize; N]) -> Self {
        UserDims::PerUser(v.to_vec())
    }
}

/// Solver settings and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    /// Number of outer iterations run by the iterative solvers.
    /// Ignored by the closed-form solver.
    pub max_iterations: usize,

    /// Log per-iteration cost at debug level
    pub verbose: bool,

    /// Stop early once |cost_prev - cost| <= tol (None = always run
    /// `max_iterations`)
    pub early_stop_tol: Option<f64>,

    /// Drop streams whose precoder column energy is below tol times the
    /// strongest column of that user after solve (None = keep the
    /// requested stream counts)
    pub stream_prune_tol: Option<f64>,

    /// Bisection steps for the MMSE power-constraint multiplier
    pub mmse_bisection_iters: usize,

    /// Relative tolerance on the MMSE precoder norm during bisection
    pub mmse_mu_tol: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        // Allow environment overrides so simulation scripts can change the
        // iteration budget without recompiling
        let max_iterations = std::env::var("IA_MAX_ITERATIONS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(120);

        let verbose = std::env::var("IA_VERBOSE")
            .ok()
            .map(|s| s != "0" && s.to_lowercase() != "false")
            .unwrap_or(false);

        Self {
            max_iterations,
            verbose,
            early_stop_tol: None,
            stream_prune_tol: None,
            mmse_bisection_iters: 60,
            mmse_mu_tol: 1e-10,
        }
    }
}

impl SolverSettings {
    /// Create settings with verbose output enabled.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            ..Self::default()
        }
    }

    /// Set the iteration budget.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Enable cost-based early stopping.
    pub fn with_early_stop(mut self, tol: f64) -> Self {
        self.early_stop_tol = Some(tol);
        self
    }

    /// Enable stream pruning after solve.
    pub fn with_stream_pruning(mut self, tol: f64) -> Self {
        self.stream_prune_tol = Some(tol);
        self
    }

    /// Validate tolerances.
    pub fn validate(&self) -> IaResult<()> {
        if let Some(tol) = self.early_stop_tol {
            if !tol.is_finite() || tol < 0.0 {
                return Err(IaError::InvalidParameter(format!(
                    "early_stop_tol must be finite and non-negative, got {}",
                    tol
                )));
            }
        }
        if let Some(tol) = self.stream_prune_tol {
            if !tol.is_finite() || !(0.0..1.0).contains(&tol) {
                return Err(IaError::InvalidParameter(format!(
                    "stream_prune_tol must be in [0, 1), got {}",
                    tol
                )));
            }
        }
        if !(self.mmse_mu_tol > 0.0) {
            return Err(IaError::InvalidParameter(format!(
                "mmse_mu_tol must be positive, got {}",
                self.mmse_mu_tol
            )));
        }
        Ok(())
    }
}

/// How a call to `solve` terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Ran the full iteration budget
    MaxIterations,

    /// Cost change fell below `early_stop_tol`
    Converged,

    /// Direct algebraic solution, no iterations
    ClosedForm,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::MaxIterations => write!(f, "MaxIterations"),
            SolveStatus::Converged => write!(f, "Converged"),
            SolveStatus::ClosedForm => write!(f, "ClosedForm"),
        }
    }
}

/// Summary of one `solve` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveInfo {
    /// Termination status
    pub status: SolveStatus,

    /// Number of iterations completed
    pub iterations: usize,

    /// Cost after the last iteration
    pub final_cost: f64,

    /// Wall-clock solve time (milliseconds)
    pub solve_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_dims_resolve() {
        assert_eq!(UserDims::from(2).resolve(4).unwrap(), vec![2, 2, 2, 2]);
        assert_eq!(UserDims::from([1, 2]).resolve(2).unwrap(), vec![1, 2]);
        assert!(matches!(
            UserDims::from(vec![1, 2, 3]).resolve(2),
            Err(IaError::Dimension(_))
        ));
    }

    #[test]
    fn test_settings_builders() {
        let s = SolverSettings::default()
            .with_max_iterations(7)
            .with_early_stop(1e-9)
            .with_stream_pruning(1e-6);
        assert_eq!(s.max_iterations, 7);
        assert_eq!(s.early_stop_tol, Some(1e-9));
        assert_eq!(s.stream_prune_tol, Some(1e-6));
        assert!(s.validate().is_ok());
        assert!(SolverSettings::verbose().verbose);
    }

    #[test]
    fn test_settings_validation() {
        let s = SolverSettings::default().with_early_stop(-1.0);
        assert!(s.validate().is_err());

        let s = SolverSettings::default().with_stream_pruning(1.5);
        assert!(s.validate().is_err());

        let s = SolverSettings {
            mmse_mu_tol: 0.0,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SolveStatus::MaxIterations.to_string(), "MaxIterations");
        assert_eq!(SolveStatus::ClosedForm.to_string(), "ClosedForm");
    }
}
