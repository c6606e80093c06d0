//! MMSE-based interference alignment.
//!
//! Receivers use the regularised MMSE filter
//!
//! ```text
//! U_k = (sum_j P_j H_kj F_j F_j^H H_kj^H + noise I)^-1 H_kk F_k sqrt(P_k)
//! ```
//!
//! and transmitters solve the reciprocal problem under a unit power
//! constraint,
//!
//! ```text
//! V_k = (sum_j P_j H_jk^H U_j U_j^H H_jk + mu_k I)^-1 H_kk^H U_k sqrt(P_k)
//! ```
//!
//! with `mu_k >= 0` the smallest multiplier giving `||V_k||_F <= 1`. The
//! precoder is `F_k = V_k / ||V_k||_F` and the filter `W_k = U_k^H`.

use crate::channel::MultiUserChannel;
use crate::error::IaResult;
use crate::linalg::dense::{identity, inverse, normalize_fro, outer, CMatrix};
use crate::settings::{SolveInfo, SolverSettings, UserDims};

use super::{run_iterations, IaSolver, IaState};

/// MMSE IA solver.
#[derive(Debug, Clone)]
pub struct MmseSolver {
    state: IaState,
}

impl MmseSolver {
    pub fn new(channel: MultiUserChannel) -> Self {
        Self {
            state: IaState::new(channel),
        }
    }

    pub fn with_settings(channel: MultiUserChannel, settings: SolverSettings) -> Self {
        Self {
            state: IaState::with_settings(channel, settings),
        }
    }

    /// MMSE receive filters for the current precoders.
    pub fn update_w(&mut self) -> IaResult<()> {
        let s = &self.state;
        s.check_precoders()?;
        let p = s.power_vec()?;
        let users = s.k();

        let mut w = Vec::with_capacity(users);
        for k in 0..users {
            let nr = s.nr()[k];
            let mut cov = identity(nr).scale(s.noise_var());
            for j in 0..users {
                cov += outer(&(s.get_channel(k, j)? * &s.f[j])).scale(p[j]);
            }
            let inv = inverse(&cov, &format!("received covariance of user {}", k))?;
            let u = inv * (s.get_channel(k, k)? * &s.f[k]).scale(p[k].sqrt());
            w.push(u.adjoint());
        }
        self.state.w = w;
        Ok(())
    }

    /// Power-constrained MMSE precoders for the current filters.
    pub fn update_f(&mut self) -> IaResult<()> {
        let s = &self.state;
        s.check_filters()?;
        let p = s.power_vec()?;
        let users = s.k();
        let settings = s.settings();

        let mut f = Vec::with_capacity(users);
        for k in 0..users {
            let nt = s.nt()[k];
            let mut cov = CMatrix::zeros(nt, nt);
            for j in 0..users {
                // U_j^H H_jk
                let a = &s.w[j] * s.get_channel(j, k)?;
                cov += (a.adjoint() * &a).scale(p[j]);
            }
            let rhs = (&s.w[k] * s.get_channel(k, k)?).adjoint().scale(p[k].sqrt());
            let v = power_constrained_solve(
                &cov,
                &rhs,
                settings.mmse_bisection_iters,
                settings.mmse_mu_tol,
            )?;
            f.push(normalize_fro(&v));
        }
        self.state.f = f;
        Ok(())
    }

    /// Precoders from the current filters, then filters from the new
    /// precoders.
    pub fn step(&mut self) -> IaResult<()> {
        if self.state.check_filters().is_err() {
            self.update_w()?;
        }
        self.update_f()?;
        self.update_w()
    }
}

impl IaSolver for MmseSolver {
    fn name(&self) -> &'static str {
        "mmse"
    }

    fn state(&self) -> &IaState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut IaState {
        &mut self.state
    }

    fn solve(&mut self, ns: UserDims) -> IaResult<SolveInfo> {
        self.state.prepare(ns)?;
        run_iterations(self, |solver| solver.step())
    }

    fn refresh_after_pruning(&mut self) -> IaResult<()> {
        self.update_w()
    }

    fn cost(&self) -> IaResult<f64> {
        self.state.interference_leakage()
    }
}

/// Solve `(a + mu I) v = b` for the smallest `mu >= 0` with `||v||_F <= 1`.
///
/// `a` must be Hermitian positive semi-definite. Since
/// `||(a + mu I)^-1 b|| <= ||b|| / mu`, the multiplier lies in `[0, ||b||]`
/// and is found by bisection.
fn power_constrained_solve(
    a: &CMatrix,
    b: &CMatrix,
    max_iters: usize,
    mu_tol: f64,
) -> IaResult<CMatrix> {
    let n = a.nrows();
    let eye = identity(n);
    let solve_at = |mu: f64| -> IaResult<CMatrix> {
        let inv = inverse(&(a + eye.scale(mu)), "regularised transmit covariance")?;
        Ok(inv * b)
    };

    // Unconstrained solution already feasible (a singular `a` falls through)
    if let Ok(v) = solve_at(0.0) {
        if v.norm() <= 1.0 {
            return Ok(v);
        }
    }

    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok(CMatrix::zeros(n, b.ncols()));
    }

    let mut lo = 0.0;
    let mut hi = b_norm;
    for _ in 0..max_iters {
        if hi - lo <= mu_tol * hi {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if solve_at(mid)?.norm() <= 1.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    solve_at(hi)
}
