//! Minimum interference leakage.
//!
//! Receivers pick the `Ns[k]` least-interfered directions, `U_k = leig(Q_k)`;
//! transmitters then do the same on the reciprocal network,
//! `F_k = leig(sum_{j != k} P_j H_jk^H U_j U_j^H H_jk)`. Receive filters are
//! `W_k = U_k^H`.

use crate::channel::MultiUserChannel;
use crate::error::IaResult;
use crate::linalg::dense::CMatrix;
use crate::linalg::eigen::leig;
use crate::settings::{SolveInfo, SolverSettings, UserDims};

use super::{run_iterations, IaSolver, IaState};

/// Minimum-leakage IA solver.
#[derive(Debug, Clone)]
pub struct MinLeakageSolver {
    state: IaState,
}

impl MinLeakageSolver {
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

    /// Receive filters from the least eigenvectors of each interference
    /// covariance.
    pub fn update_w(&mut self) -> IaResult<()> {
        let s = &self.state;
        s.check_precoders()?;
        let p = s.power_vec()?;

        let mut w = Vec::with_capacity(s.k());
        for k in 0..s.k() {
            let q = s.calc_interference_covariance(k, &p)?;
            let (u, _) = leig(&q, s.ns()[k])?;
            w.push(u.adjoint());
        }
        self.state.w = w;
        Ok(())
    }

    /// Precoders from the least eigenvectors of the reciprocal interference
    /// covariance.
    pub fn update_f(&mut self) -> IaResult<()> {
        let s = &self.state;
        s.check_filters()?;
        let p = s.power_vec()?;
        let users = s.k();

        let mut f = Vec::with_capacity(users);
        for k in 0..users {
            let mut m = CMatrix::zeros(s.nt()[k], s.nt()[k]);
            for j in (0..users).filter(|&j| j != k) {
                // U_j^H H_jk
                let a = &s.w[j] * s.get_channel(j, k)?;
                m += (a.adjoint() * &a).scale(p[j]);
            }
            let (precoder, _) = leig(&m, s.ns()[k])?;
            f.push(precoder);
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

impl IaSolver for MinLeakageSolver {
    fn name(&self) -> &'static str {
        "min_leakage"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IaError;
    use crate::linalg::dense::{identity, max_abs_diff};

    fn solver(seed: u64) -> MinLeakageSolver {
        let mut s = MinLeakageSolver::new(MultiUserChannel::with_seeds(seed, seed + 1));
        s.state_mut().set_precoder_seed(seed + 2);
        s
    }

    #[test]
    fn test_update_w() {
        let mut s = solver(1);
        s.state_mut().randomize_h(vec![3, 4, 5], vec![2, 3, 4], 3).unwrap();
        s.state_mut().randomize_f(vec![2, 3, 4], vec![1, 2, 2], 3).unwrap();
        s.update_w().unwrap();

        let st = s.state();
        for k in 0..3 {
            let (u, _) = leig(&st.calc_q(k).unwrap(), st.ns()[k]).unwrap();
            let w = &st.w()[k];
            assert_eq!(w.shape(), (st.ns()[k], st.nr()[k]));
            assert!(max_abs_diff(w, &u.adjoint()) < 1e-10);
            assert!(max_abs_diff(&(w * w.adjoint()), &identity(st.ns()[k])) < 1e-10);
        }
    }

    #[test]
    fn test_update_f() {
        let mut s = solver(2);
        s.state_mut().randomize_h(3, 3, 3).unwrap();
        s.state_mut().randomize_f(3, 1, 3).unwrap();
        s.state_mut().set_powers(vec![1.2, 1.5, 0.9]).unwrap();
        s.update_w().unwrap();
        s.update_f().unwrap();

        let st = s.state();
        let p = st.powers();
        for k in 0..3 {
            let mut m = CMatrix::zeros(3, 3);
            for j in (0..3).filter(|&j| j != k) {
                let u = st.w()[j].adjoint();
                let h = st.get_channel(j, k).unwrap();
                m += (h.adjoint() * &u * u.adjoint() * h).scale(p[j]);
            }
            let (expected, _) = leig(&m, 1).unwrap();
            assert!(max_abs_diff(&st.f()[k], &expected) < 1e-6);
        }
    }

    #[test]
    fn test_update_f_requires_filters() {
        let mut s = solver(3);
        s.state_mut().randomize_h(2, 2, 2).unwrap();
        s.state_mut().randomize_f(2, 1, 2).unwrap();
        assert!(matches!(s.update_f(), Err(IaError::Dimension(_))));
    }

    #[test]
    fn test_leakage_non_increasing() {
        // With equal powers both updates minimise the same total leakage
        let mut s = solver(4);
        s.state_mut().randomize_h(3, 3, 4).unwrap();
        s.state_mut().randomize_f(3, 1, 4).unwrap();

        let mut costs = Vec::new();
        for _ in 0..25 {
            s.step().unwrap();
            costs.push(s.cost().unwrap());
        }
        for pair in costs.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9, "leakage rose from {} to {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_solve() {
        let mut s = solver(5);
        s.state_mut().randomize_h(vec![2, 3, 4], vec![4, 3, 2], 3).unwrap();
        s.state_mut().settings_mut().max_iterations = 5;
        let info = s.solve(UserDims::from(1)).unwrap();
        assert_eq!(info.iterations, 5);
        assert!((info.final_cost - s.cost().unwrap()).abs() < 1e-12);
        for user in s.calc_sinr_all_users().unwrap() {
            assert!(user.iter().all(|v| v.is_finite() && *v >= 0.0));
        }
    }

    #[test]
    fn test_pruning_keeps_orthonormal_streams() {
        let settings = SolverSettings::default()
            .with_max_iterations(8)
            .with_stream_pruning(0.6);
        let mut s = MinLeakageSolver::with_settings(MultiUserChannel::with_seeds(6, 7), settings);
        s.state_mut().set_precoder_seed(8);
        s.state_mut().randomize_h(4, 4, 3).unwrap();

        s.solve(UserDims::from(2)).unwrap();
        let st = s.state();
        assert_eq!(st.ns(), &[2, 2, 2]);
        for k in 0..3 {
            let f = &st.f()[k];
            assert!(max_abs_diff(&(f.adjoint() * f), &identity(2)) < 1e-10);
            assert_eq!(st.w()[k].shape(), (2, 4));
        }
    }
}
