//! Closed-form alignment for three users.
//!
//! With `K = 3`, `Nr = Nt = M` for every user and `Ns = M / 2`, interference
//! can be aligned exactly without iterating. Let
//!
//! ```text
//! E = H_20^-1 H_21 H_01^-1 H_02 H_12^-1 H_10
//! ```
//!
//! Then `F_0` spans `Ns` eigenvectors of `E`, `F_1 = H_21^-1 H_20 F_0` and
//! `F_2 = H_12^-1 H_10 F_0`. Receivers 1 and 2 see their two interferers
//! along identical directions by construction; receiver 0 does because `F_0`
//! is an invariant subspace of `E`. Each receive filter projects onto the
//! `Ns` least-interfered directions, `W_k = leig(Q_k)^H`.

use std::time::Instant;

use crate::channel::MultiUserChannel;
use crate::error::{IaError, IaResult};
use crate::linalg::dense::{inverse, normalize_fro, CMatrix};
use crate::linalg::eigen::{leig, select_general_eigenvectors};
use crate::settings::{SolveInfo, SolveStatus, SolverSettings, UserDims};

use super::{IaSolver, IaState};

/// Closed-form IA solver for the symmetric three-user channel.
///
/// `max_iterations` is ignored.
#[derive(Debug, Clone)]
pub struct ClosedFormSolver {
    state: IaState,
}

impl ClosedFormSolver {
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

    /// Check the supported pattern and return the stream count per user.
    fn check_configuration(&self, ns: &UserDims) -> IaResult<usize> {
        let s = &self.state;
        if s.k() != 3 {
            return Err(IaError::UnsupportedConfiguration(format!(
                "closed form needs exactly 3 users, got {}",
                s.k()
            )));
        }

        let m = s.nr()[0];
        if s.nr().iter().chain(s.nt().iter()).any(|&n| n != m) {
            return Err(IaError::UnsupportedConfiguration(format!(
                "closed form needs Nr = Nt = M for every user, got Nr = {:?}, Nt = {:?}",
                s.nr(),
                s.nt()
            )));
        }
        if m % 2 != 0 {
            return Err(IaError::UnsupportedConfiguration(format!(
                "closed form needs an even antenna count, got {}",
                m
            )));
        }

        let streams = ns.resolve(3)?;
        if streams.iter().any(|&n| n != m / 2) {
            return Err(IaError::UnsupportedConfiguration(format!(
                "closed form needs Ns = {} for every user, got {:?}",
                m / 2,
                streams
            )));
        }
        Ok(m / 2)
    }

    /// Precoders from the alignment conditions.
    fn compute_precoders(&self, ns: usize) -> IaResult<Vec<CMatrix>> {
        let s = &self.state;
        let h = |k: usize, j: usize| s.get_channel(k, j);
        let inv = |k: usize, j: usize| -> IaResult<CMatrix> {
            inverse(s.get_channel(k, j)?, &format!("H[{}][{}]", k, j))
        };

        let e = inv(2, 0)? * h(2, 1)? * inv(0, 1)? * h(0, 2)? * inv(1, 2)? * h(1, 0)?;
        let f0 = select_general_eigenvectors(&e, ns)?;
        let f1 = inv(2, 1)? * h(2, 0)? * &f0;
        let f2 = inv(1, 2)? * h(1, 0)? * &f0;

        Ok(vec![
            normalize_fro(&f0),
            normalize_fro(&f1),
            normalize_fro(&f2),
        ])
    }
}

impl IaSolver for ClosedFormSolver {
    fn name(&self) -> &'static str {
        "closed_form"
    }

    fn state(&self) -> &IaState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut IaState {
        &mut self.state
    }

    fn solve(&mut self, ns: UserDims) -> IaResult<SolveInfo> {
        let start = Instant::now();
        let streams = self.check_configuration(&ns)?;
        self.state.prepare(ns)?;

        self.state.f = self.compute_precoders(streams)?;

        let p = self.state.power_vec()?;
        let mut w = Vec::with_capacity(3);
        for k in 0..3 {
            let q = self.state.calc_interference_covariance(k, &p)?;
            let (u, _) = leig(&q, streams)?;
            w.push(u.adjoint());
        }
        self.state.w = w;

        let final_cost = self.cost()?;
        let solve_time_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "{}: {} with {} streams per user, cost={:.6e}, time={}ms",
            self.name(),
            SolveStatus::ClosedForm,
            streams,
            final_cost,
            solve_time_ms
        );

        Ok(SolveInfo {
            status: SolveStatus::ClosedForm,
            iterations: 0,
            final_cost,
            solve_time_ms,
        })
    }

    fn cost(&self) -> IaResult<f64> {
        self.state.interference_leakage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::dense::{fro_norm_sqr, max_abs_diff};

    fn solver(seed: u64) -> ClosedFormSolver {
        ClosedFormSolver::new(MultiUserChannel::with_seeds(seed, seed + 1))
    }

    /// Leakage relative to the total received interference power.
    fn relative_leakage(s: &ClosedFormSolver) -> f64 {
        let st = s.state();
        let mut total = 0.0;
        for k in 0..3 {
            for j in (0..3).filter(|&j| j != k) {
                total += fro_norm_sqr(&(st.get_channel(k, j).unwrap() * &st.f()[j]));
            }
        }
        s.cost().unwrap() / total
    }

    #[test]
    fn test_aligns_two_antennas() {
        let mut s = solver(1);
        s.state_mut().randomize_h(2, 2, 3).unwrap();
        let info = s.solve(UserDims::from(1)).unwrap();

        assert_eq!(info.status, SolveStatus::ClosedForm);
        assert_eq!(info.iterations, 0);
        assert!(relative_leakage(&s) < 1e-8, "leakage {}", relative_leakage(&s));
        for f in s.state().f() {
            assert_eq!(f.shape(), (2, 1));
            assert!((f.norm() - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_aligns_four_antennas() {
        let mut s = solver(2);
        s.state_mut().randomize_h(4, 4, 3).unwrap();
        s.solve(UserDims::from(2)).unwrap();

        assert!(relative_leakage(&s) < 1e-8, "leakage {}", relative_leakage(&s));
        assert_eq!(s.state().ns(), &[2, 2, 2]);
        for user in s.calc_sinr_all_users().unwrap() {
            assert!(user.iter().all(|v| v.is_finite() && *v >= 0.0));
        }
    }

    #[test]
    fn test_receivers_one_and_two_aligned_exactly() {
        let mut s = solver(3);
        s.state_mut().randomize_h(2, 2, 3).unwrap();
        s.solve(UserDims::from(1)).unwrap();

        // Interference directions at receiver 1 coincide up to scale
        let st = s.state();
        let a = normalize_fro(&(st.get_channel(1, 0).unwrap() * &st.f()[0]));
        let b = normalize_fro(&(st.get_channel(1, 2).unwrap() * &st.f()[2]));
        let overlap = (a.adjoint() * &b)[(0, 0)].norm();
        assert!((overlap - 1.0).abs() < 1e-10);
        assert!(max_abs_diff(&(&a * a.adjoint()), &(&b * b.adjoint())) < 1e-10);
    }

    #[test]
    fn test_unsupported_configurations() {
        let mut s = solver(4);
        s.state_mut().randomize_h(2, 2, 2).unwrap();
        assert!(matches!(
            s.solve(UserDims::from(1)),
            Err(IaError::UnsupportedConfiguration(_))
        ));

        s.state_mut().randomize_h(3, 3, 3).unwrap();
        assert!(matches!(
            s.solve(UserDims::from(1)),
            Err(IaError::UnsupportedConfiguration(_))
        ));

        s.state_mut().randomize_h(vec![2, 4, 4], 4, 3).unwrap();
        assert!(matches!(
            s.solve(UserDims::from(2)),
            Err(IaError::UnsupportedConfiguration(_))
        ));

        s.state_mut().randomize_h(4, 4, 3).unwrap();
        assert!(matches!(
            s.solve(UserDims::from(1)),
            Err(IaError::UnsupportedConfiguration(_))
        ));
    }
}
