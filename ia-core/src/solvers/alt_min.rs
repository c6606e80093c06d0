//! Alternating minimization.
//!
//! Each iteration runs three updates:
//!
//! 1. **C**: for every receiver, the `Ni[k]` principal eigenvectors of the
//!    raw interference covariance `sum_{j != k} H_kj F_j F_j^H H_kj^H`.
//! 2. **F**: for every transmitter, the `Ns[l]` least eigenvectors of
//!    `sum_{k != l} H_kl^H (I - C_k C_k^H) H_kl`.
//! 3. **W**: the first `Ns[k]` rows of `[H_kk F_k | C_k]^-1`, a
//!    zero-forcing filter that inverts the desired mapping and nulls the
//!    interference subspace.
//!
//! The cost is the leakage outside the interference subspaces,
//! `sum_{k != l} ||H_kl F_l - C_k C_k^H H_kl F_l||_F^2`. It is zero when the
//! interference is perfectly aligned.

use crate::channel::MultiUserChannel;
use crate::error::{IaError, IaResult};
use crate::linalg::dense::{hstack, identity, inverse, outer, CMatrix};
use crate::linalg::eigen::{leig, peig};
use crate::settings::{SolveInfo, SolverSettings, UserDims};

use super::{run_iterations, IaSolver, IaState};

/// Alternating minimization IA solver.
#[derive(Debug, Clone)]
pub struct AltMinSolver {
    state: IaState,
}

impl AltMinSolver {
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

    /// Recompute the interference-subspace bases from the current precoders.
    pub fn update_c(&mut self) -> IaResult<()> {
        let s = &self.state;
        s.check_precoders()?;
        let ni = s.ni();

        let mut c = Vec::with_capacity(s.k());
        for k in 0..s.k() {
            let raw = s.calc_interference_covariance(k, &vec![1.0; s.k()])?;
            let (basis, _) = peig(&raw, ni[k])?;
            c.push(basis);
        }
        self.state.c = c;
        Ok(())
    }

    /// Recompute the precoders from the current interference subspaces.
    pub fn update_f(&mut self) -> IaResult<()> {
        let s = &self.state;
        s.check_precoders()?;
        self.check_subspaces()?;
        let users = s.k();

        // Projectors onto the complement of each interference subspace
        let complements: Vec<CMatrix> = (0..users)
            .map(|k| identity(s.nr()[k]) - outer(&s.c[k]))
            .collect();

        let mut f = Vec::with_capacity(users);
        for l in 0..users {
            let mut d = CMatrix::zeros(s.nt()[l], s.nt()[l]);
            for k in (0..users).filter(|&k| k != l) {
                let h = s.get_channel(k, l)?;
                d += h.adjoint() * &complements[k] * h;
            }
            let (precoder, _) = leig(&d, s.ns()[l])?;
            f.push(precoder);
        }
        self.state.f = f;
        Ok(())
    }

    /// Recompute the zero-forcing receive filters.
    pub fn update_w(&mut self) -> IaResult<()> {
        let s = &self.state;
        s.check_precoders()?;
        self.check_subspaces()?;

        let mut w = Vec::with_capacity(s.k());
        for k in 0..s.k() {
            let desired = s.get_channel(k, k)? * &s.f[k];
            let stacked = hstack(&desired, &s.c[k])?;
            let inv = inverse(&stacked, &format!("zero-forcing matrix of user {}", k))?;
            w.push(inv.rows(0, s.ns()[k]).into_owned());
        }
        self.state.w = w;
        Ok(())
    }

    /// One full iteration: C, then F, then W.
    pub fn step(&mut self) -> IaResult<()> {
        self.update_c()?;
        self.update_f()?;
        self.update_w()
    }

    fn check_subspaces(&self) -> IaResult<()> {
        let s = &self.state;
        let ni = s.ni();
        let ok = s.c.len() == s.k()
            && s.c
                .iter()
                .enumerate()
                .all(|(k, c)| c.shape() == (s.nr()[k], ni[k]));
        if !ok {
            return Err(IaError::Dimension(
                "interference subspaces are missing or stale; call update_c first".to_string(),
            ));
        }
        Ok(())
    }
}

impl IaSolver for AltMinSolver {
    fn name(&self) -> &'static str {
        "alt_min"
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
        self.update_c()?;
        self.update_w()
    }

    fn cost(&self) -> IaResult<f64> {
        let s = &self.state;
        s.check_precoders()?;
        self.check_subspaces()?;

        let mut cost = 0.0;
        for k in 0..s.k() {
            let projector = outer(&s.c[k]);
            for l in (0..s.k()).filter(|&l| l != k) {
                let hf = s.get_channel(k, l)? * &s.f[l];
                let residual = &hf - &projector * &hf;
                cost += residual.norm_squared();
            }
        }
        Ok(cost)
    }
}
