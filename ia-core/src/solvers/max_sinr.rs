//! Max-SINR.
//!
//! Per-stream MMSE combiners on the forward network alternate with the same
//! update on the reciprocal network, where receivers become transmitters
//! (`H<-_kj = H_jk^H`) and the combiners play the role of precoders.
//!
//! For stream `l` of user `k`, with `V` the precoders of the network at hand:
//!
//! ```text
//! B_kl = sum_j (P_j / Ns_j) sum_d H_kj V_jd V_jd^H H_kj^H
//!        - (P_k / Ns_k) H_kk V_kl V_kl^H H_kk^H + noise I
//! U_kl = B_kl^-1 H_kk V_kl / ||B_kl^-1 H_kk V_kl||
//! SINR_kl = (P_k / Ns_k) |U_kl^H H_kk V_kl|^2 / (U_kl^H B_kl U_kl)
//! ```
//!
//! Combiners are stored as `U_k` (`Nr[k] x Ns[k]`) and exposed through the
//! common state as `W_k = U_k^H`.

use crate::channel::MultiUserChannel;
use crate::error::{check_index, IaError, IaResult};
use crate::linalg::dense::{identity, inverse, normalize_fro, outer, CMatrix};
use crate::settings::{SolveInfo, SolverSettings, UserDims};

use super::{ratio, run_iterations, IaSolver, IaState};

/// Which way the signals travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Network {
    /// Transmitter j to receiver k through `H[k][j]`
    Forward,
    /// Receiver j to transmitter k through `H[j][k]^H`
    Reverse,
}

/// Max-SINR IA solver.
#[derive(Debug, Clone)]
pub struct MaxSinrSolver {
    state: IaState,
    /// Receive combiners, `Nr[k] x Ns[k]`
    u: Vec<CMatrix>,
}

impl MaxSinrSolver {
    pub fn new(channel: MultiUserChannel) -> Self {
        Self::with_settings(channel, SolverSettings::default())
    }

    pub fn with_settings(channel: MultiUserChannel, settings: SolverSettings) -> Self {
        Self {
            state: IaState::with_settings(channel, settings),
            u: Vec::new(),
        }
    }

    /// Receive combiners from the last update.
    pub fn u(&self) -> &[CMatrix] {
        &self.u
    }

    // ========================================================================
    // Forward-network covariance and combiners
    // ========================================================================

    /// Total received covariance at receiver `k`, summed over every stream
    /// of every user.
    pub fn calc_bkl_first_part(&self, k: usize, p: &[f64]) -> IaResult<CMatrix> {
        self.check_forward(k, p)?;
        self.first_part(Network::Forward, &self.state.f, k, p)
    }

    /// Covariance contributed by the desired stream `l` of user `k`.
    pub fn calc_bkl_second_part(&self, k: usize, l: usize, p: &[f64]) -> IaResult<CMatrix> {
        self.check_forward(k, p)?;
        self.second_part(Network::Forward, &self.state.f, k, l, p)
    }

    /// Interference-plus-noise covariance `B_kl` for every stream of user
    /// `k`. Hermitian positive definite whenever the noise variance is
    /// positive.
    pub fn calc_bkl_cov_matrix_all_streams(&self, k: usize, p: &[f64]) -> IaResult<Vec<CMatrix>> {
        self.check_forward(k, p)?;
        self.cov_all_streams(Network::Forward, &self.state.f, k, p)
    }

    /// Unit-norm MMSE combiner for stream `l` of user `k`.
    pub fn calc_ukl(&self, bkl: &CMatrix, k: usize, l: usize) -> IaResult<CMatrix> {
        check_index(k, self.state.k())?;
        self.state.check_precoders()?;
        self.combiner(Network::Forward, &self.state.f, bkl, k, l)
    }

    /// Combiner matrix of user `k`, one column per stream.
    pub fn calc_uk(&self, bkl_all: &[CMatrix], k: usize) -> IaResult<CMatrix> {
        check_index(k, self.state.k())?;
        self.state.check_precoders()?;
        self.combiner_matrix(Network::Forward, &self.state.f, bkl_all, k)
    }

    /// Per-stream SINR of user `k` for combiners `uk`.
    pub fn calc_sinr_k(
        &self,
        bkl_all: &[CMatrix],
        uk: &CMatrix,
        k: usize,
        p: &[f64],
    ) -> IaResult<Vec<f64>> {
        self.check_forward(k, p)?;
        let ns = self.state.ns()[k];
        if bkl_all.len() != ns || uk.ncols() != ns {
            return Err(IaError::Dimension(format!(
                "user {}: expected {} covariances and combiners, got {} and {}",
                k,
                ns,
                bkl_all.len(),
                uk.ncols()
            )));
        }

        let hkk = self.state.get_channel(k, k)?;
        let scale = p[k] / ns as f64;
        let sinr = (0..ns)
            .map(|l| {
                let ukl = uk.column(l);
                let gain = (ukl.adjoint() * hkk * self.state.f[k].column(l))[(0, 0)];
                let denom = (ukl.adjoint() * &bkl_all[l] * ukl)[(0, 0)].re;
                ratio(scale * gain.norm_sqr(), denom)
            })
            .collect();
        Ok(sinr)
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Recompute the combiners from the current precoders (forward network).
    pub fn update_u(&mut self) -> IaResult<()> {
        self.state.check_precoders()?;
        let p = self.state.power_vec()?;
        let mut u = Vec::with_capacity(self.state.k());
        for k in 0..self.state.k() {
            let bkl_all = self.cov_all_streams(Network::Forward, &self.state.f, k, &p)?;
            u.push(self.combiner_matrix(Network::Forward, &self.state.f, &bkl_all, k)?);
        }
        self.state.w = u.iter().map(|uk| uk.adjoint()).collect();
        self.u = u;
        Ok(())
    }

    /// Recompute the precoders from the current combiners (reciprocal
    /// network). Each precoder is scaled to unit Frobenius norm.
    pub fn update_f(&mut self) -> IaResult<()> {
        self.check_combiners()?;
        let p = self.state.power_vec()?;
        let mut f = Vec::with_capacity(self.state.k());
        for k in 0..self.state.k() {
            let bkl_all = self.cov_all_streams(Network::Reverse, &self.u, k, &p)?;
            let v = self.combiner_matrix(Network::Reverse, &self.u, &bkl_all, k)?;
            f.push(normalize_fro(&v));
        }
        self.state.f = f;
        Ok(())
    }

    /// One reciprocal round: precoders from the combiners, then combiners
    /// from the new precoders.
    pub fn step(&mut self) -> IaResult<()> {
        if self.check_combiners().is_err() {
            self.update_u()?;
        }
        self.update_f()?;
        self.update_u()
    }

    // ========================================================================
    // Network-generic kernels
    // ========================================================================

    fn link(&self, net: Network, k: usize, j: usize) -> IaResult<CMatrix> {
        match net {
            Network::Forward => Ok(self.state.get_channel(k, j)?.clone()),
            Network::Reverse => Ok(self.state.get_channel(j, k)?.adjoint()),
        }
    }

    fn first_part(&self, net: Network, v: &[CMatrix], k: usize, p: &[f64]) -> IaResult<CMatrix> {
        let n = self.link(net, k, k)?.nrows();
        let mut first = CMatrix::zeros(n, n);
        for (j, vj) in v.iter().enumerate() {
            let streams = vj.ncols();
            if streams == 0 {
                continue;
            }
            // sum_d H v_d v_d^H H^H = (H V)(H V)^H
            let hv = self.link(net, k, j)? * vj;
            first += outer(&hv).scale(p[j] / streams as f64);
        }
        Ok(first)
    }

    fn second_part(
        &self,
        net: Network,
        v: &[CMatrix],
        k: usize,
        l: usize,
        p: &[f64],
    ) -> IaResult<CMatrix> {
        let streams = v[k].ncols();
        if l >= streams {
            return Err(IaError::Index { index: l, k: streams });
        }
        let hv = self.link(net, k, k)? * v[k].columns(l, 1);
        Ok((&hv * hv.adjoint()).scale(p[k] / streams as f64))
    }

    fn cov_all_streams(
        &self,
        net: Network,
        v: &[CMatrix],
        k: usize,
        p: &[f64],
    ) -> IaResult<Vec<CMatrix>> {
        let first = self.first_part(net, v, k, p)?;
        let noise = identity(first.nrows()).scale(self.state.noise_var());
        (0..v[k].ncols())
            .map(|l| Ok(&first - self.second_part(net, v, k, l, p)? + &noise))
            .collect()
    }

    fn combiner(
        &self,
        net: Network,
        v: &[CMatrix],
        bkl: &CMatrix,
        k: usize,
        l: usize,
    ) -> IaResult<CMatrix> {
        if l >= v[k].ncols() {
            return Err(IaError::Index {
                index: l,
                k: v[k].ncols(),
            });
        }
        let inv = inverse(bkl, &format!("B covariance of user {} stream {}", k, l))?;
        let ukl = inv * (self.link(net, k, k)? * v[k].columns(l, 1));
        Ok(normalize_fro(&ukl))
    }

    fn combiner_matrix(
        &self,
        net: Network,
        v: &[CMatrix],
        bkl_all: &[CMatrix],
        k: usize,
    ) -> IaResult<CMatrix> {
        let streams = v[k].ncols();
        if bkl_all.len() != streams {
            return Err(IaError::Dimension(format!(
                "user {}: {} covariances for {} streams",
                k,
                bkl_all.len(),
                streams
            )));
        }
        let n = self.link(net, k, k)?.nrows();
        let mut uk = CMatrix::zeros(n, streams);
        for (l, bkl) in bkl_all.iter().enumerate() {
            let ukl = self.combiner(net, v, bkl, k, l)?;
            uk.set_column(l, &ukl.column(0));
        }
        Ok(uk)
    }

    fn check_forward(&self, k: usize, p: &[f64]) -> IaResult<()> {
        let users = self.state.k();
        check_index(k, users)?;
        self.state.check_precoders()?;
        if p.len() != users {
            return Err(IaError::InvalidParameter(format!(
                "expected {} transmit powers, got {}",
                users,
                p.len()
            )));
        }
        Ok(())
    }

    fn check_combiners(&self) -> IaResult<()> {
        let s = &self.state;
        let ok = self.u.len() == s.k()
            && self
                .u
                .iter()
                .enumerate()
                .all(|(k, u)| u.shape() == (s.nr()[k], s.ns()[k]));
        if !ok {
            return Err(IaError::Dimension(
                "receive combiners are missing or stale; call update_u first".to_string(),
            ));
        }
        Ok(())
    }
}

impl IaSolver for MaxSinrSolver {
    fn name(&self) -> &'static str {
        "max_sinr"
    }

    fn state(&self) -> &IaState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut IaState {
        &mut self.state
    }

    fn solve(&mut self, ns: UserDims) -> IaResult<SolveInfo> {
        self.state.prepare(ns)?;
        self.u.clear();
        run_iterations(self, |solver| solver.step())
    }

    fn refresh_after_pruning(&mut self) -> IaResult<()> {
        self.update_u()
    }

    fn cost(&self) -> IaResult<f64> {
        self.state.interference_leakage()
    }

    /// SINR from the per-stream covariances (`calc_sinr_k`) rather than the
    /// generic filter-based formula.
    fn calc_sinr_all_users(&self) -> IaResult<Vec<Vec<f64>>> {
        self.check_combiners()?;
        let p = self.state.power_vec()?;
        (0..self.state.k())
            .map(|k| {
                let bkl_all = self.calc_bkl_cov_matrix_all_streams(k, &p)?;
                self.calc_sinr_k(&bkl_all, &self.u[k], k, &p)
            })
            .collect()
    }

    fn clear(&mut self) {
        self.state.clear();
        self.u.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::dense::max_abs_diff;

    const P: [f64; 3] = [1.2, 1.5, 0.9];

    fn solver() -> MaxSinrSolver {
        let mut s = MaxSinrSolver::new(MultiUserChannel::with_seeds(324, 0));
        s.state_mut().set_precoder_seed(42);
        s.state_mut().randomize_f(3, 2, 3).unwrap();
        s.state_mut().randomize_h(3, 3, 3).unwrap();
        s
    }

    #[test]
    fn test_calc_bkl_cov_matrix() {
        let s = solver();
        let st = s.state();

        for k in 0..3 {
            let mut first = CMatrix::zeros(3, 3);
            for j in 0..3 {
                let hkj = st.get_channel(k, j).unwrap();
                let mut aux = CMatrix::zeros(3, 3);
                for d in 0..st.ns()[j] {
                    let vjd = st.f()[j].column(d).into_owned();
                    aux += hkj * &vjd * vjd.adjoint() * hkj.adjoint();
                }
                first += aux.scale(P[j] / st.ns()[j] as f64);
            }
            let got = s.calc_bkl_first_part(k, &P).unwrap();
            assert!(max_abs_diff(&first, &got) < 1e-10);

            let hkk = st.get_channel(k, k).unwrap();
            let bkl_all = s.calc_bkl_cov_matrix_all_streams(k, &P).unwrap();
            assert_eq!(bkl_all.len(), 2);
            for l in 0..2 {
                let vkl = st.f()[k].column(l).into_owned();
                let second = (hkk * &vkl * vkl.adjoint() * hkk.adjoint()).scale(P[k] / 2.0);
                let got = s.calc_bkl_second_part(k, l, &P).unwrap();
                assert!(max_abs_diff(&second, &got) < 1e-10);

                let expected = &first - &second + identity(3);
                assert!(max_abs_diff(&expected, &bkl_all[l]) < 1e-10);
            }
        }
    }

    #[test]
    fn test_calc_ukl() {
        let s = solver();
        let st = s.state();
        for k in 0..3 {
            let hkk = st.get_channel(k, k).unwrap();
            let bkl_all = s.calc_bkl_cov_matrix_all_streams(k, &P).unwrap();
            for l in 0..2 {
                let raw = bkl_all[l].clone().try_inverse().unwrap() * hkk * st.f()[k].columns(l, 1);
                let expected = raw.unscale(raw.norm());
                let ukl = s.calc_ukl(&bkl_all[l], k, l).unwrap();
                assert_eq!(ukl.shape(), (3, 1));
                assert!(max_abs_diff(&expected, &ukl) < 1e-10);
            }
        }
    }

    #[test]
    fn test_calc_uk() {
        let s = solver();
        for k in 0..3 {
            let bkl_all = s.calc_bkl_cov_matrix_all_streams(k, &P).unwrap();
            let uk = s.calc_uk(&bkl_all, k).unwrap();
            assert_eq!(uk.shape(), (3, 2));
            for l in 0..2 {
                let ukl = s.calc_ukl(&bkl_all[l], k, l).unwrap();
                assert!(max_abs_diff(&uk.columns(l, 1).into_owned(), &ukl) < 1e-12);
            }
        }
    }

    #[test]
    fn test_calc_sinr_k() {
        let s = solver();
        let st = s.state();
        for k in 0..3 {
            let hkk = st.get_channel(k, k).unwrap();
            let bkl_all = s.calc_bkl_cov_matrix_all_streams(k, &P).unwrap();
            let uk = s.calc_uk(&bkl_all, k).unwrap();
            let sinr = s.calc_sinr_k(&bkl_all, &uk, k, &P).unwrap();

            for l in 0..2 {
                let ukl = uk.columns(l, 1).into_owned();
                let aux = ukl.adjoint() * hkk * st.f()[k].column(l);
                let num = aux[(0, 0)].norm_sqr() * P[k] / 2.0;
                let den = (ukl.adjoint() * &bkl_all[l] * &ukl)[(0, 0)].re;
                assert!((sinr[l] - num / den).abs() < 1e-10);
                assert!(sinr[l].is_finite() && sinr[l] >= 0.0);
            }
        }
    }

    #[test]
    fn test_stream_index_error() {
        let s = solver();
        assert_eq!(
            s.calc_bkl_second_part(0, 2, &P).unwrap_err(),
            IaError::Index { index: 2, k: 2 }
        );
        assert!(matches!(
            s.calc_bkl_first_part(0, &P[..2]),
            Err(IaError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_solve_consistent_state() {
        let mut s = MaxSinrSolver::new(MultiUserChannel::with_seeds(7, 8));
        s.state_mut().set_precoder_seed(9);
        s.state_mut().randomize_h(vec![3, 4, 2], vec![2, 3, 4], 3).unwrap();
        s.state_mut().set_powers(P.to_vec()).unwrap();
        s.state_mut().set_noise_var(0.1).unwrap();
        s.state_mut().settings_mut().max_iterations = 10;

        let info = s.solve(UserDims::from(1)).unwrap();
        assert_eq!(info.iterations, 10);

        let st = s.state();
        for k in 0..3 {
            assert_eq!(st.f()[k].shape(), (st.nt()[k], 1));
            assert!((st.f()[k].norm() - 1.0).abs() < 1e-10);
            assert_eq!(s.u()[k].shape(), (st.nr()[k], 1));
            assert!(max_abs_diff(&st.w()[k], &s.u()[k].adjoint()) < 1e-15);
        }

        for user in s.calc_sinr_all_users().unwrap() {
            for sinr in user {
                assert!(sinr.is_finite() && sinr >= 0.0);
            }
        }
        assert!(s.cost().unwrap() >= 0.0);
        assert!(s.sum_capacity().unwrap() > 0.0);
    }

    #[test]
    fn test_zero_noise_singular() {
        // Single stream, one antenna: B_kl without noise has no signal to
        // invert once the desired stream is removed
        let mut s = MaxSinrSolver::new(MultiUserChannel::with_seeds(1, 2));
        s.state_mut().randomize_h(1, 1, 1).unwrap();
        s.state_mut().set_noise_var(0.0).unwrap();
        assert!(matches!(
            s.solve(UserDims::from(1)),
            Err(IaError::SingularMatrix(_))
        ));
    }

    #[test]
    fn test_clear_drops_combiners() {
        let mut s = solver();
        s.state_mut().settings_mut().max_iterations = 2;
        s.solve(UserDims::from(2)).unwrap();
        assert_eq!(s.u().len(), 3);
        s.clear();
        assert!(s.u().is_empty());
        assert!(s.state().w().is_empty());
    }
}
