//! Interference alignment solvers.
//!
//! Every algorithm works on the same [`IaState`]: a channel, one precoder
//! `F[k]` (`Nt[k] x Ns[k]`) and one receive filter `W[k]` (`Ns[k] x Nr[k]`)
//! per user, plus the interference-subspace bases `C[k]` used by the
//! subspace family. The algorithms differ only in how they update F and W,
//! which is what the [`IaSolver`] trait abstracts.
//!
//! | Solver | Update rule | Cost |
//! | --- | --- | --- |
//! | [`AltMinSolver`] | subspace C, least-leakage F, zero-forcing W | projected leakage |
//! | [`MaxSinrSolver`] | per-stream MMSE combiners, reciprocal network | leakage |
//! | [`MinLeakageSolver`] | least eigenvectors of Q on both sides | leakage |
//! | [`MmseSolver`] | regularised MMSE filters, power-constrained F | leakage |
//! | [`ClosedFormSolver`] | direct solution for K = 3 | leakage |

pub mod alt_min;
pub mod closed_form;
pub mod max_sinr;
pub mod min_leakage;
pub mod mmse;

pub use alt_min::AltMinSolver;
pub use closed_form::ClosedFormSolver;
pub use max_sinr::MaxSinrSolver;
pub use min_leakage::MinLeakageSolver;
pub use mmse::MmseSolver;

use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::channel::MultiUserChannel;
use crate::error::{check_index, IaError, IaResult};
use crate::linalg::dense::{fro_norm_sqr, inverse, normalize_fro, outer, randn_c, trace_re, CMatrix};
use crate::settings::{SolveInfo, SolveStatus, SolverSettings, UserDims};

/// Common interface of the IA algorithms.
///
/// The default `solve` and `cost` return [`IaError::NotImplemented`]; the
/// bare [`IaState`] implements the trait with those defaults, each algorithm
/// overrides them.
///
/// # Lifecycle
///
/// Per trial the caller runs `clear()`, redraws the channel (through
/// [`IaState::randomize_h`] or the channel itself), then `solve(ns)`, and
/// finally reads `F`, `W`, the actual `Ns`, the cost and the SINRs.
pub trait IaSolver {
    /// Short algorithm name used in log lines.
    fn name(&self) -> &'static str;

    /// Shared solver state.
    fn state(&self) -> &IaState;

    /// Mutable shared solver state.
    fn state_mut(&mut self) -> &mut IaState;

    /// Compute precoders and receive filters for `ns` streams per user.
    ///
    /// On success F, W, the actual stream counts and the cost are mutually
    /// consistent.
    fn solve(&mut self, _ns: UserDims) -> IaResult<SolveInfo> {
        Err(IaError::NotImplemented("solve"))
    }

    /// Algorithm objective for the current F/W (non-negative).
    fn cost(&self) -> IaResult<f64> {
        Err(IaError::NotImplemented("cost"))
    }

    /// Rebuild whatever the algorithm derives from the stream counts
    /// (subspace bases, receive filters) after F lost columns.
    fn refresh_after_pruning(&mut self) -> IaResult<()> {
        Ok(())
    }

    /// Per-user, per-stream SINR (linear scale).
    fn calc_sinr_all_users(&self) -> IaResult<Vec<Vec<f64>>> {
        self.state().calc_sinr_all_users()
    }

    /// Sum over users and streams of `log2(1 + SINR)`.
    fn sum_capacity(&self) -> IaResult<f64> {
        let sinrs = self.calc_sinr_all_users()?;
        Ok(sinrs.iter().flatten().map(|s| (1.0 + s).log2()).sum())
    }

    /// Reset stream counts and drop cached W/C. Keeps H and F.
    fn clear(&mut self) {
        self.state_mut().clear();
    }
}

/// State shared by every IA algorithm.
#[derive(Debug, Clone)]
pub struct IaState {
    channel: MultiUserChannel,
    settings: SolverSettings,
    pub(crate) f: Vec<CMatrix>,
    pub(crate) w: Vec<CMatrix>,
    pub(crate) c: Vec<CMatrix>,
    pub(crate) ns: Vec<usize>,
    requested_ns: Vec<usize>,
    noise_var: f64,
    powers: Option<Vec<f64>>,
    rng: ChaCha8Rng,
}

impl IaSolver for IaState {
    fn name(&self) -> &'static str {
        "base"
    }

    fn state(&self) -> &IaState {
        self
    }

    fn state_mut(&mut self) -> &mut IaState {
        self
    }
}

impl IaState {
    /// Bind a new solver state to `channel` with default settings.
    pub fn new(channel: MultiUserChannel) -> Self {
        Self::with_settings(channel, SolverSettings::default())
    }

    /// Bind a new solver state to `channel`.
    pub fn with_settings(channel: MultiUserChannel, settings: SolverSettings) -> Self {
        Self {
            channel,
            settings,
            f: Vec::new(),
            w: Vec::new(),
            c: Vec::new(),
            ns: Vec::new(),
            requested_ns: Vec::new(),
            noise_var: 1.0,
            powers: None,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn channel(&self) -> &MultiUserChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut MultiUserChannel {
        &mut self.channel
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SolverSettings {
        &mut self.settings
    }

    /// Number of users.
    pub fn k(&self) -> usize {
        self.channel.k()
    }

    pub fn nr(&self) -> &[usize] {
        self.channel.nr()
    }

    pub fn nt(&self) -> &[usize] {
        self.channel.nt()
    }

    /// Actual stream counts (may be below the requested ones after pruning).
    pub fn ns(&self) -> &[usize] {
        &self.ns
    }

    /// Interference-subspace dimension `Nr[k] - Ns[k]` per user.
    pub fn ni(&self) -> Vec<usize> {
        self.nr()
            .iter()
            .zip(self.ns.iter())
            .map(|(&nr, &ns)| nr.saturating_sub(ns))
            .collect()
    }

    /// Precoders, `Nt[k] x Ns[k]`.
    pub fn f(&self) -> &[CMatrix] {
        &self.f
    }

    /// Receive filters, `Ns[k] x Nr[k]`. Empty until a solve.
    pub fn w(&self) -> &[CMatrix] {
        &self.w
    }

    /// Interference-subspace bases, `Nr[k] x Ni[k]`. Only populated by the
    /// subspace solvers.
    pub fn c(&self) -> &[CMatrix] {
        &self.c
    }

    pub fn noise_var(&self) -> f64 {
        self.noise_var
    }

    /// Set the receiver noise variance.
    pub fn set_noise_var(&mut self, noise_var: f64) -> IaResult<()> {
        if !noise_var.is_finite() || noise_var < 0.0 {
            return Err(IaError::InvalidParameter(format!(
                "noise variance must be finite and non-negative, got {}",
                noise_var
            )));
        }
        self.noise_var = noise_var;
        Ok(())
    }

    /// Per-user transmit powers (1.0 for every user unless set).
    pub fn powers(&self) -> Vec<f64> {
        self.powers.clone().unwrap_or_else(|| vec![1.0; self.k()])
    }

    /// Set per-user transmit powers.
    pub fn set_powers(&mut self, powers: Vec<f64>) -> IaResult<()> {
        if let Some(p) = powers.iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(IaError::InvalidParameter(format!(
                "transmit powers must be finite and positive, got {}",
                p
            )));
        }
        self.powers = Some(powers);
        Ok(())
    }

    /// Reseed the generator used for random initial precoders.
    pub fn set_precoder_seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Powers checked against the current number of users.
    pub(crate) fn power_vec(&self) -> IaResult<Vec<f64>> {
        let p = self.powers();
        check_powers(&p, self.k())?;
        Ok(p)
    }

    // ========================================================================
    // Randomization
    // ========================================================================

    /// Redraw the channel.
    pub fn randomize_h(
        &mut self,
        nr: impl Into<UserDims>,
        nt: impl Into<UserDims>,
        k: usize,
    ) -> IaResult<()> {
        self.channel.randomize(nr, nt, k)
    }

    /// Draw a random unit-Frobenius-norm precoder `Nt[k] x Ns[k]` per user.
    ///
    /// Sets both the requested and the actual stream counts to `ns`.
    pub fn randomize_f(
        &mut self,
        nt: impl Into<UserDims>,
        ns: impl Into<UserDims>,
        k: usize,
    ) -> IaResult<()> {
        let nt = nt.into().resolve(k)?;
        let ns = ns.into().resolve(k)?;
        for (user, (&s, &t)) in ns.iter().zip(nt.iter()).enumerate() {
            if s > t {
                return Err(IaError::Dimension(format!(
                    "user {}: {} streams exceed {} transmit antennas",
                    user, s, t
                )));
            }
        }

        self.f = nt
            .iter()
            .zip(ns.iter())
            .map(|(&t, &s)| normalize_fro(&randn_c(t, s, &mut self.rng)))
            .collect();
        self.requested_ns = ns.clone();
        self.ns = ns;
        self.w.clear();
        self.c.clear();
        Ok(())
    }

    /// Channel from transmitter `j` to receiver `k`.
    pub fn get_channel(&self, k: usize, j: usize) -> IaResult<&CMatrix> {
        self.channel.channel(k, j)
    }

    /// Reset the actual stream counts to the requested ones and drop W/C.
    pub fn clear(&mut self) {
        self.ns = self.requested_ns.clone();
        self.w.clear();
        self.c.clear();
    }

    // ========================================================================
    // Derived quantities
    // ========================================================================

    /// Interference covariance at receiver `k`:
    /// `Q_k = sum_{j != k} P[j] H[k][j] F[j] F[j]^H H[k][j]^H`.
    ///
    /// Hermitian positive semi-definite by construction.
    pub fn calc_interference_covariance(&self, k: usize, p: &[f64]) -> IaResult<CMatrix> {
        let users = self.k();
        check_index(k, users)?;
        check_powers(p, users)?;
        self.check_precoders()?;

        let mut q = CMatrix::zeros(self.nr()[k], self.nr()[k]);
        for j in (0..users).filter(|&j| j != k) {
            let hf = self.channel.channel(k, j)? * &self.f[j];
            q += outer(&hf).scale(p[j]);
        }
        Ok(q)
    }

    /// [`calc_interference_covariance`](Self::calc_interference_covariance)
    /// with the configured powers.
    pub fn calc_q(&self, k: usize) -> IaResult<CMatrix> {
        self.calc_interference_covariance(k, &self.power_vec()?)
    }

    /// Interference leaking through the receive filters:
    /// `sum_k trace(W_k Q_k W_k^H)`.
    pub fn interference_leakage(&self) -> IaResult<f64> {
        self.check_filters()?;
        let p = self.power_vec()?;
        let mut total = 0.0;
        for k in 0..self.k() {
            let q = self.calc_interference_covariance(k, &p)?;
            let w = &self.w[k];
            total += trace_re(&(w * q * w.adjoint()));
        }
        Ok(total.max(0.0))
    }

    /// Per-stream SINR for the current F and W.
    ///
    /// For stream `l` of user `k` with filter row `w_l`:
    /// `P_k |w_l H_kk f_l|^2 / (sum_{d != l} P_k |w_l H_kk f_d|^2
    ///  + sum_{j != k} P_j ||w_l H_kj F_j||^2 + noise ||w_l||^2)`.
    pub fn calc_sinr_all_users(&self) -> IaResult<Vec<Vec<f64>>> {
        self.check_filters()?;
        let p = self.power_vec()?;
        (0..self.k()).map(|k| self.calc_sinr_user(k, &p)).collect()
    }

    fn calc_sinr_user(&self, k: usize, p: &[f64]) -> IaResult<Vec<f64>> {
        let w = &self.w[k];
        let effective = w * (self.channel.channel(k, k)? * &self.f[k]);
        let streams = w.nrows();

        let mut interference = vec![0.0; streams];
        for j in (0..self.k()).filter(|&j| j != k) {
            let leak = w * (self.channel.channel(k, j)? * &self.f[j]);
            for (l, acc) in interference.iter_mut().enumerate() {
                *acc += p[j] * leak.row(l).norm_squared();
            }
        }

        let sinr = (0..streams)
            .map(|l| {
                let signal = p[k] * effective[(l, l)].norm_sqr();
                let intra = p[k] * effective.row(l).norm_squared() - signal;
                let noise = self.noise_var * w.row(l).norm_squared();
                ratio(signal, intra.max(0.0) + interference[l] + noise)
            })
            .collect();
        Ok(sinr)
    }

    /// Power-scaled precoder `sqrt(P[k]) F[k]`.
    pub fn full_f(&self, k: usize) -> IaResult<CMatrix> {
        check_index(k, self.k())?;
        self.check_precoders()?;
        let p = self.power_vec()?;
        Ok(self.f[k].scale(p[k].sqrt()))
    }

    /// Receive filter scaled so the effective desired channel is identity:
    /// `(W[k] H[k][k] full_f(k))^-1 W[k]`.
    pub fn full_w(&self, k: usize) -> IaResult<CMatrix> {
        check_index(k, self.k())?;
        self.check_filters()?;
        let effective = &self.w[k] * (self.channel.channel(k, k)? * self.full_f(k)?);
        let inv = inverse(&effective, "effective desired channel")?;
        Ok(inv * &self.w[k])
    }

    // ========================================================================
    // Solve support
    // ========================================================================

    /// Validate `ns` against the channel and make sure F matches it.
    ///
    /// Existing precoders with the right shapes are kept as the starting
    /// point, anything else is redrawn.
    pub(crate) fn prepare(&mut self, ns: UserDims) -> IaResult<()> {
        self.settings.validate()?;
        let k = self.k();
        if k == 0 {
            return Err(IaError::Dimension(
                "channel has not been initialised".to_string(),
            ));
        }
        let ns = ns.resolve(k)?;
        for user in 0..k {
            let limit = self.nr()[user].min(self.nt()[user]);
            if ns[user] > limit {
                return Err(IaError::Dimension(format!(
                    "user {}: {} streams exceed min(Nr, Nt) = {}",
                    user, ns[user], limit
                )));
            }
        }
        check_powers(&self.powers(), k)?;

        let shapes_match = self.f.len() == k
            && (0..k).all(|user| self.f[user].shape() == (self.nt()[user], ns[user]));
        if !shapes_match {
            let nt = self.nt().to_vec();
            self.randomize_f(nt, ns.clone(), k)?;
        }

        self.requested_ns = ns.clone();
        self.ns = ns;
        self.w.clear();
        self.c.clear();
        Ok(())
    }

    /// Remove streams whose precoder column carries less than `tol` times
    /// the energy of the user's strongest column. At least one stream per
    /// user survives; F keeps its Frobenius norm and the matching rows of W
    /// are dropped. Anything else derived from Ns is left to
    /// [`IaSolver::refresh_after_pruning`].
    pub(crate) fn prune_streams(&mut self, tol: f64) -> usize {
        let mut removed = 0;
        for k in 0..self.f.len() {
            let f = &self.f[k];
            let total = fro_norm_sqr(f);
            if f.ncols() <= 1 || total <= 0.0 {
                continue;
            }
            let energies: Vec<f64> = (0..f.ncols()).map(|l| f.column(l).norm_squared()).collect();
            let strongest = energies
                .iter()
                .enumerate()
                .fold(0, |best, (l, &e)| if e > energies[best] { l } else { best });
            let floor = tol * energies[strongest];
            let keep: Vec<usize> = (0..f.ncols())
                .filter(|&l| l == strongest || energies[l] >= floor)
                .collect();
            if keep.len() == f.ncols() {
                continue;
            }

            let kept = f.select_columns(keep.iter());
            let kept_norm = kept.norm();
            self.f[k] = if kept_norm > 0.0 {
                kept.scale(total.sqrt() / kept_norm)
            } else {
                kept
            };
            if let Some(w) = self.w.get_mut(k) {
                if w.nrows() == energies.len() {
                    *w = w.select_rows(keep.iter());
                }
            }
            removed += energies.len() - keep.len();
            self.ns[k] = keep.len();
        }
        removed
    }

    pub(crate) fn check_precoders(&self) -> IaResult<()> {
        let k = self.k();
        if self.f.len() != k || self.ns.len() != k {
            return Err(IaError::Dimension(format!(
                "{} precoders for {} users; call randomize_f or solve first",
                self.f.len(),
                k
            )));
        }
        for user in 0..k {
            let expected = (self.nt()[user], self.ns[user]);
            if self.f[user].shape() != expected {
                return Err(IaError::Dimension(format!(
                    "user {}: precoder is {}x{}, expected {}x{}",
                    user,
                    self.f[user].nrows(),
                    self.f[user].ncols(),
                    expected.0,
                    expected.1
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn check_filters(&self) -> IaResult<()> {
        self.check_precoders()?;
        if self.w.len() != self.k() {
            return Err(IaError::Dimension(
                "receive filters have not been computed; call solve first".to_string(),
            ));
        }
        for (user, w) in self.w.iter().enumerate() {
            if w.shape() != (self.ns[user], self.nr()[user]) {
                return Err(IaError::Dimension(format!(
                    "user {}: receive filter is {}x{}, expected {}x{}",
                    user,
                    w.nrows(),
                    w.ncols(),
                    self.ns[user],
                    self.nr()[user]
                )));
            }
        }
        Ok(())
    }
}

/// `signal / denom`, reading `0 / 0` as zero.
pub(crate) fn ratio(signal: f64, denom: f64) -> f64 {
    if denom > 0.0 {
        signal / denom
    } else if signal > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

fn check_powers(p: &[f64], k: usize) -> IaResult<()> {
    if p.len() != k {
        return Err(IaError::InvalidParameter(format!(
            "expected {} transmit powers, got {}",
            k,
            p.len()
        )));
    }
    Ok(())
}

/// Run `step` up to `max_iterations` times, sampling the cost after each.
///
/// Stops early only when `early_stop_tol` is configured. Applies stream
/// pruning afterwards when `stream_prune_tol` is configured.
pub(crate) fn run_iterations<S>(
    solver: &mut S,
    mut step: impl FnMut(&mut S) -> IaResult<()>,
) -> IaResult<SolveInfo>
where
    S: IaSolver + ?Sized,
{
    let start = Instant::now();
    let settings = solver.state().settings().clone();
    if settings.max_iterations == 0 {
        return Err(IaError::InvalidParameter(
            "max_iterations must be at least 1".to_string(),
        ));
    }

    let mut status = SolveStatus::MaxIterations;
    let mut iterations = 0;
    let mut prev_cost: Option<f64> = None;
    let mut cost = f64::NAN;

    for iter in 0..settings.max_iterations {
        step(&mut *solver)?;
        iterations = iter + 1;
        cost = solver.cost()?;

        if settings.verbose {
            log::debug!("{} iter {:4}: cost={:.6e}", solver.name(), iter, cost);
        }

        if let (Some(tol), Some(prev)) = (settings.early_stop_tol, prev_cost) {
            if (prev - cost).abs() <= tol {
                status = SolveStatus::Converged;
                break;
            }
        }
        prev_cost = Some(cost);
    }

    if let Some(tol) = settings.stream_prune_tol {
        let before = solver.state().clone();
        let removed = solver.state_mut().prune_streams(tol);
        if removed > 0 {
            let refreshed = solver.refresh_after_pruning().and_then(|()| solver.cost());
            match refreshed {
                Ok(c) => cost = c,
                Err(err) => {
                    // Leave the unpruned solution in place
                    *solver.state_mut() = before;
                    return Err(err);
                }
            }
            if settings.verbose {
                log::debug!("{}: pruned {} streams", solver.name(), removed);
            }
        }
    }

    let solve_time_ms = start.elapsed().as_millis() as u64;
    log::info!(
        "{}: {} after {} iterations, cost={:.6e}, time={}ms",
        solver.name(),
        status,
        iterations,
        cost,
        solve_time_ms
    );

    Ok(SolveInfo {
        status,
        iterations,
        final_cost: cost,
        solve_time_ms,
    })
}
