//! Multi-user MIMO channel.
//!
//! Holds the `K x K` grid of flat-fading channel matrices between every
//! transmitter and receiver of an interference channel, and passes
//! precoded signals through it.
//!
//! ## Channel Convention
//!
//! `H[k][j]` is the `Nr[k] x Nt[j]` channel from transmitter `j` to receiver
//! `k`. Entries are i.i.d. circularly-symmetric complex Gaussian with unit
//! variance and are redrawn on every [`MultiUserChannel::randomize`].
//!
//! ## Usage
//!
//! ```rust
//! use ia_core::MultiUserChannel;
//!
//! let mut channel = MultiUserChannel::with_seeds(324, 7);
//! channel.randomize(vec![2, 4, 6], vec![2, 3, 5], 3).unwrap();
//!
//! let h01 = channel.channel(0, 1).unwrap();
//! assert_eq!(h01.shape(), (2, 3));
//! ```

use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{check_index, IaError, IaResult};
use crate::linalg::dense::{randn_c, CMatrix};
use crate::settings::UserDims;

/// Channel matrices of a K-user interference channel.
#[derive(Debug, Clone)]
pub struct MultiUserChannel {
    /// Receive antennas per user
    nr: Vec<usize>,
    /// Transmit antennas per user
    nt: Vec<usize>,
    /// h[k][j]: channel from transmitter j to receiver k
    h: Vec<Vec<CMatrix>>,
    /// Generator for channel draws
    channel_rng: ChaCha8Rng,
    /// Generator for noise in `corrupt`
    noise_rng: ChaCha8Rng,
}

impl Default for MultiUserChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiUserChannel {
    /// Create an empty channel (K = 0) with entropy-seeded generators.
    pub fn new() -> Self {
        Self {
            nr: Vec::new(),
            nt: Vec::new(),
            h: Vec::new(),
            channel_rng: ChaCha8Rng::from_entropy(),
            noise_rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Create an empty channel with fixed channel and noise seeds.
    pub fn with_seeds(channel_seed: u64, noise_seed: u64) -> Self {
        Self {
            nr: Vec::new(),
            nt: Vec::new(),
            h: Vec::new(),
            channel_rng: ChaCha8Rng::seed_from_u64(channel_seed),
            noise_rng: ChaCha8Rng::seed_from_u64(noise_seed),
        }
    }

    /// Reseed the generator used by [`randomize`](Self::randomize).
    pub fn set_channel_seed(&mut self, seed: u64) {
        self.channel_rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Reseed the generator used by [`corrupt`](Self::corrupt).
    pub fn set_noise_seed(&mut self, seed: u64) {
        self.noise_rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Number of users (transmitter/receiver pairs).
    pub fn k(&self) -> usize {
        self.h.len()
    }

    /// Receive antennas per user.
    pub fn nr(&self) -> &[usize] {
        &self.nr
    }

    /// Transmit antennas per user.
    pub fn nt(&self) -> &[usize] {
        &self.nt
    }

    /// Redraw all `K^2` channel matrices.
    ///
    /// `nr` and `nt` accept a single value for every user or one value per
    /// user. Fails with [`IaError::Dimension`] if a per-user vector does not
    /// have `k` entries or any antenna count is zero.
    pub fn randomize(
        &mut self,
        nr: impl Into<UserDims>,
        nt: impl Into<UserDims>,
        k: usize,
    ) -> IaResult<()> {
        let (nr, nt) = validate_dims(nr.into(), nt.into(), k)?;

        let mut h = Vec::with_capacity(k);
        for &nr_k in &nr {
            let row: Vec<CMatrix> = nt
                .iter()
                .map(|&nt_j| randn_c(nr_k, nt_j, &mut self.channel_rng))
                .collect();
            h.push(row);
        }

        self.nr = nr;
        self.nt = nt;
        self.h = h;
        Ok(())
    }

    /// Build the channel grid from one stacked `sum(Nr) x sum(Nt)` matrix.
    ///
    /// Block `(k, j)` of the stacked matrix becomes `H[k][j]`.
    pub fn from_big_matrix(
        big_h: &CMatrix,
        nr: impl Into<UserDims>,
        nt: impl Into<UserDims>,
        k: usize,
    ) -> IaResult<Self> {
        let mut channel = Self::new();
        channel.init_from_big_matrix(big_h, nr, nt, k)?;
        Ok(channel)
    }

    /// Replace the channel grid with the blocks of a stacked matrix.
    pub fn init_from_big_matrix(
        &mut self,
        big_h: &CMatrix,
        nr: impl Into<UserDims>,
        nt: impl Into<UserDims>,
        k: usize,
    ) -> IaResult<()> {
        let (nr, nt) = validate_dims(nr.into(), nt.into(), k)?;
        let total_nr: usize = nr.iter().sum();
        let total_nt: usize = nt.iter().sum();
        if big_h.shape() != (total_nr, total_nt) {
            return Err(IaError::Dimension(format!(
                "stacked channel is {}x{}, expected {}x{}",
                big_h.nrows(),
                big_h.ncols(),
                total_nr,
                total_nt
            )));
        }

        let row_offsets = offsets(&nr);
        let col_offsets = offsets(&nt);
        let h = (0..k)
            .map(|rx| {
                (0..k)
                    .map(|tx| {
                        big_h
                            .view((row_offsets[rx], col_offsets[tx]), (nr[rx], nt[tx]))
                            .into_owned()
                    })
                    .collect()
            })
            .collect();

        self.nr = nr;
        self.nt = nt;
        self.h = h;
        Ok(())
    }

    /// Stacked `sum(Nr) x sum(Nt)` form of the channel grid.
    pub fn big_h(&self) -> CMatrix {
        let total_nr: usize = self.nr.iter().sum();
        let total_nt: usize = self.nt.iter().sum();
        let row_offsets = offsets(&self.nr);
        let col_offsets = offsets(&self.nt);

        let mut big = CMatrix::zeros(total_nr, total_nt);
        for (rx, row) in self.h.iter().enumerate() {
            for (tx, block) in row.iter().enumerate() {
                big.view_mut((row_offsets[rx], col_offsets[tx]), block.shape())
                    .copy_from(block);
            }
        }
        big
    }

    /// Channel from transmitter `j` to receiver `k`.
    pub fn channel(&self, k: usize, j: usize) -> IaResult<&CMatrix> {
        let users = self.k();
        check_index(k, users)?;
        check_index(j, users)?;
        Ok(&self.h[k][j])
    }

    /// Pass per-user transmit signals through the channel.
    ///
    /// `signals[j]` is the `Nt[j] x N` matrix of samples leaving transmitter
    /// `j` (already precoded). Returns, for every receiver `k`,
    /// `sum_j H[k][j] signals[j]` plus circularly-symmetric complex Gaussian
    /// noise of variance `noise_var` per entry.
    pub fn corrupt(&mut self, signals: &[CMatrix], noise_var: f64) -> IaResult<Vec<CMatrix>> {
        let k = self.k();
        if signals.len() != k {
            return Err(IaError::Dimension(format!(
                "expected {} transmit signals, got {}",
                k,
                signals.len()
            )));
        }
        if !noise_var.is_finite() || noise_var < 0.0 {
            return Err(IaError::InvalidParameter(format!(
                "noise variance must be finite and non-negative, got {}",
                noise_var
            )));
        }

        let num_samples = signals.first().map_or(0, |s| s.ncols());
        for (j, s) in signals.iter().enumerate() {
            if s.nrows() != self.nt[j] || s.ncols() != num_samples {
                return Err(IaError::Dimension(format!(
                    "signal {} is {}x{}, expected {}x{}",
                    j,
                    s.nrows(),
                    s.ncols(),
                    self.nt[j],
                    num_samples
                )));
            }
        }

        // Per-component std so that E|n|^2 = noise_var
        let noise_std = (noise_var / 2.0).sqrt();
        let noise_dist = Normal::new(0.0, noise_std)
            .map_err(|e| IaError::InvalidParameter(format!("noise distribution: {}", e)))?;

        let mut received = Vec::with_capacity(k);
        for rx in 0..k {
            let mut y = CMatrix::zeros(self.nr[rx], num_samples);
            for (tx, s) in signals.iter().enumerate() {
                y += &self.h[rx][tx] * s;
            }
            if noise_var > 0.0 {
                for v in y.iter_mut() {
                    *v += Complex64::new(
                        noise_dist.sample(&mut self.noise_rng),
                        noise_dist.sample(&mut self.noise_rng),
                    );
                }
            }
            received.push(y);
        }
        Ok(received)
    }
}

/// Resolve and validate per-user antenna counts.
fn validate_dims(nr: UserDims, nt: UserDims, k: usize) -> IaResult<(Vec<usize>, Vec<usize>)> {
    if k == 0 {
        return Err(IaError::Dimension("number of users must be positive".to_string()));
    }
    let nr = nr.resolve(k)?;
    let nt = nt.resolve(k)?;
    if nr.iter().chain(nt.iter()).any(|&n| n == 0) {
        return Err(IaError::Dimension(
            "antenna counts must be positive".to_string(),
        ));
    }
    Ok((nr, nt))
}

/// Cumulative block offsets: [0, n0, n0+n1, ...]
fn offsets(sizes: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut acc = 0;
    for &s in sizes {
        out.push(acc);
        acc += s;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomize_shapes() {
        let mut ch = MultiUserChannel::with_seeds(1, 2);
        ch.randomize(vec![2, 4, 6], vec![2, 3, 5], 3).unwrap();

        assert_eq!(ch.k(), 3);
        assert_eq!(ch.nr(), &[2, 4, 6]);
        assert_eq!(ch.nt(), &[2, 3, 5]);
        for k in 0..3 {
            for j in 0..3 {
                assert_eq!(ch.channel(k, j).unwrap().shape(), (ch.nr()[k], ch.nt()[j]));
            }
        }
    }

    #[test]
    fn test_randomize_scalar_dims() {
        let mut ch = MultiUserChannel::with_seeds(1, 2);
        ch.randomize(3, 2, 4).unwrap();
        assert_eq!(ch.nr(), &[3, 3, 3, 3]);
        assert_eq!(ch.channel(3, 0).unwrap().shape(), (3, 2));
    }

    #[test]
    fn test_randomize_dimension_errors() {
        let mut ch = MultiUserChannel::new();
        assert!(matches!(
            ch.randomize(vec![2, 2], vec![2, 2, 2], 3),
            Err(IaError::Dimension(_))
        ));
        assert!(matches!(ch.randomize(2, 2, 0), Err(IaError::Dimension(_))));
        assert!(matches!(ch.randomize(0, 2, 2), Err(IaError::Dimension(_))));
    }

    #[test]
    fn test_channel_index_error() {
        let mut ch = MultiUserChannel::with_seeds(3, 4);
        ch.randomize(2, 2, 2).unwrap();
        assert_eq!(ch.channel(2, 0).unwrap_err(), IaError::Index { index: 2, k: 2 });
        assert_eq!(ch.channel(0, 5).unwrap_err(), IaError::Index { index: 5, k: 2 });
    }

    #[test]
    fn test_channel_seed_reproducible() {
        let mut a = MultiUserChannel::with_seeds(324, 0);
        let mut b = MultiUserChannel::with_seeds(324, 99);
        a.randomize(3, 3, 3).unwrap();
        b.randomize(3, 3, 3).unwrap();
        assert_eq!(a.big_h(), b.big_h());

        // Repeated access without randomize is bit-identical
        let first = a.channel(1, 2).unwrap().clone();
        assert_eq!(&first, a.channel(1, 2).unwrap());

        a.randomize(3, 3, 3).unwrap();
        assert_ne!(&first, a.channel(1, 2).unwrap());
    }

    #[test]
    fn test_big_matrix_roundtrip() {
        let mut ch = MultiUserChannel::with_seeds(5, 6);
        ch.randomize(vec![2, 3], vec![1, 4], 2).unwrap();
        let big = ch.big_h();
        assert_eq!(big.shape(), (5, 5));

        let rebuilt = MultiUserChannel::from_big_matrix(&big, vec![2, 3], vec![1, 4], 2).unwrap();
        for k in 0..2 {
            for j in 0..2 {
                assert_eq!(ch.channel(k, j).unwrap(), rebuilt.channel(k, j).unwrap());
            }
        }

        assert!(matches!(
            MultiUserChannel::from_big_matrix(&big, vec![2, 2], vec![1, 4], 2),
            Err(IaError::Dimension(_))
        ));
    }

    #[test]
    fn test_corrupt_noiseless_is_superposition() {
        let mut ch = MultiUserChannel::with_seeds(8, 9);
        ch.randomize(vec![2, 3], vec![2, 2], 2).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let x0 = randn_c(2, 5, &mut rng);
        let x1 = randn_c(2, 5, &mut rng);

        let y = ch.corrupt(&[x0.clone(), x1.clone()], 0.0).unwrap();
        assert_eq!(y.len(), 2);
        for k in 0..2 {
            let expected = ch.channel(k, 0).unwrap() * &x0 + ch.channel(k, 1).unwrap() * &x1;
            assert!((&y[k] - expected).norm() < 1e-12);
        }
    }

    #[test]
    fn test_corrupt_noise_power() {
        let mut ch = MultiUserChannel::with_seeds(8, 9);
        ch.randomize(1, 1, 1).unwrap();
        let x = CMatrix::zeros(1, 20_000);
        let y = ch.corrupt(&[x], 0.5).unwrap();
        let power = y[0].norm_squared() / 20_000.0;
        assert!((power - 0.5).abs() < 0.03, "noise power {}", power);
    }

    #[test]
    fn test_corrupt_errors() {
        let mut ch = MultiUserChannel::with_seeds(8, 9);
        ch.randomize(2, 2, 2).unwrap();
        let x = CMatrix::zeros(2, 4);
        assert!(matches!(ch.corrupt(&[x.clone()], 1.0), Err(IaError::Dimension(_))));
        assert!(matches!(
            ch.corrupt(&[x.clone(), CMatrix::zeros(3, 4)], 1.0),
            Err(IaError::Dimension(_))
        ));
        assert!(matches!(
            ch.corrupt(&[x.clone(), x.clone()], -1.0),
            Err(IaError::InvalidParameter(_))
        ));
    }
}
