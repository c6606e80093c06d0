//! Dense complex matrix types and operations.
//!
//! Every per-user quantity (channels, precoders, filters, subspace bases) is
//! an independently shaped `DMatrix<Complex64>`.

use nalgebra::DMatrix;
use num_complex::Complex64;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{IaError, IaResult};

/// Dense complex matrix.
pub type CMatrix = DMatrix<Complex64>;

/// Draw a matrix of i.i.d. circularly-symmetric complex Gaussian entries
/// with unit variance (real and imaginary parts each have variance 1/2).
pub fn randn_c<R: Rng + ?Sized>(nrows: usize, ncols: usize, rng: &mut R) -> CMatrix {
    let scale = std::f64::consts::FRAC_1_SQRT_2;
    CMatrix::from_fn(nrows, ncols, |_, _| {
        let re: f64 = rng.sample(StandardNormal);
        let im: f64 = rng.sample(StandardNormal);
        Complex64::new(re * scale, im * scale)
    })
}

/// Complex identity matrix.
pub fn identity(n: usize) -> CMatrix {
    CMatrix::identity(n, n)
}

/// `a * a^H`
pub fn outer(a: &CMatrix) -> CMatrix {
    a * a.adjoint()
}

/// Hermitian part `(A + A^H) / 2`.
///
/// Products like `H F F^H H^H` are Hermitian only up to rounding; eigen
/// routines get the symmetrised copy.
pub fn hermitize(a: &CMatrix) -> CMatrix {
    (a + a.adjoint()).scale(0.5)
}

/// Squared Frobenius norm.
pub fn fro_norm_sqr(a: &CMatrix) -> f64 {
    a.norm_squared()
}

/// Scale to unit Frobenius norm. A zero matrix is returned unchanged.
pub fn normalize_fro(a: &CMatrix) -> CMatrix {
    let norm = a.norm();
    if norm > 0.0 {
        a.unscale(norm)
    } else {
        a.clone()
    }
}

/// Inverse of a square matrix.
///
/// `what` names the matrix in the error message.
pub fn inverse(a: &CMatrix, what: &str) -> IaResult<CMatrix> {
    if !a.is_square() {
        return Err(IaError::Dimension(format!(
            "{} must be square to invert, got {}x{}",
            what,
            a.nrows(),
            a.ncols()
        )));
    }
    let inv = a
        .clone()
        .try_inverse()
        .ok_or_else(|| IaError::SingularMatrix(what.to_string()))?;
    if inv.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
        return Err(IaError::SingularMatrix(what.to_string()));
    }
    Ok(inv)
}

/// Stack two matrices horizontally: [A, B]
pub fn hstack(a: &CMatrix, b: &CMatrix) -> IaResult<CMatrix> {
    if a.nrows() != b.nrows() {
        return Err(IaError::Dimension(format!(
            "cannot stack {}x{} next to {}x{}",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        )));
    }
    let split = a.ncols();
    let mut out = a.clone().insert_columns(split, b.ncols(), Complex64::new(0.0, 0.0));
    out.columns_mut(split, b.ncols()).copy_from(b);
    Ok(out)
}

/// Real part of the trace of a square matrix.
pub fn trace_re(a: &CMatrix) -> f64 {
    a.diagonal().iter().map(|v| v.re).sum()
}

/// Maximum absolute entry-wise difference; used by tests and diagnostics.
pub fn max_abs_diff(a: &CMatrix, b: &CMatrix) -> f64 {
    assert_eq!(a.shape(), b.shape());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).norm())
        .fold(0.0, f64::max)
}
