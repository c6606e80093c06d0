//! Eigenvector selection.
//!
//! The subspace solvers need either the eigenvectors of a Hermitian matrix
//! with the largest eigenvalues ("principal", `peig`) or with the smallest
//! ones ("least", `leig`). Both go through [`select_eigenvectors`]. The
//! closed-form solver additionally needs eigenvectors of a general
//! (non-Hermitian) matrix, computed from a complex Schur form.

use std::cmp::Ordering;

use nalgebra::linalg::{Schur, SymmetricEigen};
use num_complex::Complex64;

use super::dense::{hermitize, CMatrix};
use crate::error::{IaError, IaResult};

/// Iteration cap for the eigen-decompositions.
const MAX_EIG_ITERS: usize = 10_000;

/// Smallest pivot used during Schur back-substitution.
const BACKSUB_MIN_PIVOT: f64 = 1e-14;

/// Select `count` eigenvectors of a Hermitian matrix.
///
/// With `principal = true` the eigenvectors of the largest eigenvalues are
/// returned (in decreasing eigenvalue order), otherwise those of the
/// smallest eigenvalues (in increasing order). Equal eigenvalues keep their
/// original index order, so the selection is deterministic for degenerate
/// spectra.
///
/// Returns the `n x count` eigenvector matrix (orthonormal columns) and the
/// matching eigenvalues. `count == 0` yields an `n x 0` matrix without
/// decomposing anything.
pub fn select_eigenvectors(
    m: &CMatrix,
    count: usize,
    principal: bool,
) -> IaResult<(CMatrix, Vec<f64>)> {
    let n = m.nrows();
    if !m.is_square() {
        return Err(IaError::Dimension(format!(
            "eigen-decomposition needs a square matrix, got {}x{}",
            n,
            m.ncols()
        )));
    }
    if count > n {
        return Err(IaError::Dimension(format!(
            "requested {} eigenvectors of a {}x{} matrix",
            count, n, n
        )));
    }
    if count == 0 {
        return Ok((CMatrix::zeros(n, 0), Vec::new()));
    }

    let eig = SymmetricEigen::try_new(hermitize(m), f64::EPSILON, MAX_EIG_ITERS)
        .ok_or_else(|| {
            IaError::EigenDecomposition(format!("Hermitian {}x{} did not converge", n, n))
        })?;

    let mut order: Vec<usize> = (0..n).collect();
    // Stable sort keeps index order on ties
    order.sort_by(|&a, &b| {
        let ord = eig.eigenvalues[a]
            .partial_cmp(&eig.eigenvalues[b])
            .unwrap_or(Ordering::Equal);
        if principal {
            ord.reverse()
        } else {
            ord
        }
    });

    let selected = &order[..count];
    let vectors = CMatrix::from_fn(n, count, |i, j| eig.eigenvectors[(i, selected[j])]);
    let values = selected.iter().map(|&idx| eig.eigenvalues[idx]).collect();
    Ok((vectors, values))
}

/// Principal eigenvectors (largest eigenvalues).
pub fn peig(m: &CMatrix, count: usize) -> IaResult<(CMatrix, Vec<f64>)> {
    select_eigenvectors(m, count, true)
}

/// Least eigenvectors (smallest eigenvalues).
pub fn leig(m: &CMatrix, count: usize) -> IaResult<(CMatrix, Vec<f64>)> {
    select_eigenvectors(m, count, false)
}

/// Eigenvalues and unit-norm eigenvectors of a general complex matrix.
///
/// Computes the complex Schur form `A = Q T Q^H` and back-substitutes on the
/// upper-triangular `T`: for eigenvalue `t_ii` the vector `y` with `y_i = 1`,
/// `y_j = 0` for `j > i` solves `(T - t_ii I) y = 0`, and `Q y` is the
/// eigenvector of `A`. Column `i` of the returned matrix belongs to
/// eigenvalue `i`.
pub fn eig_general(m: &CMatrix) -> IaResult<(Vec<Complex64>, CMatrix)> {
    let n = m.nrows();
    if !m.is_square() {
        return Err(IaError::Dimension(format!(
            "eigen-decomposition needs a square matrix, got {}x{}",
            n,
            m.ncols()
        )));
    }
    if n == 0 {
        return Ok((Vec::new(), CMatrix::zeros(0, 0)));
    }

    let schur = Schur::try_new(m.clone(), f64::EPSILON, MAX_EIG_ITERS).ok_or_else(|| {
        IaError::EigenDecomposition(format!("complex Schur {}x{} did not converge", n, n))
    })?;
    let (q, t) = schur.unpack();

    let values: Vec<Complex64> = (0..n).map(|i| t[(i, i)]).collect();
    let mut vectors = CMatrix::zeros(n, n);

    for i in 0..n {
        let lambda = values[i];
        let mut y = vec![Complex64::new(0.0, 0.0); n];
        y[i] = Complex64::new(1.0, 0.0);

        for j in (0..i).rev() {
            let mut s = Complex64::new(0.0, 0.0);
            for (l, y_l) in y.iter().enumerate().take(i + 1).skip(j + 1) {
                s += t[(j, l)] * y_l;
            }
            let mut pivot = t[(j, j)] - lambda;
            if pivot.norm() < BACKSUB_MIN_PIVOT {
                // Repeated eigenvalue: perturb the pivot like xTREVC does
                pivot = Complex64::new(BACKSUB_MIN_PIVOT, 0.0);
            }
            y[j] = -s / pivot;
        }

        let mut v = CMatrix::zeros(n, 1);
        for row in 0..n {
            let mut acc = Complex64::new(0.0, 0.0);
            for (l, y_l) in y.iter().enumerate().take(i + 1) {
                acc += q[(row, l)] * y_l;
            }
            v[(row, 0)] = acc;
        }
        let norm = v.norm();
        if norm > 0.0 && norm.is_finite() {
            v.unscale_mut(norm);
        }
        vectors.set_column(i, &v.column(0));
    }

    Ok((values, vectors))
}

/// `count` eigenvectors of a general matrix, largest eigenvalue modulus
/// first (ties keep index order).
pub fn select_general_eigenvectors(m: &CMatrix, count: usize) -> IaResult<CMatrix> {
    let n = m.nrows();
    if count > n {
        return Err(IaError::Dimension(format!(
            "requested {} eigenvectors of a {}x{} matrix",
            count,
            n,
            m.ncols()
        )));
    }
    let (values, vectors) = eig_general(m)?;
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .norm()
            .partial_cmp(&values[a].norm())
            .unwrap_or(Ordering::Equal)
    });
    Ok(CMatrix::from_fn(n, count, |i, j| vectors[(i, order[j])]))
}
