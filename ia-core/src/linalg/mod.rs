//! Linear algebra layer.
//!
//! Dense complex matrix helpers and the Hermitian eigenvector selection
//! shared by every solver.

pub mod dense;
pub mod eigen;

pub use dense::CMatrix;
pub use eigen::{leig, peig, select_eigenvectors};
