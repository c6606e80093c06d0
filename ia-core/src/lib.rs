//! Interference alignment for multi-user MIMO channels.
//!
//! Given the channels between every transmitter and receiver of a K-user
//! interference channel, the solvers in this crate compute per-user transmit
//! precoders `F[k]` and receive filters `W[k]` that squeeze the interference
//! seen by each receiver into a subspace of reduced dimension, leaving the
//! rest free for the desired streams.
//!
//! Available algorithms:
//!
//! - **Alternating minimization**: interference subspace, least-leakage
//!   precoders and zero-forcing filters, updated in turn
//! - **Max-SINR**: per-stream MMSE combiners on the forward and reciprocal
//!   networks
//! - **Minimum leakage**: least-interfered directions on both sides
//! - **MMSE**: regularised MMSE filters with power-constrained precoders
//! - **Closed form**: direct solution for three users with `M x M` antennas
//!   and `M / 2` streams
//!
//! # Example
//!
//! ```
//! use ia_core::{AltMinSolver, IaSolver, MultiUserChannel, SolverSettings, UserDims};
//!
//! let channel = MultiUserChannel::with_seeds(1, 2);
//! let settings = SolverSettings::default().with_max_iterations(50);
//! let mut solver = AltMinSolver::with_settings(channel, settings);
//!
//! solver.state_mut().randomize_h(2, 2, 2).unwrap();
//! let info = solver.solve(UserDims::from(1)).unwrap();
//!
//! println!("{} after {} iterations, cost {:.3e}", info.status, info.iterations, info.final_cost);
//! let f0 = &solver.state().f()[0];
//! assert_eq!(f0.shape(), (2, 1));
//! ```
//!
//! Every call is synchronous. Solvers own their channel, so independent
//! trials can run on separate threads with one channel/solver pair each.

#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod linalg;
pub mod settings;
pub mod solvers;

// Re-export main types
pub use channel::MultiUserChannel;
pub use error::{IaError, IaResult};
pub use linalg::CMatrix;
pub use settings::{SolveInfo, SolveStatus, SolverSettings, UserDims};
pub use solvers::{
    AltMinSolver, ClosedFormSolver, IaSolver, IaState, MaxSinrSolver, MinLeakageSolver,
    MmseSolver,
};
