//! Krylov model-order reduction for harmonic analysis of damped structures.
//!
//! This crate computes the steady-state response of a structural model
//!
//! ```text
//! (K - ω²M + iωC) x(ω) = r(ω) F0
//! ```
//!
//! over a frequency sweep without solving the full `n x n` system at every frequency.
//! A single factorization of the dynamic stiffness at an expansion frequency `f0`
//! generates an orthonormal second-order Krylov basis `Q` of small dimension `m`. Each
//! sweep sample is then solved in the reduced space, and the reduced solutions are
//! expanded back to full displacement vectors with an optional residual check.
//!
//! Built on the [`faer`] linear algebra framework, system matrices may be dense
//! ([`faer::Mat`]) or sparse ([`faer::sparse::SparseColMat`]); both are wrapped by
//! [`SystemMatrix`] and reach the numerical stages only through the
//! [`LinearAlgebraBackend`] trait.
//!
//! ## Stages
//!
//! **Subspace generation** ([`algorithms::subspace`]): factorizes `A(ω0)` once and runs
//! the second-order recurrence with modified Gram-Schmidt. Stops early, without error,
//! when the subspace becomes invariant.
//!
//! **Reduced sweep** ([`algorithms::reduced`]): solves `(Q^H A(ω_i) Q) y_i = Q^H r_i F0`
//! for every sample, with a ramped or stepped load profile.
//!
//! **Expansion** ([`algorithms::expansion`]): rebuilds `x_i = Q y_i`, maps it to user
//! node numbering and measures `||A(ω_i) x_i - r_i F0||` in the requested norm.
//!
//! [`KrylovSolver`] drives the three stages as a state machine and rejects out-of-order
//! calls with a [`KrylovErrorKind::Sequence`] error.
//!
//! ## Example Usage
//!
//! A three-mass chain, damped, swept from 0 to 2 Hz with a basis of full dimension.
//! With `m = n` the reduction is exact and the residuals vanish.
//!
//! ```rust
//! use faer::{Mat, c64};
//! use krylov_harmonic::{
//!     AssembledSystem, ExpandOptions, KrylovSolver, LoadProfile, ResidualNorm, SystemMatrix,
//! };
//!
//! let k = SystemMatrix::dense_from_real(3, 3, |i, j| match (i, j) {
//!     (2, 2) => 100.0,
//!     _ if i == j => 200.0,
//!     _ if i.abs_diff(j) == 1 => -100.0,
//!     _ => 0.0,
//! });
//! let m = SystemMatrix::dense_from_real(3, 3, |i, j| if i == j { 1.0 } else { 0.0 });
//! let c = SystemMatrix::dense_from_real(3, 3, |i, j| if i == j { 0.5 } else { 0.0 });
//! let f0 = Mat::from_fn(3, 1, |i, _| c64::new(if i == 2 { 1.0 } else { 0.0 }, 0.0));
//!
//! let system = AssembledSystem::with_identity_map(k, m, c, f0).unwrap();
//! let mut solver = KrylovSolver::new(system);
//!
//! let basis = solver.build_subspace(3, 1.0, true).unwrap();
//! assert_eq!(basis.dim(), 3);
//! assert_eq!(basis.is_orthogonal(), Some(true));
//!
//! solver.solve_sweep(0.0, 2.0, 4, LoadProfile::Ramped).unwrap();
//!
//! let options = ExpandOptions {
//!     residual_computation: true,
//!     residual_norm: ResidualNorm::L2,
//!     compute_solution_vectors: true,
//!     return_solution: true,
//! };
//! let vectors = solver.expand(&options).unwrap().unwrap();
//! assert_eq!(vectors.steps(), 4);
//!
//! for record in solver.expansion().unwrap().residuals() {
//!     assert!(record.relative_residual < 1e-9);
//! }
//! ```

pub mod algorithms;
pub mod assembly;
pub mod backend;
pub mod error;
pub mod matrix;
pub mod report;
pub mod solvers;
pub mod utils;

pub use algorithms::{
    expansion::{ExpandOptions, Expansion, ResidualNorm, ResidualRecord, SolutionVectors},
    reduced::{LoadProfile, ReducedSolution},
    subspace::{KrylovBasis, Recurrence},
};
pub use assembly::{AssembledSystem, DofMap, SolutionRecord};
pub use backend::{FaerBackend, LinearAlgebraBackend};
pub use error::{KrylovError, KrylovErrorKind};
pub use matrix::SystemMatrix;
pub use solvers::{KrylovSolver, Stage};
