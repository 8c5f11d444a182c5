//! Second-order Krylov subspace generation.
//!
//! Builds an orthonormal basis `Q` for the response of `(K, M, C)` around an expansion
//! frequency `f0`. With `ω0 = 2π f0`, the dynamic stiffness `A = K - ω0²M + iω0C` is
//! factorized once, and the derivative matrix `Cd = C + 2iω0 M` drives the recurrence:
//!
//! ```text
//! A u1 = F0
//! A u2 = -Cd q1
//! A uk = -(Cd q(k-1) + M q(k-2))      k >= 3
//! ```
//!
//! When `Cd` vanishes (undamped model expanded at 0 Hz) the recurrence collapses to the
//! first-order form `A uk = -M q(k-1)` and `Cd` is never applied. Every candidate is
//! orthogonalized against all previous columns with modified Gram-Schmidt, repeated
//! once when the first pass cancels most of the candidate, and normalized. A candidate
//! that vanishes after orthogonalization means the subspace is invariant; generation
//! stops there and the achieved dimension is reported.

use super::{angular_frequency, check_frequency, dynamic_stiffness};
use crate::{
    assembly::AssembledSystem,
    backend::{Factorization, LinearAlgebraBackend, VectorNorm, ensure_finite},
    error::{KrylovError, KrylovErrorKind},
};
use faer::{Mat, MatMut, MatRef, Scale, c64};

/// Maximum deviation of the Gram matrix from the identity for a basis to count as
/// orthonormal.
pub const ORTHOGONALITY_TOLERANCE: f64 = 1e-8;

/// Relative norm below which an orthogonalized candidate is treated as zero.
pub const SATURATION_TOLERANCE: f64 = 1e-8;

/// A Gram-Schmidt pass that leaves less than this fraction of the candidate's norm is
/// followed by a second pass.
pub const REORTHOGONALIZATION_THRESHOLD: f64 = 0.7;

/// Which recurrence generated the basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// `A uk = -M q(k-1)`, used when the derivative matrix `Cd` is zero.
    FirstOrder,
    /// `A uk = -(Cd q(k-1) + M q(k-2))`.
    SecondOrder,
}

/// An orthonormal Krylov basis and its provenance.
#[derive(Debug, Clone)]
pub struct KrylovBasis {
    q: Mat<c64>,
    requested_dim: usize,
    frequency_hz: f64,
    recurrence: Recurrence,
    saturated: bool,
    orthogonality: Option<Mat<f64>>,
}

impl KrylovBasis {
    /// The `n x m` basis matrix.
    pub fn q(&self) -> MatRef<'_, c64> {
        self.q.as_ref()
    }

    /// Achieved dimension `m`.
    pub fn dim(&self) -> usize {
        self.q.ncols()
    }

    /// The `max_dim` the basis was requested with.
    pub fn requested_dim(&self) -> usize {
        self.requested_dim
    }

    /// `true` if generation stopped before `requested_dim` because the subspace became
    /// invariant.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn recurrence(&self) -> Recurrence {
        self.recurrence
    }

    /// Expansion frequency `f0` in Hz.
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// The `m x m` matrix of `|<q_i, q_j>|`, present when the check was requested.
    pub fn orthogonality(&self) -> Option<MatRef<'_, f64>> {
        self.orthogonality.as_ref().map(|g| g.as_ref())
    }

    /// Whether the orthogonality matrix is within [`ORTHOGONALITY_TOLERANCE`] of the
    /// identity. `None` if the check was not requested.
    pub fn is_orthogonal(&self) -> Option<bool> {
        self.orthogonality
            .as_ref()
            .map(|g| identity_deviation(g.as_ref()) <= ORTHOGONALITY_TOLERANCE)
    }
}

/// Result of [`build_subspace`]: the basis and the factorized reference matrix `A(ω0)`.
pub struct SubspaceOutput<F> {
    pub basis: KrylovBasis,
    pub reference_factor: F,
}

/// Computes the `m x m` matrix of pairwise inner-product magnitudes `|q_i^H q_j|`.
pub fn orthogonality_matrix(q: MatRef<'_, c64>) -> Mat<f64> {
    let gram = q.adjoint() * q;
    Mat::from_fn(gram.nrows(), gram.ncols(), |i, j| gram[(i, j)].norm())
}

/// Largest entry of `|G - I|`.
pub fn identity_deviation(g: MatRef<'_, f64>) -> f64 {
    let mut worst = 0.0_f64;
    for j in 0..g.ncols() {
        for i in 0..g.nrows() {
            let target = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((g[(i, j)] - target).abs());
        }
    }
    worst
}

/// One modified Gram-Schmidt sweep of `u` against the first `dim` columns of `q`.
/// Returns the norm of `u` afterwards.
fn orthogonalize<B: LinearAlgebraBackend>(
    backend: &B,
    q: MatRef<'_, c64>,
    dim: usize,
    mut u: MatMut<'_, c64>,
) -> f64 {
    let one = c64::new(1.0, 0.0);
    for j in 0..dim {
        let qj = q.get(.., j..j + 1);
        let h = backend.dot(qj, u.as_ref());
        backend.axpy(-h, qj, one, u.as_mut());
    }
    backend.norm(u.as_ref(), VectorNorm::L2)
}

/// Generates an orthonormal Krylov basis of dimension at most `max_dim` at `frequency_hz`.
///
/// # Arguments
/// * `backend`: The linear algebra engine.
/// * `system`: The assembled `(K, M, C, F0)` system.
/// * `max_dim`: Upper bound on the basis dimension. Must be positive.
/// * `frequency_hz`: Expansion frequency `f0`. Must be finite and non-negative.
/// * `check_orthogonality`: Whether to compute the diagnostic Gram matrix.
///
/// # Returns
/// The basis (possibly truncated by saturation) and the reusable factorization of
/// `A(ω0)`. Saturation is not an error; see [`KrylovBasis::is_saturated`].
pub fn build_subspace<B: LinearAlgebraBackend>(
    backend: &B,
    system: &AssembledSystem<B::Matrix>,
    max_dim: usize,
    frequency_hz: f64,
    check_orthogonality: bool,
) -> Result<SubspaceOutput<B::Factor>, KrylovError> {
    if max_dim == 0 {
        return Err(KrylovErrorKind::InvalidParameter(
            "The maximum size of the Krylov subspace must be greater than 0".to_string(),
        )
        .into());
    }
    check_frequency("frequency", frequency_hz)?;

    let n = system.ndof();
    let one = c64::new(1.0, 0.0);
    let omega0 = angular_frequency(frequency_hz);

    let a = dynamic_stiffness(backend, system, omega0)?;
    let cd = backend.combine(&[
        (one, system.damping()),
        (c64::new(0.0, 2.0 * omega0), system.mass()),
    ])?;
    let recurrence = if backend.matrix_norm(&cd) <= f64::EPSILON * backend.matrix_norm(&a) {
        Recurrence::FirstOrder
    } else {
        Recurrence::SecondOrder
    };
    log::debug!(
        "Building Krylov subspace: n = {}, max_dim = {}, f0 = {} Hz, {:?} recurrence",
        n,
        max_dim,
        frequency_hz,
        recurrence
    );

    // Single factorization of A(ω0); every basis vector is a back-solve against it.
    let factor = backend.factorize(&a)?;

    // No more than n independent directions exist, so that bounds the allocation.
    let capacity = max_dim.min(n);
    let mut q = Mat::<c64>::zeros(n, capacity);

    let u1 = factor.solve(system.load());
    ensure_finite(u1.as_ref(), "first Krylov vector")?;
    let u1_norm = backend.norm(u1.as_ref(), VectorNorm::L2);
    if u1_norm == 0.0 {
        return Err(KrylovErrorKind::Artifact(
            "the reference load vector is identically zero".to_string(),
        )
        .into());
    }
    let u1 = &u1 * Scale(c64::new(1.0 / u1_norm, 0.0));
    q.col_mut(0).copy_from(u1.col(0));

    let mut dim = 1;
    let mut saturated = false;

    while dim < max_dim {
        if dim == n {
            // The basis already spans the whole space.
            saturated = true;
            break;
        }

        let rhs = match recurrence {
            Recurrence::SecondOrder if dim == 1 => {
                let cq = backend.matmul(&cd, q.as_ref().get(.., 0..1));
                &cq * Scale(-one)
            }
            Recurrence::SecondOrder => {
                let mut rhs = backend.matmul(&cd, q.as_ref().get(.., dim - 1..dim));
                let mq = backend.matmul(system.mass(), q.as_ref().get(.., dim - 2..dim - 1));
                // rhs = -rhs - mq
                backend.axpy(-one, mq.as_ref(), -one, rhs.as_mut());
                rhs
            }
            Recurrence::FirstOrder => {
                let mq = backend.matmul(system.mass(), q.as_ref().get(.., dim - 1..dim));
                &mq * Scale(-one)
            }
        };

        let mut u = factor.solve(rhs.as_ref());
        ensure_finite(u.as_ref(), "Krylov vector")?;
        let norm_before = backend.norm(u.as_ref(), VectorNorm::L2);

        let mut norm_after = orthogonalize(backend, q.as_ref(), dim, u.as_mut());
        if norm_after < REORTHOGONALIZATION_THRESHOLD * norm_before {
            norm_after = orthogonalize(backend, q.as_ref(), dim, u.as_mut());
        }
        if norm_after <= SATURATION_TOLERANCE * norm_before {
            saturated = true;
            break;
        }

        let u = &u * Scale(c64::new(1.0 / norm_after, 0.0));
        q.col_mut(dim).copy_from(u.col(0));
        dim += 1;
        log::debug!(
            "Krylov vector {} accepted (norm before/after orthogonalization: {:.3e}/{:.3e})",
            dim,
            norm_before,
            norm_after
        );
    }

    if saturated {
        log::warn!(
            "Krylov subspace saturated at dimension {} (requested {}).",
            dim,
            max_dim
        );
    }

    let q = if dim == capacity {
        q
    } else {
        q.as_ref().get(.., 0..dim).to_owned()
    };

    let orthogonality = check_orthogonality.then(|| orthogonality_matrix(q.as_ref()));
    if let Some(g) = &orthogonality {
        log::info!(
            "Orthogonality check: max |Q^H Q - I| = {:.3e}",
            identity_deviation(g.as_ref())
        );
    }
    log::info!("Krylov subspace built with dimension {}.", dim);

    Ok(SubspaceOutput {
        basis: KrylovBasis {
            q,
            requested_dim: max_dim,
            frequency_hz,
            recurrence,
            saturated,
            orthogonality,
        },
        reference_factor: factor,
    })
}
