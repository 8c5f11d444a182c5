//! The three numerical stages of a Krylov harmonic reduction.
//!
//! ** NOTE: We recommend driving the stages through [`crate::solvers::KrylovSolver`],
//! which enforces their order. The free functions here are for callers that manage
//! the intermediate state themselves.
//!
//! - [`subspace`]: builds the orthonormal second-order Krylov basis `Q` at `f0`.
//! - [`reduced`]: solves the projected `m x m` system at every sweep frequency.
//! - [`expansion`]: lifts reduced solutions to full displacement vectors, maps them to
//!   user numbering and measures residuals.

pub mod expansion;
pub mod reduced;
pub mod subspace;

use crate::{assembly::AssembledSystem, backend::LinearAlgebraBackend, error::KrylovError};
use faer::c64;
use std::f64::consts::PI;

/// Converts a frequency in Hz to an angular frequency in rad/s.
#[inline]
pub fn angular_frequency(hz: f64) -> f64 {
    2.0 * PI * hz
}

/// Forms the dynamic stiffness `A(ω) = K - ω²M + iωC`.
pub fn dynamic_stiffness<B: LinearAlgebraBackend>(
    backend: &B,
    system: &AssembledSystem<B::Matrix>,
    omega: f64,
) -> Result<B::Matrix, KrylovError> {
    backend.combine(&[
        (c64::new(1.0, 0.0), system.stiffness()),
        (c64::new(-omega * omega, 0.0), system.mass()),
        (c64::new(0.0, omega), system.damping()),
    ])
}

/// Rejects negative and non-finite frequencies.
pub(crate) fn check_frequency(name: &str, hz: f64) -> Result<(), KrylovError> {
    if hz.is_finite() && hz >= 0.0 {
        Ok(())
    } else {
        Err(crate::error::KrylovErrorKind::InvalidParameter(format!(
            "`{name}` must be a finite frequency >= 0 Hz, got {hz}"
        ))
        .into())
    }
}
