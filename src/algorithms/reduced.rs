//! Reduced harmonic solve over a frequency sweep.
//!
//! Given a basis `Q` from [`super::subspace::build_subspace`], each sweep sample `i`
//! is solved in reduced coordinates:
//!
//! ```text
//! (Q^H A(ω_i) Q) y_i = Q^H (r_i F0)
//! ```
//!
//! where `r_i` is the load ratio of the sample. Only the products `A(ω_i) Q` touch the
//! full dimension `n`; the factorization is `m x m` and dense. Projection uses the
//! conjugate transpose, consistent with the Hermitian inner product under which `Q` is
//! orthonormal.

use super::{angular_frequency, check_frequency, dynamic_stiffness, subspace::KrylovBasis};
use crate::{
    assembly::AssembledSystem,
    backend::{Factorization, LinearAlgebraBackend, ensure_finite},
    error::{KrylovError, KrylovErrorKind},
};
use faer::{Mat, MatRef, Scale, c64};

/// How the excitation magnitude evolves across the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProfile {
    /// Grows linearly with the sample index and reaches full magnitude at the last sample.
    Ramped,
    /// Full magnitude at every sample.
    Stepped,
}

impl LoadProfile {
    /// Maps a "ramped load" flag to a profile.
    pub fn from_ramped(ramped: bool) -> Self {
        if ramped {
            LoadProfile::Ramped
        } else {
            LoadProfile::Stepped
        }
    }
}

/// Load ratio applied at 1-based `sample` out of `steps`.
///
/// Ramped loading yields `sample / steps`, pinned to 1.0 for a single-sample sweep.
pub fn load_ratio(profile: LoadProfile, sample: usize, steps: usize) -> f64 {
    match profile {
        LoadProfile::Stepped => 1.0,
        LoadProfile::Ramped if steps <= 1 => 1.0,
        LoadProfile::Ramped => sample as f64 / steps as f64,
    }
}

/// Frequencies (Hz) of the `steps` sweep samples.
///
/// Sample `i` sits at `start + i * (end - start) / steps`, so the last sample is at
/// `end` and the first is one increment above `start`.
pub fn sample_frequencies(start_hz: f64, end_hz: f64, steps: usize) -> Vec<f64> {
    let increment = (end_hz - start_hz) / steps as f64;
    (1..=steps)
        .map(|i| start_hz + i as f64 * increment)
        .collect()
}

/// The right-hand side `ratio * F0` of one sample.
pub fn sample_rhs(load: MatRef<'_, c64>, ratio: f64) -> Mat<c64> {
    load * Scale(c64::new(ratio, 0.0))
}

/// Reduced coordinates for every sweep sample, with the sweep definition needed to
/// reproduce each sample's system during expansion.
#[derive(Debug, Clone)]
pub struct ReducedSolution {
    y: Mat<c64>,
    frequencies_hz: Vec<f64>,
    load_ratios: Vec<f64>,
    load: LoadProfile,
}

impl ReducedSolution {
    /// The `m x steps` matrix `Y`; column `i` holds sample `i + 1`.
    pub fn y(&self) -> MatRef<'_, c64> {
        self.y.as_ref()
    }

    /// Reduced coordinates of 0-based sample `i` as an `m x 1` block, or `None` past the
    /// last sample.
    pub fn sample(&self, i: usize) -> Option<MatRef<'_, c64>> {
        (i < self.steps()).then(|| self.y.as_ref().get(.., i..i + 1))
    }

    pub fn steps(&self) -> usize {
        self.y.ncols()
    }

    pub fn frequencies_hz(&self) -> &[f64] {
        &self.frequencies_hz
    }

    pub fn load_ratios(&self) -> &[f64] {
        &self.load_ratios
    }

    pub fn load_profile(&self) -> LoadProfile {
        self.load
    }

    /// Frequency of the last sample, i.e. the sweep end.
    pub fn final_frequency_hz(&self) -> f64 {
        self.frequencies_hz.last().copied().unwrap_or(0.0)
    }
}

/// Validates sweep parameters without touching the system.
pub fn check_sweep(freq_start: f64, freq_end: f64, freq_steps: usize) -> Result<(), KrylovError> {
    check_frequency("freq_start", freq_start)?;
    check_frequency("freq_end", freq_end)?;
    if freq_end < freq_start {
        return Err(KrylovErrorKind::InvalidParameter(format!(
            "`freq_end` ({freq_end} Hz) must not be below `freq_start` ({freq_start} Hz)"
        ))
        .into());
    }
    if freq_steps == 0 {
        return Err(KrylovErrorKind::InvalidParameter(
            "The number of frequency steps must be greater than 0".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Solves the reduced harmonic problem at `freq_steps` samples between `freq_start`
/// and `freq_end`.
///
/// # Arguments
/// * `backend`: The linear algebra engine.
/// * `system`: The system the basis was built for.
/// * `basis`: The Krylov basis `Q`.
/// * `freq_start`, `freq_end`: Sweep bounds in Hz, `0 <= freq_start <= freq_end`.
/// * `freq_steps`: Number of samples, positive.
/// * `load`: Ramped or stepped excitation.
pub fn solve_sweep<B: LinearAlgebraBackend>(
    backend: &B,
    system: &AssembledSystem<B::Matrix>,
    basis: &KrylovBasis,
    freq_start: f64,
    freq_end: f64,
    freq_steps: usize,
    load: LoadProfile,
) -> Result<ReducedSolution, KrylovError> {
    check_sweep(freq_start, freq_end, freq_steps)?;

    let q = basis.q();
    if q.nrows() != system.ndof() {
        return Err(KrylovErrorKind::DimensionMismatch {
            what: "Krylov basis rows",
            expected: system.ndof(),
            actual: q.nrows(),
        }
        .into());
    }

    let m = basis.dim();
    let frequencies_hz = sample_frequencies(freq_start, freq_end, freq_steps);
    let load_ratios: Vec<f64> = (1..=freq_steps)
        .map(|i| load_ratio(load, i, freq_steps))
        .collect();
    let mut y = Mat::<c64>::zeros(m, freq_steps);

    for (i, (&hz, &ratio)) in frequencies_hz.iter().zip(&load_ratios).enumerate() {
        let rhs = sample_rhs(system.load(), ratio);
        let qtf = backend.adjoint_matmul(q, rhs.as_ref());

        // The dynamic stiffness changes with frequency, so the reduced matrix is
        // rebuilt for every sample.
        let a = dynamic_stiffness(backend, system, angular_frequency(hz))?;
        let aq = backend.matmul(&a, q);
        let qtaq = backend.adjoint_matmul(q, aq.as_ref());

        let y_i = backend.factorize_dense(qtaq.as_ref())?.solve(qtf.as_ref());
        ensure_finite(y_i.as_ref(), "reduced system")?;
        y.col_mut(i).copy_from(y_i.col(0));

        log::debug!(
            "Reduced solve {}/{} at {} Hz (load ratio {})",
            i + 1,
            freq_steps,
            hz,
            ratio
        );
    }

    log::info!(
        "Reduced sweep solved: {} samples in [{}, {}] Hz with a {}-dimensional basis.",
        freq_steps,
        freq_start,
        freq_end,
        m
    );

    Ok(ReducedSolution {
        y,
        frequencies_hz,
        load_ratios,
        load,
    })
}
