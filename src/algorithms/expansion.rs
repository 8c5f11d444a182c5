//! Expansion of reduced solutions back to the full space.
//!
//! For each sweep sample the full displacement is rebuilt as `x_i = Q y_i`. Optionally
//! the vector is re-expressed in user numbering through the [`crate::assembly::DofMap`],
//! and the residual `A(ω_i) x_i - r_i F0` is measured against the exact same frequency
//! and load ratio the reduced solve used. Residual vectors are kept alongside their norms.

use super::{
    angular_frequency, dynamic_stiffness,
    reduced::{ReducedSolution, sample_rhs},
    subspace::KrylovBasis,
};
use crate::{
    assembly::{AssembledSystem, SolutionRecord},
    backend::{LinearAlgebraBackend, VectorNorm},
    error::{KrylovError, KrylovErrorKind},
};
use faer::{Mat, MatRef, c64};
use serde::Serialize;
use std::str::FromStr;

/// Norm used to report residuals, or `Off` to skip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidualNorm {
    #[default]
    Off,
    Inf,
    L1,
    L2,
}

impl ResidualNorm {
    /// The vector norm to evaluate, if any.
    pub fn vector_norm(self) -> Option<VectorNorm> {
        match self {
            ResidualNorm::Off => None,
            ResidualNorm::Inf => Some(VectorNorm::Inf),
            ResidualNorm::L1 => Some(VectorNorm::L1),
            ResidualNorm::L2 => Some(VectorNorm::L2),
        }
    }
}

impl FromStr for ResidualNorm {
    type Err = KrylovError;

    /// Accepts `off`, `inf`, `l1`, `l2` (case-insensitive, `l-1` style also accepted)
    /// and the numeric codes `0` to `3` in the same order.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Ok(ResidualNorm::Off),
            "inf" | "linf" | "l-inf" | "1" => Ok(ResidualNorm::Inf),
            "l1" | "l-1" | "2" => Ok(ResidualNorm::L1),
            "l2" | "l-2" | "3" => Ok(ResidualNorm::L2),
            other => Err(KrylovErrorKind::InvalidParameter(format!(
                "unsupported residual algorithm '{other}', expected one of off, inf, l1, l2"
            ))
            .into()),
        }
    }
}

/// Options of the expansion stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandOptions {
    /// Compute a residual record per sample (skipped when `residual_norm` is `Off`).
    pub residual_computation: bool,
    pub residual_norm: ResidualNorm,
    /// Materialize user-ordered `(node, equation, value)` records per sample.
    pub compute_solution_vectors: bool,
    /// Hand the solution vectors back to the caller instead of only retaining them.
    pub return_solution: bool,
}

/// Accuracy of one expanded sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResidualRecord {
    /// 1-based sample index.
    pub sample: usize,
    pub frequency_hz: f64,
    /// `||A x - F|| / ||F||`, or `||A x - F||` when `||F|| = 0`.
    pub relative_residual: f64,
    pub rhs_norm: f64,
}

/// User-ordered displacement records, one list per sweep sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionVectors {
    pub frequencies_hz: Vec<f64>,
    pub samples: Vec<Vec<SolutionRecord>>,
}

impl SolutionVectors {
    pub fn steps(&self) -> usize {
        self.samples.len()
    }

    /// Records of 0-based sample `i`, or `None` past the last sample.
    pub fn sample(&self, i: usize) -> Option<&[SolutionRecord]> {
        self.samples.get(i).map(Vec::as_slice)
    }
}

/// Output of the expansion stage.
#[derive(Debug, Clone)]
pub struct Expansion {
    frequencies_hz: Vec<f64>,
    displacements: Mat<c64>,
    residuals: Vec<ResidualRecord>,
    residual_vectors: Option<Mat<c64>>,
    solution: Option<SolutionVectors>,
}

impl Expansion {
    /// The `n x steps` matrix `D` of solver-ordered displacements.
    pub fn displacements(&self) -> MatRef<'_, c64> {
        self.displacements.as_ref()
    }

    /// Displacement of 0-based sample `i` as an `n x 1` block, or `None` past the last
    /// sample.
    pub fn displacement(&self, i: usize) -> Option<MatRef<'_, c64>> {
        (i < self.steps()).then(|| self.displacements.as_ref().get(.., i..i + 1))
    }

    pub fn steps(&self) -> usize {
        self.displacements.ncols()
    }

    /// Frequencies (Hz) of the expanded samples.
    pub fn frequencies_hz(&self) -> &[f64] {
        &self.frequencies_hz
    }

    pub fn residuals(&self) -> &[ResidualRecord] {
        &self.residuals
    }

    /// The `n x steps` matrix of solver-ordered residual vectors `A(ω_i) x_i - r_i F0`,
    /// present when residuals were computed.
    pub fn residual_vectors(&self) -> Option<MatRef<'_, c64>> {
        self.residual_vectors.as_ref().map(|r| r.as_ref())
    }

    pub fn solution_vectors(&self) -> Option<&SolutionVectors> {
        self.solution.as_ref()
    }
}

/// Expands every sample of `reduced` to the full space.
///
/// # Arguments
/// * `backend`: The linear algebra engine.
/// * `system`: The system the basis was built for.
/// * `basis`: The basis `Q` the reduced solution refers to.
/// * `reduced`: Output of [`super::reduced::solve_sweep`].
/// * `options`: Residual and solution-vector settings.
pub fn expand<B: LinearAlgebraBackend>(
    backend: &B,
    system: &AssembledSystem<B::Matrix>,
    basis: &KrylovBasis,
    reduced: &ReducedSolution,
    options: &ExpandOptions,
) -> Result<Expansion, KrylovError> {
    let q = basis.q();
    if reduced.y().nrows() != basis.dim() {
        return Err(KrylovErrorKind::DimensionMismatch {
            what: "reduced solution rows",
            expected: basis.dim(),
            actual: reduced.y().nrows(),
        }
        .into());
    }
    if q.nrows() != system.ndof() {
        return Err(KrylovErrorKind::DimensionMismatch {
            what: "Krylov basis rows",
            expected: system.ndof(),
            actual: q.nrows(),
        }
        .into());
    }

    let residual_norm = if options.residual_computation {
        let kind = options.residual_norm.vector_norm();
        if kind.is_none() {
            log::info!("Residual computation requested with norm 'off'; skipping residuals.");
        }
        kind
    } else {
        None
    };
    if options.return_solution && !options.compute_solution_vectors {
        log::warn!("`return_solution` has no effect without `compute_solution_vectors`.");
    }

    let steps = reduced.steps();
    let one = c64::new(1.0, 0.0);
    let mut displacements = Mat::<c64>::zeros(system.ndof(), steps);
    let mut residuals = Vec::new();
    let mut residual_vectors = residual_norm.map(|_| Mat::<c64>::zeros(system.ndof(), steps));
    let mut samples = Vec::new();

    for i in 0..steps {
        let hz = reduced.frequencies_hz()[i];
        let ratio = reduced.load_ratios()[i];

        // x_i = sum_j y_i[j] q_j
        let x = backend.dense_matmul(q, reduced.y().get(.., i..i + 1));
        displacements.col_mut(i).copy_from(x.col(0));

        if options.compute_solution_vectors {
            samples.push(system.dof_map().user_order(x.as_ref()));
        }

        if let Some(kind) = residual_norm {
            let rhs = sample_rhs(system.load(), ratio);
            let a = dynamic_stiffness(backend, system, angular_frequency(hz))?;
            let mut r = backend.matmul(&a, x.as_ref());
            backend.axpy(-one, rhs.as_ref(), one, r.as_mut());

            if let Some(vectors) = residual_vectors.as_mut() {
                vectors.col_mut(i).copy_from(r.col(0));
            }

            let r_norm = backend.norm(r.as_ref(), kind);
            let rhs_norm = backend.norm(rhs.as_ref(), kind);
            let relative_residual = if rhs_norm != 0.0 {
                r_norm / rhs_norm
            } else {
                r_norm
            };
            log::debug!(
                "Calculated {} residual norm at sample {}: |R| = {:.6e}, |F| = {:.6e}",
                kind,
                i + 1,
                relative_residual,
                rhs_norm
            );
            residuals.push(ResidualRecord {
                sample: i + 1,
                frequency_hz: hz,
                relative_residual,
                rhs_norm,
            });
        }
    }

    log::info!(
        "Expanded {} samples ({} residual records).",
        steps,
        residuals.len()
    );

    let solution = options.compute_solution_vectors.then(|| SolutionVectors {
        frequencies_hz: reduced.frequencies_hz().to_vec(),
        samples,
    });

    Ok(Expansion {
        frequencies_hz: reduced.frequencies_hz().to_vec(),
        displacements,
        residuals,
        residual_vectors,
        solution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithms::{
            reduced::{LoadProfile, solve_sweep},
            subspace::build_subspace,
        },
        backend::FaerBackend,
        matrix::SystemMatrix,
    };

    /// `K = diag(4, 9)`, `M = I`, undamped, unit load on both dofs.
    fn two_dof_system() -> AssembledSystem {
        let stiffness = [4.0, 9.0];
        AssembledSystem::with_identity_map(
            SystemMatrix::dense_from_real(2, 2, |i, j| if i == j { stiffness[i] } else { 0.0 }),
            SystemMatrix::dense_from_real(2, 2, |i, j| if i == j { 1.0 } else { 0.0 }),
            SystemMatrix::zeros(2),
            Mat::from_fn(2, 1, |_, _| c64::new(1.0, 0.0)),
        )
        .unwrap()
    }

    #[test]
    fn test_residual_vectors_match_residual_records() {
        let backend = FaerBackend;
        let system = two_dof_system();
        // A one-vector basis cannot represent the response away from 0 Hz.
        let basis = build_subspace(&backend, &system, 1, 0.0, false).unwrap().basis;
        let reduced =
            solve_sweep(&backend, &system, &basis, 0.0, 1.0, 2, LoadProfile::Ramped).unwrap();
        let options = ExpandOptions {
            residual_computation: true,
            residual_norm: ResidualNorm::L2,
            ..Default::default()
        };
        let expansion = expand(&backend, &system, &basis, &reduced, &options).unwrap();

        let r = expansion.residual_vectors().unwrap();
        assert_eq!((r.nrows(), r.ncols()), (2, 2));
        assert_eq!(expansion.residuals().len(), 2);
        for record in expansion.residuals() {
            let absolute = r.get(.., record.sample - 1..record.sample).norm_l2();
            assert!(absolute > 1e-6);
            assert!((absolute - record.relative_residual * record.rhs_norm).abs() < 1e-12);
        }
        assert_eq!(expansion.frequencies_hz(), &[0.5, 1.0]);

        let without = expand(&backend, &system, &basis, &reduced, &ExpandOptions::default())
            .unwrap();
        assert!(without.residual_vectors().is_none());
        assert!(without.residuals().is_empty());
    }

    #[test]
    fn test_accessors_past_last_sample_are_none() {
        let backend = FaerBackend;
        let system = two_dof_system();
        let basis = build_subspace(&backend, &system, 2, 0.0, false).unwrap().basis;
        let reduced =
            solve_sweep(&backend, &system, &basis, 0.0, 1.0, 2, LoadProfile::Stepped).unwrap();
        let options = ExpandOptions {
            compute_solution_vectors: true,
            ..Default::default()
        };
        let expansion = expand(&backend, &system, &basis, &reduced, &options).unwrap();

        assert_eq!(expansion.steps(), 2);
        assert!(expansion.displacement(1).is_some());
        assert!(expansion.displacement(2).is_none());
        let vectors = expansion.solution_vectors().unwrap();
        assert_eq!(vectors.sample(1).map(<[SolutionRecord]>::len), Some(2));
        assert!(vectors.sample(2).is_none());
    }

    #[test]
    fn test_residual_norm_parsing() {
        assert_eq!("off".parse::<ResidualNorm>().unwrap(), ResidualNorm::Off);
        assert_eq!("INF".parse::<ResidualNorm>().unwrap(), ResidualNorm::Inf);
        assert_eq!("l-1".parse::<ResidualNorm>().unwrap(), ResidualNorm::L1);
        assert_eq!(" l2 ".parse::<ResidualNorm>().unwrap(), ResidualNorm::L2);
        assert_eq!("3".parse::<ResidualNorm>().unwrap(), ResidualNorm::L2);
        assert_eq!("0".parse::<ResidualNorm>().unwrap(), ResidualNorm::Off);
    }

    #[test]
    fn test_unsupported_residual_norm_is_invalid_parameter() {
        let err = "frobenius".parse::<ResidualNorm>().unwrap_err();
        assert!(matches!(err.kind(), KrylovErrorKind::InvalidParameter(_)));
        assert!("4".parse::<ResidualNorm>().is_err());
    }

    #[test]
    fn test_vector_norm_mapping() {
        assert_eq!(ResidualNorm::Off.vector_norm(), None);
        assert_eq!(ResidualNorm::Inf.vector_norm(), Some(VectorNorm::Inf));
        assert_eq!(ResidualNorm::L1.vector_norm(), Some(VectorNorm::L1));
        assert_eq!(ResidualNorm::L2.vector_norm(), Some(VectorNorm::L2));
    }
}
