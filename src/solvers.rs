//! This module provides the high-level, stateful API for a Krylov harmonic reduction run.
//!
//! A run has three stages that must execute in order: subspace generation, the reduced
//! sweep, and expansion. [`KrylovSolver`] tracks progress as an explicit [`Stage`] and
//! rejects any operation whose predecessor has not completed with a
//! [`KrylovErrorKind::Sequence`] error. Later stages are discarded when an earlier one
//! is re-run, so the retained state always belongs to a single consistent run.

use crate::{
    algorithms::{
        expansion::{self, ExpandOptions, Expansion, SolutionVectors},
        reduced::{self, LoadProfile, ReducedSolution},
        subspace::{self, KrylovBasis, SubspaceOutput},
    },
    assembly::AssembledSystem,
    backend::{FaerBackend, LinearAlgebraBackend},
    error::{KrylovError, KrylovErrorKind},
    utils::data_loader::load_assembly,
};
use std::path::Path;

/// Progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Empty,
    SubspaceReady,
    SolutionReady,
    Expanded,
}

/// Products of the completed stages. A stage is only present when every earlier one
/// is.
struct RunState<F> {
    subspace: Option<SubspaceOutput<F>>,
    reduced: Option<ReducedSolution>,
    expansion: Option<Expansion>,
}

impl<F> RunState<F> {
    fn empty() -> Self {
        Self {
            subspace: None,
            reduced: None,
            expansion: None,
        }
    }

    fn stage(&self) -> Stage {
        match (&self.subspace, &self.reduced, &self.expansion) {
            (None, _, _) => Stage::Empty,
            (Some(_), None, _) => Stage::SubspaceReady,
            (Some(_), Some(_), None) => Stage::SolutionReady,
            (Some(_), Some(_), Some(_)) => Stage::Expanded,
        }
    }
}

/// A Krylov harmonic reduction run over one assembled system.
///
/// # Example
///
/// ```rust
/// use faer::{Mat, c64};
/// use krylov_harmonic::{
///     AssembledSystem, ExpandOptions, KrylovSolver, LoadProfile, ResidualNorm, SystemMatrix,
/// };
///
/// // Single spring-mass-damper: k = 4, m = 1, c = 0.5, F0 = 1.
/// let system = AssembledSystem::with_identity_map(
///     SystemMatrix::dense_from_real(1, 1, |_, _| 4.0),
///     SystemMatrix::dense_from_real(1, 1, |_, _| 1.0),
///     SystemMatrix::dense_from_real(1, 1, |_, _| 0.5),
///     Mat::from_fn(1, 1, |_, _| c64::new(1.0, 0.0)),
/// )
/// .unwrap();
///
/// let mut solver = KrylovSolver::new(system);
/// solver.build_subspace(1, 0.0, true).unwrap();
/// let y = solver.solve_sweep(0.0, 0.0, 1, LoadProfile::Stepped).unwrap();
/// assert!((y.y()[(0, 0)] - c64::new(0.25, 0.0)).norm() < 1e-12);
///
/// let options = ExpandOptions {
///     residual_computation: true,
///     residual_norm: ResidualNorm::L2,
///     ..Default::default()
/// };
/// solver.expand(&options).unwrap();
/// assert!(solver.expansion().unwrap().residuals()[0].relative_residual < 1e-12);
/// ```
pub struct KrylovSolver<B: LinearAlgebraBackend = FaerBackend> {
    backend: B,
    system: AssembledSystem<B::Matrix>,
    state: RunState<B::Factor>,
}

impl KrylovSolver<FaerBackend> {
    /// Creates a run over `system` with the `faer` backend.
    pub fn new(system: AssembledSystem) -> Self {
        Self::with_backend(FaerBackend, system)
    }

    /// Loads an assembly artifact from disk and creates a run over it.
    ///
    /// A missing file yields [`KrylovErrorKind::ArtifactNotFound`]; an unreadable or
    /// inconsistent one yields [`KrylovErrorKind::Artifact`].
    pub fn from_artifact(path: impl AsRef<Path>) -> Result<Self, KrylovError> {
        let system = load_assembly(path)?;
        Ok(Self::new(system))
    }
}

impl<B: LinearAlgebraBackend> KrylovSolver<B> {
    /// Creates a run over `system` driven by a custom backend.
    pub fn with_backend(backend: B, system: AssembledSystem<B::Matrix>) -> Self {
        Self {
            backend,
            system,
            state: RunState::empty(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    pub fn system(&self) -> &AssembledSystem<B::Matrix> {
        &self.system
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The current basis, once [`Self::build_subspace`] has completed.
    pub fn basis(&self) -> Option<&KrylovBasis> {
        self.state.subspace.as_ref().map(|s| &s.basis)
    }

    /// The factorization of `A(ω0)` retained from subspace generation.
    pub fn reference_factor(&self) -> Option<&B::Factor> {
        self.state.subspace.as_ref().map(|s| &s.reference_factor)
    }

    pub fn reduced_solution(&self) -> Option<&ReducedSolution> {
        self.state.reduced.as_ref()
    }

    pub fn expansion(&self) -> Option<&Expansion> {
        self.state.expansion.as_ref()
    }

    /// Discards all stages.
    pub fn reset(&mut self) {
        self.state = RunState::empty();
    }

    /// Generates the Krylov basis. Allowed in any stage; starts a new run.
    ///
    /// On error the previous state is left untouched.
    pub fn build_subspace(
        &mut self,
        max_dim: usize,
        frequency_hz: f64,
        check_orthogonality: bool,
    ) -> Result<&KrylovBasis, KrylovError> {
        let output = subspace::build_subspace(
            &self.backend,
            &self.system,
            max_dim,
            frequency_hz,
            check_orthogonality,
        )?;
        self.state.reduced = None;
        self.state.expansion = None;
        Ok(&self.state.subspace.insert(output).basis)
    }

    /// Solves the reduced system across the sweep. Requires a basis; discards any
    /// previous sweep and expansion.
    pub fn solve_sweep(
        &mut self,
        freq_start: f64,
        freq_end: f64,
        freq_steps: usize,
        load: LoadProfile,
    ) -> Result<&ReducedSolution, KrylovError> {
        let Some(subspace) = &self.state.subspace else {
            return Err(KrylovErrorKind::Sequence {
                operation: "solve_sweep",
                requires: "build_subspace",
            }
            .into());
        };
        let reduced = reduced::solve_sweep(
            &self.backend,
            &self.system,
            &subspace.basis,
            freq_start,
            freq_end,
            freq_steps,
            load,
        )?;

        self.state.expansion = None;
        Ok(self.state.reduced.insert(reduced))
    }

    /// Expands the reduced solution. Requires a completed sweep; may be repeated with
    /// different options.
    ///
    /// Solution vectors are always retained (see [`Self::expansion`]); a copy is
    /// returned when both `compute_solution_vectors` and `return_solution` are set.
    pub fn expand(
        &mut self,
        options: &ExpandOptions,
    ) -> Result<Option<SolutionVectors>, KrylovError> {
        let (Some(subspace), Some(reduced)) = (&self.state.subspace, &self.state.reduced) else {
            return Err(KrylovErrorKind::Sequence {
                operation: "expand",
                requires: "solve_sweep",
            }
            .into());
        };
        let expansion = expansion::expand(
            &self.backend,
            &self.system,
            &subspace.basis,
            reduced,
            options,
        )?;

        let returned = if options.return_solution {
            expansion.solution_vectors().cloned()
        } else {
            None
        };

        self.state.expansion = Some(expansion);
        Ok(returned)
    }
}
