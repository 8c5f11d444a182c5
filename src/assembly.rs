//! The assembled dynamic system consumed by the reduction pipeline.
//!
//! An [`AssembledSystem`] bundles the stiffness `K`, mass `M` and damping `C` matrices,
//! the reference load vector `F0`, and the [`DofMap`] that relates the solver's equation
//! ordering to user-facing node numbering. It is immutable once constructed; every
//! stage of a run borrows it.
//!
//! Three orderings are involved:
//! - *solver* equations: the rows of `K`, `M`, `C` and `F0` (constrained dofs removed);
//! - *internal* equations: `num_nodes * dofs_per_node`, node-major;
//! - *user* numbering: external node ids as defined in the model, 1-based.

use crate::{
    error::{KrylovError, KrylovErrorKind},
    matrix::{LinearOperator, SystemMatrix},
};
use faer::{Mat, MatRef, c64};

/// One displacement entry in user numbering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolutionRecord {
    /// External node id (1-based).
    pub node: usize,
    /// External equation id, `(node - 1) * dofs_per_node + dof` (1-based).
    pub equation: usize,
    pub value: c64,
}

/// Mapping tables between solver, internal and user numbering.
#[derive(Debug, Clone, PartialEq)]
pub struct DofMap {
    /// `forward[ext - 1]` is the 0-based internal node of external node `ext`, if any.
    forward: Vec<Option<usize>>,
    /// `back[int]` is the 1-based external node id of internal node `int`.
    back: Vec<usize>,
    /// `solver_to_internal[s]` is the 0-based internal equation of solver equation `s`.
    solver_to_internal: Vec<usize>,
    dofs_per_node: usize,
}

impl DofMap {
    /// Builds and validates a mapping.
    pub fn new(
        forward: Vec<Option<usize>>,
        back: Vec<usize>,
        solver_to_internal: Vec<usize>,
        dofs_per_node: usize,
    ) -> Result<Self, KrylovError> {
        if dofs_per_node == 0 {
            return Err(artifact("dofs per node must be positive"));
        }
        let num_nodes = back.len();
        let internal_equations = num_nodes * dofs_per_node;

        for (ext, int) in forward.iter().enumerate() {
            if let Some(int) = *int {
                if int >= num_nodes {
                    return Err(artifact(&format!(
                        "external node {} maps to internal node {} but only {} nodes exist",
                        ext + 1,
                        int + 1,
                        num_nodes
                    )));
                }
            }
        }
        for (int, &ext) in back.iter().enumerate() {
            if ext == 0 || ext > forward.len() {
                return Err(artifact(&format!(
                    "internal node {} maps back to out-of-range external node {}",
                    int + 1,
                    ext
                )));
            }
        }
        let mut seen = vec![false; internal_equations];
        for (s, &eq) in solver_to_internal.iter().enumerate() {
            if eq >= internal_equations {
                return Err(artifact(&format!(
                    "solver equation {} maps to internal equation {} beyond {}",
                    s + 1,
                    eq + 1,
                    internal_equations
                )));
            }
            if std::mem::replace(&mut seen[eq], true) {
                return Err(artifact(&format!(
                    "internal equation {} is targeted by more than one solver equation",
                    eq + 1
                )));
            }
        }

        Ok(Self {
            forward,
            back,
            solver_to_internal,
            dofs_per_node,
        })
    }

    /// Identity mapping: external node `i + 1` is internal node `i`, and the solver keeps
    /// every equation in internal order.
    pub fn identity(num_nodes: usize, dofs_per_node: usize) -> Self {
        Self {
            forward: (0..num_nodes).map(Some).collect(),
            back: (1..=num_nodes).collect(),
            solver_to_internal: (0..num_nodes * dofs_per_node).collect(),
            dofs_per_node: dofs_per_node.max(1),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.back.len()
    }

    /// Largest external node id.
    pub fn max_node(&self) -> usize {
        self.forward.len()
    }

    pub fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    pub fn internal_equations(&self) -> usize {
        self.back.len() * self.dofs_per_node
    }

    pub fn solver_equations(&self) -> usize {
        self.solver_to_internal.len()
    }

    pub fn forward(&self) -> &[Option<usize>] {
        &self.forward
    }

    pub fn back(&self) -> &[usize] {
        &self.back
    }

    pub fn solver_to_internal(&self) -> &[usize] {
        &self.solver_to_internal
    }

    /// Scatters a solver-ordered vector into internal ordering. Equations the solver
    /// does not carry (e.g. constrained dofs) are zero.
    pub fn to_internal_order(&self, x: MatRef<'_, c64>) -> Mat<c64> {
        let mut out = Mat::<c64>::zeros(self.internal_equations(), 1);
        for (s, &eq) in self.solver_to_internal.iter().enumerate() {
            out[(eq, 0)] = x[(s, 0)];
        }
        out
    }

    /// Re-expresses a solver-ordered vector in user numbering.
    ///
    /// Emits `dofs_per_node` records per mapped external node, in increasing external
    /// node order. External nodes without an internal counterpart are skipped.
    pub fn user_order(&self, x: MatRef<'_, c64>) -> Vec<SolutionRecord> {
        let internal = self.to_internal_order(x);
        let ndof = self.dofs_per_node;
        let mut records = Vec::with_capacity(internal.nrows());
        for (ext, int) in self.forward.iter().enumerate() {
            let Some(int) = *int else {
                continue;
            };
            for dof in 0..ndof {
                records.push(SolutionRecord {
                    node: ext + 1,
                    equation: ext * ndof + dof + 1,
                    value: internal[(int * ndof + dof, 0)],
                });
            }
        }
        records
    }
}

/// The full dynamic system `K - ω²M + iωC` with its excitation and numbering tables.
#[derive(Debug, Clone)]
pub struct AssembledSystem<M = SystemMatrix> {
    stiffness: M,
    mass: M,
    damping: M,
    load: Mat<c64>,
    dof_map: DofMap,
}

impl<M: LinearOperator> AssembledSystem<M> {
    /// Checks that all operators are square of the same order as `load`, and that the
    /// mapping covers exactly the solver equations.
    pub fn new(
        stiffness: M,
        mass: M,
        damping: M,
        load: Mat<c64>,
        dof_map: DofMap,
    ) -> Result<Self, KrylovError> {
        let n = stiffness.nrows();
        for (what, op) in [
            ("stiffness matrix columns", &stiffness),
            ("mass matrix", &mass),
            ("damping matrix", &damping),
        ] {
            if op.nrows() != n || op.ncols() != n {
                return Err(KrylovErrorKind::DimensionMismatch {
                    what,
                    expected: n,
                    actual: if op.nrows() != n { op.nrows() } else { op.ncols() },
                }
                .into());
            }
        }
        if load.nrows() != n || load.ncols() != 1 {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "reference load vector",
                expected: n,
                actual: load.nrows(),
            }
            .into());
        }
        if dof_map.solver_equations() != n {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "solver equation mapping",
                expected: n,
                actual: dof_map.solver_equations(),
            }
            .into());
        }
        Ok(Self {
            stiffness,
            mass,
            damping,
            load,
            dof_map,
        })
    }

    /// Number of solver degrees of freedom.
    pub fn ndof(&self) -> usize {
        self.stiffness.nrows()
    }

    pub fn stiffness(&self) -> &M {
        &self.stiffness
    }

    pub fn mass(&self) -> &M {
        &self.mass
    }

    pub fn damping(&self) -> &M {
        &self.damping
    }

    /// Reference load vector `F0` as an `n x 1` block.
    pub fn load(&self) -> MatRef<'_, c64> {
        self.load.as_ref()
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }
}

impl AssembledSystem<SystemMatrix> {
    /// A system with one dof per node and identity numbering.
    pub fn with_identity_map(
        stiffness: SystemMatrix,
        mass: SystemMatrix,
        damping: SystemMatrix,
        load: Mat<c64>,
    ) -> Result<Self, KrylovError> {
        let n = stiffness.nrows();
        Self::new(stiffness, mass, damping, load, DofMap::identity(n, 1))
    }
}

fn artifact(msg: &str) -> KrylovError {
    KrylovErrorKind::Artifact(msg.to_string()).into()
}
