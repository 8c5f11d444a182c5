//! The linear algebra engine behind the reduction stages.
//!
//! The Krylov stages never touch matrix storage directly. Everything they need
//! (linear combinations of system matrices, one factorization with many back-solves,
//! Hermitian inner products, `axpy` updates and vector norms) goes through the
//! [`LinearAlgebraBackend`] trait. [`FaerBackend`] implements it on top of `faer`, using
//! a sparse LU for sparse matrices and a partial-pivoting LU for dense ones.
//!
//! Vector-level and small dense operations (products with the basis, the projected
//! `m x m` solves) have default implementations in terms of `faer` dense kernels, since
//! every backend stores vectors as `n x 1` [`Mat<c64>`] blocks. A backend may override
//! any of them.

use crate::{
    error::{KrylovError, KrylovErrorKind},
    matrix::{LinearOperator, SystemMatrix},
};
use faer::{
    Mat, MatMut, MatRef, c64,
    linalg::solvers::PartialPivLu,
    prelude::Solve,
    sparse::{Triplet, linalg::solvers::Lu},
};
use std::fmt;

/// Vector norm used to measure residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorNorm {
    /// Sum of entry moduli.
    L1,
    /// Euclidean norm.
    L2,
    /// Largest entry modulus.
    Inf,
}

impl fmt::Display for VectorNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VectorNorm::L1 => "L-1",
            VectorNorm::L2 => "L-2",
            VectorNorm::Inf => "Inf",
        };
        f.write_str(name)
    }
}

/// A factorized matrix that can be reused for any number of back-solves.
pub trait Factorization {
    /// Solves `A X = rhs` for `X`.
    fn solve(&self, rhs: MatRef<'_, c64>) -> Mat<c64>;
}

/// Typed interface to the linear algebra engine.
pub trait LinearAlgebraBackend {
    /// Storage type of the system matrices.
    type Matrix: LinearOperator;
    /// Handle to a factorized matrix.
    type Factor: Factorization;

    /// Computes `sum_i coeff_i * M_i`. All terms must have the same order.
    fn combine(&self, terms: &[(c64, &Self::Matrix)]) -> Result<Self::Matrix, KrylovError>;

    /// Factorizes a square matrix once for repeated solves.
    fn factorize(&self, matrix: &Self::Matrix) -> Result<Self::Factor, KrylovError>;

    /// Factorizes a small dense matrix, such as a projected reduced system.
    fn factorize_dense(&self, matrix: MatRef<'_, c64>) -> Result<Self::Factor, KrylovError>;

    /// Frobenius norm of a matrix.
    fn matrix_norm(&self, matrix: &Self::Matrix) -> f64;

    /// Matrix times a block of vectors.
    fn matmul(&self, matrix: &Self::Matrix, rhs: MatRef<'_, c64>) -> Mat<c64> {
        matrix.apply(rhs)
    }

    /// Dense product `a b`.
    fn dense_matmul(&self, a: MatRef<'_, c64>, b: MatRef<'_, c64>) -> Mat<c64> {
        a * b
    }

    /// Dense product `a^H b`, i.e. the projection of `b` onto the columns of `a`.
    fn adjoint_matmul(&self, a: MatRef<'_, c64>, b: MatRef<'_, c64>) -> Mat<c64> {
        a.adjoint() * b
    }

    /// Hermitian inner product `x^H y` of two column vectors.
    fn dot(&self, x: MatRef<'_, c64>, y: MatRef<'_, c64>) -> c64 {
        self.adjoint_matmul(x, y)[(0, 0)]
    }

    /// In-place update `y <- beta * y + alpha * x`.
    fn axpy(&self, alpha: c64, x: MatRef<'_, c64>, beta: c64, mut y: MatMut<'_, c64>) {
        assert_eq!(
            (x.nrows(), x.ncols()),
            (y.nrows(), y.ncols()),
            "axpy operands must have the same shape"
        );
        for j in 0..x.ncols() {
            for i in 0..x.nrows() {
                y[(i, j)] = beta * y[(i, j)] + alpha * x[(i, j)];
            }
        }
    }

    /// Vector norm of the requested kind.
    fn norm(&self, x: MatRef<'_, c64>, kind: VectorNorm) -> f64 {
        match kind {
            VectorNorm::L1 => x.norm_l1(),
            VectorNorm::L2 => x.norm_l2(),
            VectorNorm::Inf => x.norm_max(),
        }
    }
}

/// Factorization produced by [`FaerBackend`].
pub enum FaerFactor {
    Dense(PartialPivLu<c64>),
    Sparse(Lu<usize, c64>),
}

impl Factorization for FaerFactor {
    fn solve(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        match self {
            FaerFactor::Dense(lu) => lu.solve(rhs),
            FaerFactor::Sparse(lu) => lu.solve(rhs),
        }
    }
}

/// In-process backend built on `faer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerBackend;

impl LinearAlgebraBackend for FaerBackend {
    type Matrix = SystemMatrix;
    type Factor = FaerFactor;

    fn combine(&self, terms: &[(c64, &SystemMatrix)]) -> Result<SystemMatrix, KrylovError> {
        let Some((_, first)) = terms.first() else {
            return Err(KrylovErrorKind::InvalidParameter(
                "a linear combination needs at least one term".to_string(),
            )
            .into());
        };
        let (n, m) = (first.nrows(), first.ncols());
        for (_, term) in terms {
            if term.nrows() != n || term.ncols() != m {
                return Err(KrylovErrorKind::DimensionMismatch {
                    what: "matrix combination term",
                    expected: n,
                    actual: if term.nrows() != n {
                        term.nrows()
                    } else {
                        term.ncols()
                    },
                }
                .into());
            }
        }

        // Dense only when every term is dense; any sparse term keeps the result sparse.
        let dense_terms: Option<Vec<(c64, &Mat<c64>)>> = terms
            .iter()
            .map(|(coeff, term)| match term {
                SystemMatrix::Dense(d) => Some((*coeff, d)),
                SystemMatrix::Sparse(_) => None,
            })
            .collect();

        if let Some(dense_terms) = dense_terms {
            let combined = Mat::from_fn(n, m, |i, j| {
                dense_terms
                    .iter()
                    .fold(c64::new(0.0, 0.0), |acc, (coeff, d)| acc + *coeff * d[(i, j)])
            });
            return Ok(SystemMatrix::Dense(combined));
        }

        let mut triplets: Vec<Triplet<usize, usize, c64>> = Vec::new();
        for (coeff, term) in terms {
            if *coeff == c64::new(0.0, 0.0) {
                continue;
            }
            triplets.extend(term.triplets().into_iter().map(|t| Triplet {
                row: t.row,
                col: t.col,
                val: *coeff * t.val,
            }));
        }
        assemble_sparse(n, m, &triplets)
    }

    fn factorize(&self, matrix: &SystemMatrix) -> Result<FaerFactor, KrylovError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "factorized matrix columns",
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            }
            .into());
        }
        match matrix {
            SystemMatrix::Dense(d) => self.factorize_dense(d.as_ref()),
            SystemMatrix::Sparse(s) => s
                .as_ref()
                .sp_lu()
                .map(FaerFactor::Sparse)
                .map_err(|e| KrylovErrorKind::Factorization(format!("{e:?}")).into()),
        }
    }

    fn factorize_dense(&self, matrix: MatRef<'_, c64>) -> Result<FaerFactor, KrylovError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "factorized matrix columns",
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            }
            .into());
        }
        Ok(FaerFactor::Dense(matrix.partial_piv_lu()))
    }

    fn matrix_norm(&self, matrix: &SystemMatrix) -> f64 {
        matrix.norm_fro()
    }
}

/// Builds an `nrows x ncols` sparse matrix, summing duplicate entries.
fn assemble_sparse(
    nrows: usize,
    ncols: usize,
    triplets: &[Triplet<usize, usize, c64>],
) -> Result<SystemMatrix, KrylovError> {
    SystemMatrix::sparse_from_triplets(nrows, ncols, triplets).ok_or_else(|| {
        KrylovErrorKind::Assembly(format!(
            "{} entries do not fit a {}x{} sparse matrix",
            triplets.len(),
            nrows,
            ncols
        ))
        .into()
    })
}

/// Returns an error if a solve produced non-finite entries, which is how a singular
/// dense LU manifests.
pub(crate) fn ensure_finite(x: MatRef<'_, c64>, context: &str) -> Result<(), KrylovError> {
    let finite = x.norm_l2().is_finite();
    if finite {
        Ok(())
    } else {
        Err(KrylovErrorKind::Factorization(format!("{context}: matrix is singular")).into())
    }
}
