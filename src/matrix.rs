//! Owned system matrices and the operator abstraction used by the reduction stages.
//!
//! The stiffness, mass and damping matrices of a structural model are usually sparse,
//! but small test problems and reduced systems are more naturally dense. The
//! [`SystemMatrix`] value type covers both storage schemes behind one interface, and
//! the [`LinearOperator`] trait captures the only thing the Krylov stages need from an
//! operator: its dimensions and its action on a block of column vectors.
//!
//! All entries are complex (`faer::c64`). Real-valued input is promoted on load, which
//! keeps the dynamic stiffness `K - ω²M + iωC` in the same scalar type as its terms.

use faer::{
    Mat, MatRef, Par, c64,
    dyn_stack::{MemBuffer, MemStack},
    matrix_free::LinOp,
    sparse::{SparseColMat, Triplet},
};

/// Represents a linear operator that can be applied to a block of vectors.
///
/// Vectors are `n x 1` matrices throughout the crate, so `apply` is a matrix-matrix
/// product in general and a matrix-vector product in the common case.
pub trait LinearOperator {
    /// Returns the number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Computes `A * rhs` into a freshly allocated matrix.
    ///
    /// # Panics
    ///
    /// Panics if the inner dimensions do not agree.
    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64>;
}

impl LinearOperator for MatRef<'_, c64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        *self * rhs
    }
}

impl LinearOperator for Mat<c64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        LinearOperator::apply(&self.as_ref(), rhs)
    }
}

impl LinearOperator for SparseColMat<usize, c64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        assert_eq!(
            self.as_ref().ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.as_ref().ncols(),
            rhs.nrows(),
        );
        let op = self.as_ref();
        let mut out = Mat::<c64>::zeros(op.nrows(), rhs.ncols());
        let mut mem = MemBuffer::new(op.apply_scratch(rhs.ncols(), Par::Seq));
        let stack = MemStack::new(&mut mem);
        LinOp::apply(&op, out.as_mut(), rhs, Par::Seq, stack);
        out
    }
}

/// A square system matrix owned by the caller of the reduction pipeline.
#[derive(Debug, Clone)]
pub enum SystemMatrix {
    Dense(Mat<c64>),
    Sparse(SparseColMat<usize, c64>),
}

impl SystemMatrix {
    /// Builds a sparse matrix from complex triplets. Duplicate entries are summed.
    pub fn sparse_from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[Triplet<usize, usize, c64>],
    ) -> Option<Self> {
        SparseColMat::try_new_from_triplets(nrows, ncols, triplets)
            .ok()
            .map(SystemMatrix::Sparse)
    }

    /// Builds a dense matrix from real entries.
    pub fn dense_from_real(nrows: usize, ncols: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        SystemMatrix::Dense(Mat::from_fn(nrows, ncols, |i, j| c64::new(f(i, j), 0.0)))
    }

    /// An all-zero sparse matrix of order `n`, e.g. the damping of an undamped model.
    pub fn zeros(n: usize) -> Self {
        // An empty triplet list cannot fail to assemble.
        match SparseColMat::try_new_from_triplets(n, n, &[]) {
            Ok(m) => SystemMatrix::Sparse(m),
            Err(_) => SystemMatrix::Dense(Mat::zeros(n, n)),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, SystemMatrix::Sparse(_))
    }

    /// Frobenius norm.
    pub fn norm_fro(&self) -> f64 {
        match self {
            SystemMatrix::Dense(m) => m.norm_l2(),
            SystemMatrix::Sparse(m) => m
                .triplet_iter()
                .map(|t| t.val.norm_sqr())
                .sum::<f64>()
                .sqrt(),
        }
    }

    /// Structurally stored entries as `(row, col, value)` triplets.
    ///
    /// Dense matrices report only their nonzero entries.
    pub fn triplets(&self) -> Vec<Triplet<usize, usize, c64>> {
        match self {
            SystemMatrix::Dense(m) => {
                let mut out = Vec::new();
                for j in 0..m.ncols() {
                    for i in 0..m.nrows() {
                        let val = m[(i, j)];
                        if val != c64::new(0.0, 0.0) {
                            out.push(Triplet { row: i, col: j, val });
                        }
                    }
                }
                out
            }
            SystemMatrix::Sparse(m) => m
                .triplet_iter()
                .map(|t| Triplet {
                    row: t.row,
                    col: t.col,
                    val: *t.val,
                })
                .collect(),
        }
    }
}

impl LinearOperator for SystemMatrix {
    #[inline]
    fn nrows(&self) -> usize {
        match self {
            SystemMatrix::Dense(m) => LinearOperator::nrows(m),
            SystemMatrix::Sparse(m) => LinearOperator::nrows(m),
        }
    }

    #[inline]
    fn ncols(&self) -> usize {
        match self {
            SystemMatrix::Dense(m) => LinearOperator::ncols(m),
            SystemMatrix::Sparse(m) => LinearOperator::ncols(m),
        }
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        match self {
            SystemMatrix::Dense(m) => LinearOperator::apply(m, rhs),
            SystemMatrix::Sparse(m) => LinearOperator::apply(m, rhs),
        }
    }
}
