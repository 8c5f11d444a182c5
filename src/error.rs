//! This module defines the custom error types for the library.
//!
//! All failure conditions of the Krylov reduction pipeline are gathered into a single
//! enum, [`KrylovErrorKind`], wrapped by the opaque [`KrylovError`]. Callers that need
//! to react to a specific condition (e.g. regenerate a missing artifact) match on
//! [`KrylovError::kind`].
//!
//! Subspace saturation is deliberately absent: running out of independent directions
//! before `max_dim` is a normal outcome reported by
//! [`crate::algorithms::subspace::KrylovBasis::is_saturated`].
use std::path::PathBuf;
use thiserror::Error;

/// Represents all possible errors that can occur during a Krylov reduction run.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct KrylovError(#[from] KrylovErrorKind);

impl KrylovError {
    /// Returns the condition that caused this error.
    pub fn kind(&self) -> &KrylovErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum KrylovErrorKind {
    /// An argument was outside its domain. Raised before any factorization or solve.
    #[error("Invalid input parameter: {0}")]
    InvalidParameter(String),

    /// A stage was invoked before the stage it depends on completed.
    #[error("Sequence violation: `{requires}` must run before `{operation}`.")]
    Sequence {
        operation: &'static str,
        requires: &'static str,
    },

    /// The assembly artifact does not exist.
    #[error("Assembly artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    /// The assembly artifact exists but is unreadable, malformed or inconsistent.
    #[error("Invalid assembly artifact: {0}")]
    Artifact(String),

    /// Two objects that must agree in size do not.
    #[error("Dimension mismatch for {what}: expected {expected}, found {actual}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A matrix could not be assembled from its entries.
    #[error("Matrix assembly failed: {0}")]
    Assembly(String),

    /// The linear algebra backend could not factorize a matrix.
    #[error("Factorization failed: {0}")]
    Factorization(String),
}

impl PartialEq for KrylovError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
