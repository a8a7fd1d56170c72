//! Crate-wide error type.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration or a reloaded observable store does not match the
    /// parameters of the run it is being compared against.
    #[error("parameter mismatch: {0}")]
    ParamsMismatch(String),
    /// The dense eigensolver failed to converge on a Hamiltonian.
    #[error("eigensolver failed to converge: {0}")]
    EigensolverFailure(String),
    /// The Chebyshev rescale interval `[e_min, e_max]` collapsed below the
    /// degeneracy tolerance.
    #[error("chebyshev rescale interval is degenerate: e_max - e_min = {0:e}")]
    ChebyshevDegenerate(f64),
    /// A persistence operation (save or load) failed.
    #[error("I/O failure: {0}")]
    IoFailure(String),
    /// A requested configuration is not representable, e.g. `N_f` outside
    /// `[0, V]`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::IoFailure(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoFailure(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
