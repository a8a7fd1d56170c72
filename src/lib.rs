//! A Markov-Chain Monte Carlo engine for the Falicov-Kimball model on
//! finite lattices: classical `f`-electron occupations coupled to a
//! tight-binding Hamiltonian for non-interacting `c`-electrons, sampled by
//! Metropolis moves whose weight comes from either exact diagonalization
//! or a Chebyshev-moment expansion of the log-partition function.

pub mod chebyshev;
pub mod config;
pub mod driver;
pub mod error;
pub mod lattice;
pub mod measurements;
pub mod moves;
pub mod observables;
pub mod stats;

pub use config::{ConfigParams, Configuration};
pub use driver::{McmcDriver, RunParameters, RunReport};
pub use error::{Error, Result};
pub use lattice::{HypercubicLattice, LatticeAdapter, TriangularLattice};
pub use observables::ObservableStore;
