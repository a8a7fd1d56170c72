//! The mutable simulation state: `f`-occupations, the assembled Hamiltonian
//! and its two lazily-populated spectral caches.

use crate::chebyshev::{self, ChebyshevEvaluator, DEGENERACY_TOLERANCE};
use crate::error::{Error, Result};
use crate::lattice::LatticeAdapter;
use nalgebra::SymmetricEigen;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The frozen-per-run parameters a [`Configuration`] is built against:
/// `{beta, U, mu_c, mu_f}` plus the optional classical f-f coupling.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ConfigParams {
    /// Inverse temperature.
    pub beta: f64,
    /// On-site `c`-`f` interaction strength.
    pub u: f64,
    /// Chemical potential of the `c`-electrons.
    pub mu_c: f64,
    /// Chemical potential of the `f`-electrons.
    pub mu_f: f64,
    /// Classical nearest-neighbor `f`-`f` coupling; `0.0` disables the term.
    pub j_ff: f64,
}

impl ConfigParams {
    pub(crate) fn matches(&self, other: &Self) -> bool {
        let tol = 1e-4;
        (self.beta - other.beta).abs() < tol
            && (self.u - other.u).abs() < tol
            && (self.mu_c - other.mu_c).abs() < tol
            && (self.mu_f - other.mu_f).abs() < tol
            && (self.j_ff - other.j_ff).abs() < tol
    }
}

/// Status and payload of the exact-diagonalization cache.
#[derive(Clone, Debug)]
pub enum EdCache {
    /// No diagonalization has been run since the last invalidation.
    Empty,
    /// The spectrum (and `logZ`) are cached, but not the eigenvectors.
    Spectrum {
        /// Eigenvalues of `H`, in nondecreasing order.
        spectrum: Vec<f64>,
        /// Stable-form `logZ` computed from `spectrum`.
        log_z: f64,
    },
    /// Spectrum, eigenvectors and `logZ` are all cached.
    Full {
        /// Eigenvalues of `H`, in nondecreasing order.
        spectrum: Vec<f64>,
        /// Eigenvectors of `H`, column `k` corresponding to `spectrum[k]`.
        evecs: nalgebra::DMatrix<f64>,
        /// Stable-form `logZ` computed from `spectrum`.
        log_z: f64,
    },
}

impl EdCache {
    /// The cached spectrum, if any diagonalization has run.
    #[must_use]
    pub fn spectrum(&self) -> Option<&[f64]> {
        match self {
            Self::Empty => None,
            Self::Spectrum { spectrum, .. } | Self::Full { spectrum, .. } => Some(spectrum),
        }
    }

    /// The cached `logZ`, if any diagonalization has run.
    #[must_use]
    pub fn log_z(&self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::Spectrum { log_z, .. } | Self::Full { log_z, .. } => Some(*log_z),
        }
    }

    /// The cached eigenvectors, if a full diagonalization has run.
    #[must_use]
    pub fn evecs(&self) -> Option<&nalgebra::DMatrix<f64>> {
        match self {
            Self::Full { evecs, .. } => Some(evecs),
            _ => None,
        }
    }

    fn satisfies(&self, need_evecs: bool) -> bool {
        match self {
            Self::Empty => false,
            Self::Spectrum { .. } => !need_evecs,
            Self::Full { .. } => true,
        }
    }
}

/// Status and payload of the Chebyshev-moment cache.
#[derive(Clone, Debug)]
pub enum ChebCache {
    /// No Chebyshev expansion has been run since the last invalidation.
    Empty,
    /// Rescale parameters, moments and the resulting `logZ` estimate.
    LogZ {
        /// Smallest eigenvalue estimate used for rescaling.
        e_min: f64,
        /// Largest eigenvalue estimate used for rescaling.
        e_max: f64,
        /// Rescale half-width, `(e_max - e_min) / 2`.
        a: f64,
        /// Rescale center, `(e_max + e_min) / 2`.
        b: f64,
        /// Moments `mu_n = tr(T_n(X))/V`.
        moments: Vec<f64>,
        /// Chebyshev estimate of `logZ`.
        log_z: f64,
    },
}

impl ChebCache {
    /// The cached `logZ`, if a Chebyshev expansion has run.
    #[must_use]
    pub fn log_z(&self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::LogZ { log_z, .. } => Some(*log_z),
        }
    }
}

/// The statistical weight of one classical `f`-occupation configuration: an
/// `f`-vector, the assembled Hamiltonian and its two lazily-reconstructed
/// spectral caches.
#[derive(Clone, Debug)]
pub struct Configuration<L: LatticeAdapter> {
    lattice: Arc<L>,
    f: Vec<u8>,
    params: ConfigParams,
    diag: Vec<f64>,
    ed_cache: EdCache,
    cheb_cache: ChebCache,
}

impl<L: LatticeAdapter> Configuration<L> {
    /// Builds a new configuration over `lattice` with every site empty.
    #[must_use]
    pub fn new(lattice: Arc<L>, params: ConfigParams) -> Self {
        let v = lattice.v();
        let mut config = Self {
            lattice,
            f: vec![0; v],
            params,
            diag: vec![-params.mu_c; v],
            ed_cache: EdCache::Empty,
            cheb_cache: ChebCache::Empty,
        };
        config.calc_hamiltonian();
        config
    }

    /// The current `f`-occupation vector.
    #[must_use]
    pub fn f(&self) -> &[u8] {
        &self.f
    }

    /// The frozen run parameters.
    #[must_use]
    pub const fn params(&self) -> &ConfigParams {
        &self.params
    }

    /// The exact-diagonalization cache.
    #[must_use]
    pub const fn ed_cache(&self) -> &EdCache {
        &self.ed_cache
    }

    /// The Chebyshev-moment cache.
    #[must_use]
    pub const fn cheb_cache(&self) -> &ChebCache {
        &self.cheb_cache
    }

    pub(crate) fn lattice(&self) -> &L {
        self.lattice.as_ref()
    }

    /// The directed bonds carrying hopping amplitude along `direction`,
    /// used by conductivity-style measurements. See
    /// [`LatticeAdapter::current_bonds`].
    #[must_use]
    pub fn current_bonds(&self, direction: usize) -> Vec<(usize, usize, f64)> {
        self.lattice().current_bonds(direction)
    }

    /// `Σ f_i`, the number of occupied `f`-sites.
    #[must_use]
    pub fn get_nf(&self) -> usize {
        self.f.iter().map(|&x| usize::from(x)).sum()
    }

    fn reset_caches(&mut self) {
        self.ed_cache = EdCache::Empty;
        self.cheb_cache = ChebCache::Empty;
    }

    /// Places `n` ones (or `Uniform{0..V}` ones if `n` is `None`) at
    /// distinct, uniformly chosen sites; resets both caches.
    pub fn randomize_f(&mut self, rng: &mut impl Rng, n: Option<usize>) {
        let v = self.f.len();
        let n = n.unwrap_or_else(|| rng.gen_range(0..=v));
        self.f.iter_mut().for_each(|x| *x = 0);
        let mut placed = 0;
        while placed < n {
            let idx = rng.gen_range(0..v);
            if self.f[idx] == 0 {
                self.f[idx] = 1;
                placed += 1;
            }
        }
        self.reset_caches();
    }

    /// Directly overwrites `f`; resets both caches. Used by moves that have
    /// already computed the trial occupation vector.
    pub fn set_f(&mut self, f: Vec<u8>) {
        debug_assert_eq!(f.len(), self.f.len());
        self.f = f;
        self.reset_caches();
    }

    /// Rebuilds `H = T + diag(U*f - mu_c)` from the current `f`; resets both
    /// caches.
    pub fn calc_hamiltonian(&mut self) {
        let u = self.params.u;
        let mu_c = self.params.mu_c;
        for (d, &fi) in self.diag.iter_mut().zip(self.f.iter()) {
            *d = u * f64::from(fi) - mu_c;
        }
        self.reset_caches();
    }

    /// Runs a symmetric dense eigendecomposition of `H` unless the cache
    /// already satisfies the request.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::EigensolverFailure`] if the resulting spectrum
    /// contains non-finite values.
    pub fn calc_ed(&mut self, need_evecs: bool) -> Result<()> {
        if self.ed_cache.satisfies(need_evecs) {
            return Ok(());
        }

        let dense = self.lattice().hopping_matrix().to_dense_with_diag(&self.diag);
        let eigen = SymmetricEigen::new(dense);

        let mut pairs: Vec<(f64, usize)> = eigen
            .eigenvalues
            .iter()
            .enumerate()
            .map(|(i, &e)| (e, i))
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("NaN eigenvalue"));

        let spectrum: Vec<f64> = pairs.iter().map(|&(e, _)| e).collect();
        if spectrum.iter().any(|e| !e.is_finite()) {
            return Err(Error::EigensolverFailure(
                "non-finite eigenvalue encountered".to_string(),
            ));
        }

        let log_z = stable_log_z(&spectrum, self.params.beta);

        self.ed_cache = if need_evecs {
            let v = spectrum.len();
            let mut evecs = nalgebra::DMatrix::<f64>::zeros(v, v);
            for (new_col, &(_, old_col)) in pairs.iter().enumerate() {
                evecs.set_column(new_col, &eigen.eigenvectors.column(old_col));
            }
            EdCache::Full {
                spectrum,
                evecs,
                log_z,
            }
        } else {
            EdCache::Spectrum { spectrum, log_z }
        };
        Ok(())
    }

    /// Populates the Chebyshev-moment cache from the current `H`, unless it
    /// is already populated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChebyshevDegenerate`] if the spectral rescale
    /// interval collapses below [`DEGENERACY_TOLERANCE`].
    pub fn calc_chebyshev(&mut self, cheb: &ChebyshevEvaluator, lanczos_seed: u64) -> Result<()> {
        if matches!(self.cheb_cache, ChebCache::LogZ { .. }) {
            return Ok(());
        }

        let hopping = self.lattice().hopping_matrix();
        let (e_min, e_max) = chebyshev::lanczos_extremal_eigenvalues(hopping, &self.diag, lanczos_seed)?;
        if e_max - e_min < DEGENERACY_TOLERANCE {
            return Err(Error::ChebyshevDegenerate(e_max - e_min));
        }

        let a = (e_max - e_min) / 2.0;
        let b = (e_max + e_min) / 2.0;
        let beta = self.params.beta;
        let v = self.f.len() as f64;
        let logz_f = move |w: f64| v * (1.0 + (-beta * (a * w + b)).exp()).ln();

        let moments = chebyshev::chebyshev_moments(hopping, &self.diag, a, b, cheb.n_cheb());
        let coeffs = cheb.coefficients(logz_f);

        let mut log_z = moments[0] * coeffs[0];
        for n in 1..cheb.n_cheb() {
            log_z += 2.0 * coeffs[n] * moments[n];
        }

        self.cheb_cache = ChebCache::LogZ {
            e_min,
            e_max,
            a,
            b,
            moments,
            log_z,
        };
        Ok(())
    }

    /// The classical `f`-`f` interaction energy: zero unless
    /// [`ConfigParams::j_ff`] is nonzero, in which case it is
    /// `J * sum_{<i,j>} (f_i - 1/2)(f_j - 1/2)` over nearest-neighbor edges.
    #[must_use]
    pub fn calc_ff_energy(&self) -> f64 {
        if self.params.j_ff == 0.0 {
            return 0.0;
        }
        let lattice = self.lattice();
        let mut sum = 0.0;
        for i in 0..self.f.len() {
            let fi = f64::from(self.f[i]) - 0.5;
            for &j in lattice.neighbors(i) {
                let fj = f64::from(self.f[j]) - 0.5;
                sum += fi * fj;
            }
        }
        // each undirected edge is counted from both endpoints
        self.params.j_ff * sum / 2.0
    }

    /// Reassigns `self` from `other`, requiring matching [`ConfigParams`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParamsMismatch`] if `other.params` does not match
    /// `self.params` within tolerance.
    pub fn assign(&mut self, other: &Self) -> Result<()> {
        if !self.params.matches(&other.params) {
            return Err(Error::ParamsMismatch(
                "cannot assign configuration with mismatched params".to_string(),
            ));
        }
        self.f = other.f.clone();
        self.diag = other.diag.clone();
        self.ed_cache = other.ed_cache.clone();
        self.cheb_cache = other.cheb_cache.clone();
        Ok(())
    }
}

/// The numerically stable `logZ` from a sorted spectrum: factors out
/// `exp(beta * min(spectrum))` before summing to avoid overflow for deep
/// states.
#[must_use]
pub fn stable_log_z(spectrum: &[f64], beta: f64) -> f64 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let e0 = spectrum[0];
    let logw0 = beta * e0;
    let w0 = logw0.exp();
    spectrum
        .iter()
        .map(|&e| (w0 + (-beta * (e - e0)).exp()).ln() - logw0)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::HypercubicLattice;

    fn params() -> ConfigParams {
        ConfigParams {
            beta: 2.0,
            u: 1.0,
            mu_c: 0.5,
            mu_f: 0.5,
            j_ff: 0.0,
        }
    }

    #[test]
    fn get_nf_counts_occupied_sites() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 0]);
        assert_eq!(config.get_nf(), 2);
    }

    #[test]
    fn calc_ed_matches_stable_log_z_formula() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 0]);
        config.calc_hamiltonian();
        config.calc_ed(false).unwrap();
        let spectrum = config.ed_cache().spectrum().unwrap().to_vec();
        let expected = stable_log_z(&spectrum, params().beta);
        assert!((config.ed_cache().log_z().unwrap() - expected).abs() < 1e-10);
        for w in spectrum.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn calc_ed_full_returns_orthonormal_eigenvectors() {
        let lattice = Arc::new(HypercubicLattice::<2>::new(3, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 0, 1, 0, 1, 0, 1]);
        config.calc_hamiltonian();
        config.calc_ed(true).unwrap();
        let evecs = config.ed_cache().evecs().unwrap();
        let gram = evecs.transpose() * evecs;
        for i in 0..gram.nrows() {
            for j in 0..gram.ncols() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[(i, j)] - expected).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn mutating_f_invalidates_caches() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.calc_hamiltonian();
        config.calc_ed(false).unwrap();
        assert!(config.ed_cache().spectrum().is_some());
        config.set_f(vec![1, 1, 0, 0]);
        assert!(config.ed_cache().spectrum().is_none());
    }

    #[test]
    fn assign_rejects_mismatched_params() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut a = Configuration::new(Arc::clone(&lattice), params());
        let mut other_params = params();
        other_params.u = 5.0;
        let b = Configuration::new(lattice, other_params);
        assert!(a.assign(&b).is_err());
        let _ = &mut a;
    }

    #[test]
    fn stable_log_z_matches_direct_sum_for_moderate_spectrum() {
        let spectrum = vec![-2.0, -1.0, 0.5, 3.0];
        let beta = 1.5;
        let direct: f64 = spectrum.iter().map(|&e| (1.0 + (-beta * e).exp()).ln()).sum();
        assert!((stable_log_z(&spectrum, beta) - direct).abs() < 1e-10);
    }
}
