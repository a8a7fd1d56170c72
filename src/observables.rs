//! Process-wide observable collector and its persistence contract.
//!
//! Field groupings follow a `/parameters`, `/mc_data/`, `/stats/`,
//! `/binning/` layout; the on-disk *format* is explicitly out of scope, so
//! persistence here uses `bincode` rather than committing to HDF5.

use crate::config::ConfigParams;
use crate::error::{Error, Result};
use crate::stats::BinLevel;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// One `bin_tuple` summary plus its full binning-level breakdown, matching
/// the `/stats/` + `/binning/` pairing.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StatSummary {
    /// Mean at the chosen plateau bin level.
    pub mean: f64,
    /// Squared error at the chosen plateau bin level.
    pub squared_error: f64,
    /// Which bin level was chosen.
    pub bin_level: usize,
    /// Every binning level computed for this statistic, `(size, mean,
    /// variance, squared_error)` per level.
    pub levels: Vec<(usize, f64, f64, f64)>,
}

impl StatSummary {
    /// Wraps a single jackknifed `(mean, squared_error)` pair that has no
    /// binning hierarchy behind it (jackknifed estimators don't go through
    /// [`crate::stats::accumulate_binning`]).
    #[must_use]
    pub(crate) fn scalar(mean: f64, squared_error: f64) -> Self {
        Self {
            mean,
            squared_error,
            bin_level: 0,
            levels: vec![(0, mean, squared_error, squared_error)],
        }
    }
}

impl From<&[BinLevel]> for StatSummary {
    fn from(levels: &[BinLevel]) -> Self {
        let bin_level = crate::stats::estimate_bin(levels);
        let chosen = levels.get(bin_level).copied().unwrap_or(BinLevel {
            size: 0,
            mean: 0.0,
            variance: 0.0,
            squared_error: 0.0,
        });
        Self {
            mean: chosen.mean,
            squared_error: chosen.squared_error,
            bin_level,
            levels: levels.iter().map(|l| (l.size, l.mean, l.variance, l.squared_error)).collect(),
        }
    }
}

/// The derived `/stats/` summaries.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Stats {
    /// Mean energy.
    pub energy: StatSummary,
    /// Specific heat.
    pub cv: StatSummary,
    /// `q=0` susceptibility.
    pub fsusc_0: StatSummary,
    /// `q=pi` susceptibility.
    pub fsusc_pi: StatSummary,
    /// `q=0` Binder cumulant.
    pub binder_0: StatSummary,
    /// `q=pi` Binder cumulant.
    pub binder_pi: StatSummary,
    /// Local-DOS error estimate.
    pub dos_err: StatSummary,
    /// IPR error estimate.
    pub ipr_err: StatSummary,
    /// DC conductivity.
    pub cond0: StatSummary,
    /// Conductivity error estimate.
    pub cond_err: StatSummary,
    /// Dynamic (non-DC) part of the conductivity.
    pub cond_dynamic: StatSummary,
    /// `f`-`f` correlator.
    pub fcorrel: StatSummary,
}

/// A process-wide record of every observable accumulated over one run,
/// grouped for persistence.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ObservableStore {
    /// The frozen run parameters this store was collected under.
    pub params: ConfigParams,
    /// Per-sample total energy.
    pub energies: Vec<f64>,
    /// Per-sample specific-heat fluctuation term.
    pub d2energies: Vec<f64>,
    /// Per-sample classical `f`-`f` energy.
    pub c_energies: Vec<f64>,
    /// Per-sample `N_f` (occupation count).
    pub nf0: Vec<f64>,
    /// Per-sample staggered occupation `N_pi`.
    pub nfpi: Vec<f64>,
    /// The most recent sample's spectrum.
    pub spectrum: Vec<f64>,
    /// Full per-sample spectra, present only if `measure_history`.
    pub spectrum_history: Vec<Vec<f64>>,
    /// Full per-sample `f`-occupation vectors, present only if
    /// `measure_history`.
    pub focc_history: Vec<Vec<f64>>,
    /// Per-sample IPR vectors, present only if `measure_ipr`.
    pub ipr_history: Vec<Vec<f64>>,
    /// Per-sample frequency-resolved conductivity, present only if
    /// `measure_stiffness`.
    pub cond_history: Vec<Vec<f64>>,
    /// Per-sample full eigenvector matrices, flattened row-major, present
    /// only if `measure_eigenfunctions && save_eigenfunctions`.
    pub eig_history: Vec<Vec<f64>>,
    /// Per-sample integrated stiffness scalar.
    pub stiffness: Vec<f64>,
    /// Derived statistics, populated by [`ObservableStore::finalize`].
    pub stats: Stats,
}

impl ObservableStore {
    /// An empty collector over default (zeroed) parameters; the driver
    /// overwrites `params` once its run starts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `self` to `path` via `bincode`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IoFailure`] on I/O or serialization failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Deserializes a store from `path` and checks it against `expected`'s
    /// run parameters within tolerance before accepting the reload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParamsMismatch`] if the reloaded parameters do not
    /// match `expected` within tolerance, or [`Error::IoFailure`] on I/O or
    /// deserialization failure.
    pub fn load(path: impl AsRef<Path>, expected: &ConfigParams) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let store: Self = bincode::deserialize(&bytes)?;

        if !store.params.matches(expected) {
            return Err(Error::ParamsMismatch(
                "reloaded observable store parameters do not match the requested run".to_string(),
            ));
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

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
    fn save_then_load_round_trips_mc_data_bit_identically() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("fk_mc_observables_test_{}.bin", std::process::id()));

        let mut store = ObservableStore::new();
        store.params = params();
        store.energies = vec![1.0, 2.0, 3.5, -1.25];
        store.nf0 = vec![2.0, 3.0, 2.0, 4.0];

        store.save(&path).unwrap();
        let loaded = ObservableStore::load(&path, &params()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.energies, store.energies);
        assert_eq!(loaded.nf0, store.nf0);
        assert!(approx_eq!(f64, loaded.energies[2], 3.5, ulps = 2));
    }

    #[test]
    fn load_rejects_mismatched_parameters() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("fk_mc_observables_test_mismatch_{}.bin", std::process::id()));

        let mut store = ObservableStore::new();
        store.params = params();
        store.save(&path).unwrap();

        let mut other = params();
        other.u += 1e-2;
        let result = ObservableStore::load(&path, &other);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(Error::ParamsMismatch(_))));
    }

    #[test]
    fn stat_summary_from_levels_picks_plateau_bin() {
        let data = vec![1.0; 32];
        let levels = crate::stats::accumulate_binning(&data);
        let summary = StatSummary::from(levels.as_slice());
        assert!((summary.mean - 1.0).abs() < 1e-12);
    }
}
