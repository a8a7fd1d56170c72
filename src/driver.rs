//! The in-process MCMC driver: owns the RNG, schedules warmup and
//! measurement cycles, dispatches proposals by registered weight, and
//! drives the end-of-run collect phase.

use crate::chebyshev::ChebyshevEvaluator;
use crate::config::{ConfigParams, Configuration};
use crate::error::{Error, Result};
use crate::lattice::LatticeAdapter;
use crate::measurements;
use crate::moves::{AddRemoveMove, FlipMove, Move, MoveKind, MoveWeight, ReshuffleMove};
use crate::observables::{ObservableStore, StatSummary};
use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::time::{Duration, Instant};

/// A move's registration weight; weights `<= EPSILON` disable the move
/// entirely.
const WEIGHT_EPSILON: f64 = 1e-12;

/// Every external parameter a run needs, held in one `serde`-derived
/// struct so callers can construct a run directly or deserialize it.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct RunParameters {
    /// Nearest-neighbor hopping amplitude.
    pub t: f64,
    /// Lattice extent per dimension.
    pub l: usize,
    /// On-site `c`-`f` interaction strength.
    pub u: f64,
    /// Inverse temperature.
    pub beta: f64,
    /// Chemical potential of the `c`-electrons.
    pub mu_c: f64,
    /// Chemical potential of the `f`-electrons.
    pub mu_f: f64,
    /// Classical nearest-neighbor `f`-`f` coupling (`0.0` disables it).
    pub j_ff: f64,
    /// Initial number of occupied `f`-sites; `None` samples uniformly.
    pub nf_start: Option<usize>,
    /// Number of measurement cycles.
    pub n_cycles: u64,
    /// Proposals attempted per cycle.
    pub length_cycle: u64,
    /// Warmup cycles before measurements begin.
    pub n_warmup_cycles: u64,
    /// Base RNG seed; the effective seed is `random_seed + rank`.
    pub random_seed: u64,
    /// Rank of this process, added to `random_seed`.
    pub rank: u64,
    /// Wall-clock budget in seconds; `0.0` disables the limit.
    pub max_time: f64,
    /// Flip move registration weight.
    pub mc_flip: f64,
    /// Add/remove move registration weight.
    pub mc_add_remove: f64,
    /// Reshuffle move registration weight.
    pub mc_reshuffle: f64,
    /// Use the Chebyshev-backed move variants instead of ED.
    pub cheb_moves: bool,
    /// Prefactor for `N_cheb = ceil(prefactor * ln(V))`.
    pub cheb_prefactor: f64,
    /// Record full per-sample histories (spectrum, focc) in addition to
    /// running sums.
    pub measure_history: bool,
    /// Measure conductivity/stiffness.
    pub measure_stiffness: bool,
    /// Measure the inverse participation ratio.
    pub measure_ipr: bool,
    /// Measure full eigenfunctions (expensive).
    pub measure_eigenfunctions: bool,
    /// Persist eigenfunction samples to the observable store.
    pub save_eigenfunctions: bool,
    /// Frequency offset for the conductivity grid.
    pub cond_offset: f64,
    /// Number of conductivity grid points on each side of zero.
    pub cond_npoints: usize,
    /// Number of points on the local-DOS frequency grid.
    pub dos_npts: usize,
    /// Lorentzian broadening width for DOS/conductivity estimators.
    pub dos_width: f64,
    /// Frequency offset for the DOS grid.
    pub dos_offset: f64,
}

impl RunParameters {
    fn config_params(&self) -> ConfigParams {
        ConfigParams {
            beta: self.beta,
            u: self.u,
            mu_c: self.mu_c,
            mu_f: self.mu_f,
            j_ff: self.j_ff,
        }
    }
}

/// Summary returned at the end of a run, standing in for the stdout
/// diagnostics the original C++ prints via its `INFO`/`ERROR` macros.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Number of measurement cycles actually completed.
    pub cycles_completed: u64,
    /// Whether the run stopped due to the wall-clock budget rather than
    /// reaching `n_cycles`.
    pub stopped_on_wall_clock: bool,
}

/// Owns the RNG, the current configuration, the registered moves and the
/// observable store for one Markov chain.
pub struct McmcDriver<L: LatticeAdapter> {
    rng: Pcg64,
    config: Configuration<L>,
    params: RunParameters,
    move_kinds: Vec<MoveKind<L>>,
    weights: Vec<f64>,
    store: ObservableStore,
}

impl<L: LatticeAdapter> McmcDriver<L> {
    /// Builds a driver over `lattice`, seeding its RNG from
    /// `random_seed + rank` and placing `nf_start` (or a uniform count if
    /// `None`) occupied sites.
    #[must_use]
    pub fn new(lattice: std::sync::Arc<L>, params: RunParameters) -> Self {
        let mut rng = Pcg64::seed_from_u64(params.random_seed.wrapping_add(params.rank));
        let mut config = Configuration::new(lattice, params.config_params());
        config.randomize_f(&mut rng, params.nf_start);
        config.calc_hamiltonian();

        let v = config.f().len();
        let cheb = ChebyshevEvaluator::for_volume(v, params.cheb_prefactor);

        let (flip, add_remove, reshuffle): (MoveKind<L>, MoveKind<L>, MoveKind<L>) = if params.cheb_moves {
            (
                FlipMove::chebyshev(cheb.clone(), params.random_seed).into(),
                AddRemoveMove::chebyshev(cheb.clone(), params.random_seed).into(),
                ReshuffleMove::chebyshev(cheb, params.random_seed).into(),
            )
        } else {
            (
                FlipMove::ed().into(),
                AddRemoveMove::ed().into(),
                ReshuffleMove::ed().into(),
            )
        };

        let move_kinds = vec![flip, add_remove, reshuffle];
        let weights = vec![params.mc_flip, params.mc_add_remove, params.mc_reshuffle];

        Self {
            rng,
            config,
            params,
            move_kinds,
            weights,
            store: ObservableStore::new(),
        }
    }

    fn enabled_indices(&self) -> Vec<usize> {
        (0..self.weights.len()).filter(|&i| self.weights[i] > WEIGHT_EPSILON).collect()
    }

    fn run_cycle(&mut self) -> Result<()> {
        let enabled = self.enabled_indices();
        if enabled.is_empty() {
            return Ok(());
        }
        let enabled_weights: Vec<f64> = enabled.iter().map(|&i| self.weights[i]).collect();
        let dist = WeightedIndex::new(&enabled_weights).map_err(|e| Error::InvalidConfig(e.to_string()))?;

        for _ in 0..self.params.length_cycle {
            let choice = enabled[dist.sample(&mut self.rng)];
            let weight = self.move_kinds[choice].attempt(&mut self.config, &mut self.rng)?;
            match weight {
                MoveWeight::Zero => self.move_kinds[choice].reject(),
                MoveWeight::Ratio(ratio) => {
                    let accept = ratio >= 1.0 || rand::Rng::gen_range(&mut self.rng, 0.0..1.0) < ratio;
                    if accept {
                        self.move_kinds[choice].accept(&mut self.config)?;
                    } else {
                        self.move_kinds[choice].reject();
                    }
                }
            }
        }
        Ok(())
    }

    fn measure(&mut self) -> Result<()> {
        self.config.calc_ed(
            self.params.measure_ipr || self.params.measure_eigenfunctions || self.params.measure_stiffness,
        )?;
        let energy = measurements::measure_energy(&self.config)?;
        let d2energy = measurements::measure_d2energy(&self.config)?;
        let spectrum = measurements::measure_spectrum(&self.config)?;
        let focc = measurements::measure_focc(&self.config);

        self.store.energies.push(energy);
        self.store.d2energies.push(d2energy);
        self.store.c_energies.push(self.config.calc_ff_energy());
        self.store.nf0.push(self.config.get_nf() as f64);
        self.store.nfpi.push(self.config.lattice().fft_pi(&focc));

        if self.params.measure_history {
            self.store.spectrum_history.push(spectrum.clone());
            self.store.focc_history.push(focc);
        }
        self.store.spectrum = spectrum;

        if self.params.measure_ipr {
            let v = self.config.f().len();
            let ipr: Vec<f64> = (0..v)
                .map(|k| measurements::measure_ipr(&self.config, k))
                .collect::<Result<_>>()?;
            self.store.ipr_history.push(ipr);
        }

        if self.params.measure_eigenfunctions && self.params.save_eigenfunctions {
            self.store.eig_history.push(measurements::measure_eigenfunctions(&self.config)?);
        }

        if self.params.measure_stiffness {
            // `2*cond_npoints + 1` samples symmetric around zero, broadening
            // widening with distance from the center point.
            let n = self.params.cond_npoints;
            let mut sigma_omega = Vec::with_capacity(2 * n + 1);
            for idx in -(n as isize)..=(n as isize) {
                let eta = self.params.cond_offset * (1.0 + idx.unsigned_abs() as f64);
                sigma_omega.push(measurements::measure_conductivity(&self.config, 0, eta)?);
            }
            self.store.cond_history.push(sigma_omega);
            self.store.stiffness.push(measurements::measure_stiffness(&self.config, 0, self.params.cond_offset)?);
        }

        Ok(())
    }

    /// Runs warmup cycles (unmeasured) followed by measurement cycles until
    /// either `n_cycles` completes or the wall-clock budget (if nonzero)
    /// expires, then performs the end-of-run collect.
    ///
    /// # Errors
    ///
    /// Propagates any [`Error`] raised by move attempts or measurements;
    /// these are not retried.
    pub fn run(&mut self) -> Result<RunReport> {
        let start = Instant::now();
        let budget = if self.params.max_time > 0.0 {
            Some(Duration::from_secs_f64(self.params.max_time))
        } else {
            None
        };

        for _ in 0..self.params.n_warmup_cycles {
            self.run_cycle()?;
        }

        let mut cycles_completed = 0;
        let mut stopped_on_wall_clock = false;
        for _ in 0..self.params.n_cycles {
            if let Some(limit) = budget {
                if start.elapsed() >= limit {
                    stopped_on_wall_clock = true;
                    break;
                }
            }
            self.run_cycle()?;
            self.measure()?;
            cycles_completed += 1;
        }

        self.store.params = self.params.config_params();
        self.finalize();
        Ok(RunReport {
            cycles_completed,
            stopped_on_wall_clock,
        })
    }

    /// Populates `store.stats` from the accumulated `mc_data` streams (spec
    /// §6's `/stats/` group), skipping estimators whose backing stream is
    /// empty or too short to bin.
    fn finalize(&mut self) {
        if self.store.energies.len() < 4 {
            return;
        }
        let n_blocks = 16.min(self.store.energies.len() / 2).max(2);
        let beta = self.params.beta;
        let v = self.config.f().len();

        self.store.stats.energy = StatSummary::from(crate::stats::accumulate_binning(&self.store.energies).as_slice());

        let (cv, cv_err) = crate::stats::specific_heat(&self.store.energies, &self.store.d2energies, beta, v, n_blocks);
        self.store.stats.cv = StatSummary::scalar(cv, cv_err);

        let (chi0, chi0_err) = crate::stats::susceptibility(&self.store.nf0, n_blocks);
        self.store.stats.fsusc_0 = StatSummary::scalar(chi0, chi0_err);

        let (chipi, chipi_err) = crate::stats::susceptibility(&self.store.nfpi, n_blocks);
        self.store.stats.fsusc_pi = StatSummary::scalar(chipi, chipi_err);

        let (b0, b0_err) = crate::stats::binder_cumulant(&self.store.nf0, n_blocks);
        self.store.stats.binder_0 = StatSummary::scalar(b0, b0_err);

        let (bpi, bpi_err) = crate::stats::binder_cumulant(&self.store.nfpi, n_blocks);
        self.store.stats.binder_pi = StatSummary::scalar(bpi, bpi_err);

        if !self.store.focc_history.is_empty() {
            self.finalize_ff_correlator();
        }
        if !self.store.cond_history.is_empty() && self.params.cond_npoints >= 1 {
            self.finalize_conductivity();
        }
        if !self.store.spectrum_history.is_empty() {
            // average rho(omega) over `dos_npts` grid points spaced by
            // `dos_width` around `dos_offset`, then bin that per-sample mean.
            let npts = self.params.dos_npts.max(1);
            let dos: Vec<f64> = self
                .store
                .spectrum_history
                .iter()
                .map(|s| {
                    (0..npts)
                        .map(|n| {
                            let omega = self.params.dos_offset + (n as f64) * self.params.dos_width;
                            crate::stats::local_dos(s, omega, self.params.dos_width)
                        })
                        .sum::<f64>()
                        / npts as f64
                })
                .collect();
            self.store.stats.dos_err = StatSummary::from(crate::stats::accumulate_binning(&dos).as_slice());
        }
        if !self.store.ipr_history.is_empty() {
            self.finalize_ipr_moment();
        }
    }

    fn finalize_ff_correlator(&mut self) {
        let lattice = self.config.lattice();
        let v = self.store.focc_history[0].len();
        let n_samples = self.store.focc_history.len();
        let mut by_site = vec![vec![0.0; n_samples]; v];
        for (t, sample) in self.store.focc_history.iter().enumerate() {
            for (i, &value) in sample.iter().enumerate() {
                by_site[i][t] = value;
            }
        }
        let means: Vec<f64> = by_site.iter().map(|s| s.iter().sum::<f64>() / n_samples as f64).collect();
        let shift = |i: usize, d: usize, off: isize| -> usize {
            let mut pos = lattice.index_to_pos(i);
            let size = lattice.dims()[d] as isize;
            pos[d] = (pos[d] as isize + off).rem_euclid(size) as usize;
            lattice.pos_to_index(&pos)
        };
        let c = crate::stats::ff_correlator(&by_site, &means, lattice.d(), 1, shift);
        self.store.stats.fcorrel = StatSummary::scalar(c, 0.0);
    }

    fn finalize_conductivity(&mut self) {
        let center = self.params.cond_npoints;
        let domega = self.params.cond_offset;
        let dc: Vec<f64> = self
            .store
            .cond_history
            .iter()
            .map(|row| crate::stats::dc_conductivity(row[center + 1], row[center - 1], domega))
            .collect();
        let dc_levels = crate::stats::accumulate_binning(&dc);
        self.store.stats.cond0 = StatSummary::from(dc_levels.as_slice());
        self.store.stats.cond_err = StatSummary::from(dc_levels.as_slice());

        let dynamic: Vec<f64> = self
            .store
            .cond_history
            .iter()
            .zip(dc.iter())
            .map(|(row, &sigma_dc)| crate::stats::dynamic_conductivity(row[center], sigma_dc))
            .collect();
        self.store.stats.cond_dynamic = StatSummary::from(crate::stats::accumulate_binning(&dynamic).as_slice());
    }

    /// Populates `stats.ipr_err` from the spec §4.7 IPR-moment estimator
    /// `M^(1)(omega)`, evaluated per sample at `omega = dos_offset` with
    /// broadening `dos_width` against that sample's own spectrum. Falls back
    /// to the plain per-sample mean IPR when `spectrum_history` was not
    /// recorded (i.e. `measure_history` is off), since the moment estimator
    /// needs a spectrum aligned with each `ipr_history` row.
    fn finalize_ipr_moment(&mut self) {
        let per_sample_mean: Vec<f64> = self
            .store
            .ipr_history
            .iter()
            .map(|row| row.iter().sum::<f64>() / row.len() as f64)
            .collect();
        let mean_ipr = per_sample_mean.iter().sum::<f64>() / per_sample_mean.len() as f64;

        let series = if self.store.spectrum_history.len() == self.store.ipr_history.len() {
            self.store
                .spectrum_history
                .iter()
                .zip(self.store.ipr_history.iter())
                .map(|(spectrum, ipr)| {
                    crate::stats::ipr_moment(spectrum, ipr, mean_ipr, self.params.dos_offset, self.params.dos_width, 1)
                })
                .collect()
        } else {
            per_sample_mean
        };
        self.store.stats.ipr_err = StatSummary::from(crate::stats::accumulate_binning(&series).as_slice());
    }

    /// The process-wide observable collector accumulated so far.
    #[must_use]
    pub const fn store(&self) -> &ObservableStore {
        &self.store
    }
}
