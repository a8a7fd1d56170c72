//! Binning analysis and delete-one-block jackknife resampling for
//! correlated Monte Carlo time series.
//!
//! Grounded on `original_source/prog/data_save.hxx`'s
//! `binning::accumulate_binning` / `estimate_bin` calls and the
//! `(size, mean, variance, squared_error)` tuple layout those functions
//! pass around; parallelized across independent estimators with `rayon`
//! the way the teacher parallelizes independent PDF-set computations in
//! `pineappl_cli`.

use rayon::prelude::*;

/// One level of a binning analysis: `size` samples averaged down to this
/// level, their `mean`, `variance` and the resulting `squared_error =
/// variance / size`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinLevel {
    /// Number of samples contributing to this level.
    pub size: usize,
    /// Sample mean at this level.
    pub mean: f64,
    /// Sample variance at this level.
    pub variance: f64,
    /// `variance / size`, the squared standard error of the mean.
    pub squared_error: f64,
}

fn mean_and_variance(data: &[f64]) -> (f64, f64) {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let variance = if data.len() > 1 {
        data.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (mean, variance)
}

/// Builds the full binning hierarchy for `data`: level 0 is the raw series,
/// each subsequent level pairwise-averages the previous one (discarding a
/// trailing odd sample), until fewer than 2 samples remain.
#[must_use]
pub fn accumulate_binning(data: &[f64]) -> Vec<BinLevel> {
    let mut levels = Vec::new();
    let mut current = data.to_vec();

    loop {
        let (mean, variance) = mean_and_variance(&current);
        let size = current.len();
        levels.push(BinLevel {
            size,
            mean,
            variance,
            squared_error: if size > 0 { variance / size as f64 } else { 0.0 },
        });
        if current.len() < 4 {
            break;
        }
        current = current
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| (c[0] + c[1]) / 2.0)
            .collect();
    }
    levels
}

/// Picks the bin level at which `squared_error` has plateaued, i.e. the
/// first level whose `squared_error` no longer grows by more than 1% over
/// the previous level — the point past which successive averaging stops
/// revealing additional autocorrelation. Falls back to the last level if no
/// plateau is found.
#[must_use]
pub fn estimate_bin(levels: &[BinLevel]) -> usize {
    if levels.len() < 2 {
        return 0;
    }
    for w in 1..levels.len() {
        let prev = levels[w - 1].squared_error;
        let curr = levels[w].squared_error;
        if prev > 0.0 && (curr - prev) / prev < 0.01 {
            return w;
        }
    }
    levels.len() - 1
}

/// Delete-one-block jackknife estimate of `mean` and `squared_error` for an
/// arbitrary (possibly nonlinear) estimator `f` applied to block means of
/// `data`, split into `n_blocks` contiguous blocks of (as close to) equal
/// size. Trailing samples that do not fill a full block are dropped.
#[must_use]
pub fn accumulate_jackknife(data: &[f64], n_blocks: usize, f: impl Fn(&[f64]) -> f64) -> (f64, f64) {
    assert!(n_blocks >= 2, "jackknife requires at least two blocks");
    let block_size = data.len() / n_blocks;
    assert!(block_size > 0, "not enough samples for the requested block count");
    let used = block_size * n_blocks;
    let data = &data[..used];

    let block_means: Vec<f64> = data
        .chunks(block_size)
        .map(|c| c.iter().sum::<f64>() / block_size as f64)
        .collect();

    let pseudo_values: Vec<f64> = (0..n_blocks)
        .map(|k| {
            let rest: Vec<f64> = block_means
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != k)
                .map(|(_, &m)| m)
                .collect();
            f(&rest)
        })
        .collect();

    let mean = pseudo_values.iter().sum::<f64>() / n_blocks as f64;
    let variance = pseudo_values
        .iter()
        .map(|&p| (p - mean).powi(2))
        .sum::<f64>()
        * (n_blocks as f64 - 1.0)
        / n_blocks as f64;
    (mean, variance)
}

/// The binning/jackknife summary for one named observable's time series.
#[derive(Clone, Debug)]
pub struct EstimatorSummary {
    /// The observable's name, e.g. `"energy"` or `"focc_0"`.
    pub name: String,
    /// Mean at the plateau bin level.
    pub mean: f64,
    /// Squared error at the plateau bin level.
    pub squared_error: f64,
    /// The bin level chosen by [`estimate_bin`].
    pub bin_level: usize,
}

/// Runs [`accumulate_binning`] and [`estimate_bin`] over every named series
/// in `series` in parallel, one `rayon` task per estimator — independent
/// work with no cross-series dependency, mirroring the teacher's
/// per-PDF-member parallel loops.
#[must_use]
pub fn summarize_all(series: &[(String, Vec<f64>)]) -> Vec<EstimatorSummary> {
    series
        .par_iter()
        .map(|(name, data)| {
            let levels = accumulate_binning(data);
            let bin_level = estimate_bin(&levels);
            let level = levels[bin_level];
            EstimatorSummary {
                name: name.clone(),
                mean: level.mean,
                squared_error: level.squared_error,
                bin_level,
            }
        })
        .collect()
}

/// Specific heat `C_v = beta^2 * (<E^2> - <E>^2 - <d2E>) / V`, jackknifed
/// over paired `(energy, d2energy)` blocks.
///
/// # Panics
///
/// Panics if `energy_series` and `d2energy_series` have different lengths.
#[must_use]
pub fn specific_heat(energy_series: &[f64], d2energy_series: &[f64], beta: f64, v: usize, n_blocks: usize) -> (f64, f64) {
    assert_eq!(energy_series.len(), d2energy_series.len());
    let n_blocks_eff = n_blocks.min(energy_series.len() / 2).max(2);
    let block_size = energy_series.len() / n_blocks_eff;
    let used = block_size * n_blocks_eff;

    let e_blocks: Vec<f64> = energy_series[..used]
        .chunks(block_size)
        .map(|c| c.iter().sum::<f64>() / block_size as f64)
        .collect();
    let e2_blocks: Vec<f64> = energy_series[..used]
        .chunks(block_size)
        .map(|c| c.iter().map(|&e| e * e).sum::<f64>() / block_size as f64)
        .collect();
    let d2_blocks: Vec<f64> = d2energy_series[..used]
        .chunks(block_size)
        .map(|c| c.iter().sum::<f64>() / block_size as f64)
        .collect();

    let pseudo: Vec<f64> = (0..n_blocks_eff)
        .map(|k| {
            let leave_out = |blocks: &[f64]| -> f64 {
                blocks
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != k)
                    .map(|(_, &x)| x)
                    .sum::<f64>()
                    / (n_blocks_eff - 1) as f64
            };
            let mean_e = leave_out(&e_blocks);
            let mean_e2 = leave_out(&e2_blocks);
            let mean_d2 = leave_out(&d2_blocks);
            beta * beta * (mean_e2 - mean_e * mean_e - mean_d2) / v as f64
        })
        .collect();

    let mean = pseudo.iter().sum::<f64>() / n_blocks_eff as f64;
    let variance = pseudo.iter().map(|&p| (p - mean).powi(2)).sum::<f64>() * (n_blocks_eff as f64 - 1.0)
        / n_blocks_eff as f64;
    (mean, variance)
}

/// Susceptibility `chi_q = <N_q^2> - <N_q>^2` for `q in {0, pi}`, from a
/// per-sample occupation-count series `n_q`.
#[must_use]
pub fn susceptibility(n_q_series: &[f64], n_blocks: usize) -> (f64, f64) {
    accumulate_jackknife(n_q_series, n_blocks, |blocks| {
        let mean = blocks.iter().sum::<f64>() / blocks.len() as f64;
        let mean_sq = blocks.iter().map(|&n| n * n).sum::<f64>() / blocks.len() as f64;
        mean_sq - mean * mean
    })
}

/// Binder cumulant `U_4 = 1 - <m^4> / (3 <m^2>^2)` of an order-parameter
/// series `m`, via jackknife over `n_blocks`.
#[must_use]
pub fn binder_cumulant(m_series: &[f64], n_blocks: usize) -> (f64, f64) {
    accumulate_jackknife(m_series, n_blocks, |blocks| {
        let m2 = blocks.iter().map(|&m| m * m).sum::<f64>() / blocks.len() as f64;
        let m4 = blocks.iter().map(|&m| m.powi(4)).sum::<f64>() / blocks.len() as f64;
        1.0 - m4 / (3.0 * m2 * m2)
    })
}

/// `f`-`f` correlator at separation `l`:
/// `C(l) = (1/(2*D*V)) * sum_i sum_d (f_i - <f_i>)(f_{i+l*e_d} - <f_{i+l*e_d}>
/// + f_{i-l*e_d} - <f_{i-l*e_d}>)`, from per-site-per-sample occupation
/// streams `focc[i][t]` and their means `focc_mean[i]`. `shift`
/// maps `(site, direction, offset)` to the neighboring site index `l` steps
/// away (the driver supplies this from the lattice adapter).
#[must_use]
pub fn ff_correlator(
    focc: &[Vec<f64>],
    focc_mean: &[f64],
    n_dims: usize,
    l: usize,
    shift: impl Fn(usize, usize, isize) -> usize,
) -> f64 {
    let v = focc.len();
    let n_samples = focc[0].len();
    let mut sum = 0.0;
    for i in 0..v {
        for d in 0..n_dims {
            let plus = shift(i, d, l as isize);
            let minus = shift(i, d, -(l as isize));
            for t in 0..n_samples {
                let fi = focc[i][t] - focc_mean[i];
                let plus_term = focc[plus][t] - focc_mean[plus];
                let minus_term = focc[minus][t] - focc_mean[minus];
                sum += fi * (plus_term + minus_term);
            }
        }
    }
    sum / (2.0 * n_dims as f64 * v as f64 * n_samples as f64)
}

/// Local density of states `rho(omega) = -(1/(pi*V)) * sum_k
/// Im[1/(omega - e_k + i*eta)]` from a single sample's spectrum.
#[must_use]
pub fn local_dos(spectrum: &[f64], omega: f64, eta: f64) -> f64 {
    let v = spectrum.len() as f64;
    let sum: f64 = spectrum
        .iter()
        .map(|&e| {
            // Im[1 / (z)] for z = (omega - e) + i*eta is -eta / (re^2 + eta^2)
            let re = omega - e;
            -eta / (re * re + eta * eta)
        })
        .sum();
    -(sum) / (std::f64::consts::PI * v)
}

/// IPR moment `M^(n)(omega) = (Im[sum_k IPR_k/(omega - e_k + i*eta)] /
/// Im[sum_k 1/(omega - e_k + i*eta)] - <IPR>)^n`.
#[must_use]
pub fn ipr_moment(spectrum: &[f64], ipr: &[f64], mean_ipr: f64, omega: f64, eta: f64, n: i32) -> f64 {
    let weighted: f64 = spectrum
        .iter()
        .zip(ipr.iter())
        .map(|(&e, &ip)| {
            let re = omega - e;
            ip * (-eta / (re * re + eta * eta))
        })
        .sum();
    let unweighted: f64 = spectrum
        .iter()
        .map(|&e| {
            let re = omega - e;
            -eta / (re * re + eta * eta)
        })
        .sum();
    (weighted / unweighted - mean_ipr).powi(n)
}

/// DC conductivity `sigma(0)`, obtained as the average of `-omega *
/// sigma(omega)` evaluated at the two grid points closest to zero, `omega =
/// +domega` and `omega = -domega`. `sigma_plus`/`sigma_minus`
/// are the binned means of `sigma(omega)` at those two points.
#[must_use]
pub fn dc_conductivity(sigma_plus: f64, sigma_minus: f64, domega: f64) -> f64 {
    0.5 * (-domega * sigma_plus + domega * sigma_minus)
}

/// The dynamic part of the conductivity at frequency `omega`,
/// `sigma(omega) - sigma(0)`.
#[must_use]
pub fn dynamic_conductivity(sigma_omega: f64, sigma_dc: f64) -> f64 {
    sigma_omega - sigma_dc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binning_of_constant_series_has_zero_variance_at_every_level() {
        let data = vec![3.0; 64];
        let levels = accumulate_binning(&data);
        for level in &levels {
            assert!(level.variance.abs() < 1e-12);
        }
    }

    #[test]
    fn binning_halves_sample_count_each_level() {
        let data: Vec<f64> = (0..32).map(|i| i as f64).collect();
        let levels = accumulate_binning(&data);
        assert_eq!(levels[0].size, 32);
        assert_eq!(levels[1].size, 16);
        assert_eq!(levels[2].size, 8);
    }

    #[test]
    fn estimate_bin_returns_zero_for_degenerate_input() {
        assert_eq!(estimate_bin(&[]), 0);
    }

    #[test]
    fn jackknife_mean_of_identity_matches_direct_mean() {
        let data: Vec<f64> = (1..=20).map(f64::from).collect();
        let (mean, _var) = accumulate_jackknife(&data, 5, |blocks| blocks.iter().sum::<f64>() / blocks.len() as f64);
        let direct = data.iter().sum::<f64>() / data.len() as f64;
        assert!((mean - direct).abs() < 1e-8);
    }

    #[test]
    fn jackknife_variance_is_zero_for_constant_series() {
        let data = vec![5.0; 30];
        let (mean, var) = accumulate_jackknife(&data, 6, |blocks| blocks.iter().sum::<f64>() / blocks.len() as f64);
        assert!((mean - 5.0).abs() < 1e-10);
        assert!(var.abs() < 1e-12);
    }

    #[test]
    fn specific_heat_is_finite_and_zero_for_constant_energy() {
        let energies = vec![-1.0; 20];
        let d2energies = vec![0.0; 20];
        let (cv, err) = specific_heat(&energies, &d2energies, 2.0, 4, 5);
        assert!((cv).abs() < 1e-10);
        assert!(err.abs() < 1e-10);
    }

    #[test]
    fn susceptibility_is_nonnegative() {
        let data = vec![2.0, 3.0, 1.0, 4.0, 2.0, 3.0, 2.0, 1.0, 3.0, 2.0];
        let (chi, _err) = susceptibility(&data, 5);
        assert!(chi >= -1e-12);
    }

    #[test]
    fn binder_cumulant_of_constant_series_is_two_thirds() {
        let data = vec![2.0; 20];
        let (u4, _err) = binder_cumulant(&data, 5);
        assert!((u4 - 2.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn ff_correlator_vanishes_for_uncorrelated_mean_subtracted_noise() {
        let focc = vec![vec![0.0; 8]; 4];
        let mean = vec![0.0; 4];
        let c = ff_correlator(&focc, &mean, 1, 1, |i, _d, off| {
            ((i as isize + off).rem_euclid(4)) as usize
        });
        assert!(c.abs() < 1e-12);
    }

    #[test]
    fn local_dos_peaks_near_eigenvalue() {
        let spectrum = vec![-1.0, 0.0, 1.0];
        let at_peak = local_dos(&spectrum, 0.0, 0.05);
        let off_peak = local_dos(&spectrum, 2.0, 0.05);
        assert!(at_peak > off_peak);
    }

    #[test]
    fn dc_conductivity_is_antisymmetric_average() {
        let sigma = dc_conductivity(1.0, 1.0, 0.1);
        assert!((sigma - 0.0).abs() < 1e-12);
    }

    #[test]
    fn summarize_all_preserves_names_and_order() {
        let series = vec![
            ("a".to_string(), vec![1.0; 16]),
            ("b".to_string(), vec![2.0; 16]),
        ];
        let summaries = summarize_all(&series);
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().any(|s| s.name == "a" && (s.mean - 1.0).abs() < 1e-10));
        assert!(summaries.iter().any(|s| s.name == "b" && (s.mean - 2.0).abs() < 1e-10));
    }
}
