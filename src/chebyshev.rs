//! Chebyshev-polynomial expansion of `logZ`, avoiding full diagonalization.
//!
//! Pure-function machinery: given a bandwidth-rescaled operator `X =
//! (H - b*I)/a` with spectrum in `[-1, 1]`, expands a smooth target `phi` on
//! a Chebyshev grid and combines the coefficients with moments
//! `mu_n = tr(T_n(X))/V`.

use crate::error::{Error, Result};
use crate::lattice::SparseMatrix;
use nalgebra::{DMatrix, SymmetricEigen};
use std::f64::consts::PI;

/// Tolerance below which the rescale interval `e_max - e_min` is considered
/// degenerate and Chebyshev rescaling refuses to proceed.
pub const DEGENERACY_TOLERANCE: f64 = 1e-8;

/// Default number of Lanczos iterations used to estimate extremal
/// eigenvalues of a sparse Hamiltonian.
const LANCZOS_ITERATIONS: usize = 64;

/// Precomputed node/weight machinery for evaluating Chebyshev coefficients
/// of a smooth function on `[-1, 1]`.
#[derive(Clone, Debug)]
pub struct ChebyshevEvaluator {
    n_cheb: usize,
    grid_size: usize,
}

impl ChebyshevEvaluator {
    /// Builds an evaluator with `n_cheb` expansion terms and `grid_size`
    /// quadrature nodes, clamped to at least `max(2*n_cheb, 10)`.
    #[must_use]
    pub fn new(n_cheb: usize, grid_size: usize) -> Self {
        Self {
            n_cheb,
            grid_size: grid_size.max(2 * n_cheb).max(10),
        }
    }

    /// Chooses `n_cheb = ceil(prefactor * ln(v))`, rounded up to the next
    /// even number, and a matching grid size, following
    /// `fk_mc::solve`'s `cheb_size`/`ngrid_points` derivation.
    #[must_use]
    pub fn for_volume(v: usize, prefactor: f64) -> Self {
        let mut n_cheb = (prefactor * (v as f64).ln()).ceil() as usize;
        if n_cheb % 2 != 0 {
            n_cheb += 1;
        }
        let n_cheb = n_cheb.max(2);
        Self::new(n_cheb, (2 * n_cheb).max(10))
    }

    /// Number of terms kept in the expansion.
    #[must_use]
    pub const fn n_cheb(&self) -> usize {
        self.n_cheb
    }

    /// Quadrature grid size used to evaluate coefficients.
    #[must_use]
    pub const fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Evaluates the (un-doubled) Chebyshev coefficients `c_0..c_{n_cheb-1}`
    /// of `f` via Gauss-Chebyshev quadrature on `self.grid_size` nodes
    /// `x_j = cos(pi*(j+1/2)/M)`: `c_n = (1/M) * sum_j f(x_j) * cos(n*theta_j)`.
    #[must_use]
    pub fn coefficients(&self, f: impl Fn(f64) -> f64) -> Vec<f64> {
        let m = self.grid_size;
        let thetas: Vec<f64> = (0..m)
            .map(|j| PI * (j as f64 + 0.5) / m as f64)
            .collect();
        let values: Vec<f64> = thetas.iter().map(|&theta| f(theta.cos())).collect();

        (0..self.n_cheb)
            .map(|n| {
                let sum: f64 = thetas
                    .iter()
                    .zip(values.iter())
                    .map(|(&theta, &val)| val * (n as f64 * theta).cos())
                    .sum();
                sum / m as f64
            })
            .collect()
    }
}

/// Estimates the smallest and largest eigenvalue of a sparse symmetric
/// Hamiltonian `H = hopping + diag(diag)` using a Lanczos tridiagonalization
/// (supplementing the original's ARPACK dependency, which has no
/// counterpart in this crate's dependency stack).
///
/// # Errors
///
/// Returns [`Error::EigensolverFailure`] if the starting vector collapses to
/// zero (can only happen for `v == 0`).
pub fn lanczos_extremal_eigenvalues(
    hopping: &SparseMatrix,
    diag: &[f64],
    seed: u64,
) -> Result<(f64, f64)> {
    use rand::{Rng, SeedableRng};

    let v = diag.len();
    if v == 0 {
        return Err(Error::EigensolverFailure(
            "cannot estimate spectrum of an empty Hamiltonian".to_string(),
        ));
    }

    let matvec = |x: &[f64]| -> Vec<f64> {
        let mut y = hopping.matvec(x);
        for i in 0..v {
            y[i] += diag[i] * x[i];
        }
        y
    };

    let mut rng = rand_pcg::Pcg64::seed_from_u64(seed);
    let mut q_prev = vec![0.0; v];
    let mut q_curr: Vec<f64> = (0..v).map(|_| rng.gen_range(-1.0..1.0)).collect();
    normalize(&mut q_curr);

    let steps = LANCZOS_ITERATIONS.min(v);
    let mut alphas = Vec::with_capacity(steps);
    let mut betas = Vec::with_capacity(steps.saturating_sub(1));
    let mut beta_prev = 0.0;

    for _ in 0..steps {
        let mut w = matvec(&q_curr);
        for i in 0..v {
            w[i] -= beta_prev * q_prev[i];
        }
        let alpha: f64 = dot(&w, &q_curr);
        for i in 0..v {
            w[i] -= alpha * q_curr[i];
        }
        alphas.push(alpha);
        let beta = norm(&w);
        if beta < 1e-13 {
            break;
        }
        for x in &mut w {
            *x /= beta;
        }
        betas.push(beta);
        q_prev = q_curr;
        q_curr = w;
        beta_prev = beta;
    }

    let m = alphas.len();
    let mut tri = DMatrix::<f64>::zeros(m, m);
    for i in 0..m {
        tri[(i, i)] = alphas[i];
        if i + 1 < m {
            tri[(i, i + 1)] = betas[i];
            tri[(i + 1, i)] = betas[i];
        }
    }
    let eigen = SymmetricEigen::new(tri);
    let e_min = eigen.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    let e_max = eigen
        .eigenvalues
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    Ok((e_min, e_max))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: &mut [f64]) {
    let n = norm(a);
    if n > 0.0 {
        for x in a.iter_mut() {
            *x /= n;
        }
    }
}

/// Computes Chebyshev moments `mu_n = tr(T_n(X))/V` for `n = 0..n_cheb` of
/// the rescaled operator `X = (hopping + diag(diag) - b*I) / a`, via the
/// dense three-term recurrence `T_0 = I`, `T_1 = X`,
/// `T_{n+1} = 2*X*T_n - T_{n-1}`.
#[must_use]
pub fn chebyshev_moments(
    hopping: &SparseMatrix,
    diag: &[f64],
    a: f64,
    b: f64,
    n_cheb: usize,
) -> Vec<f64> {
    let v = diag.len();
    let shifted_diag: Vec<f64> = diag.iter().map(|&d| (d - b) / a).collect();
    let mut x = hopping.to_dense_with_diag(&shifted_diag);
    // off-diagonal entries of `hopping` still need the 1/a rescale.
    for i in 0..v {
        for j in 0..v {
            if i != j {
                x[(i, j)] /= a;
            }
        }
    }

    let mut moments = vec![0.0; n_cheb.max(1)];
    moments[0] = 1.0; // tr(I)/V

    if n_cheb <= 1 {
        return moments;
    }

    let mut t_prev = DMatrix::<f64>::identity(v, v);
    let mut t_curr = x.clone();
    moments[1] = t_curr.trace() / v as f64;

    for n in 2..n_cheb {
        let t_next = (&x * &t_curr).scale(2.0) - &t_prev;
        moments[n] = t_next.trace() / v as f64;
        t_prev = t_curr;
        t_curr = t_next;
    }

    moments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficients_of_identity_recover_delta_like_response() {
        let cheb = ChebyshevEvaluator::new(4, 16);
        let c = cheb.coefficients(|_| 1.0);
        assert!((c[0] - 1.0).abs() < 1e-10);
        for &ci in &c[1..] {
            assert!(ci.abs() < 1e-10);
        }
    }

    #[test]
    fn for_volume_rounds_up_to_even() {
        let cheb = ChebyshevEvaluator::for_volume(64, 2.2);
        assert_eq!(cheb.n_cheb() % 2, 0);
        assert!(cheb.grid_size() >= 2 * cheb.n_cheb());
        assert!(cheb.grid_size() >= 10);
    }

    #[test]
    fn lanczos_matches_dense_for_small_matrix() {
        let mut hopping = SparseMatrix::zeros(4);
        hopping.add_symmetric(0, 1, -1.0);
        hopping.add_symmetric(1, 2, -1.0);
        hopping.add_symmetric(2, 3, -1.0);
        hopping.add_symmetric(3, 0, -1.0);
        let diag = vec![0.0; 4];

        let dense = hopping.to_dense_with_diag(&diag);
        let eigen = SymmetricEigen::new(dense);
        let dense_min = eigen.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
        let dense_max = eigen
            .eigenvalues
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);

        let (e_min, e_max) = lanczos_extremal_eigenvalues(&hopping, &diag, 42).unwrap();
        assert!((e_min - dense_min).abs() < 1e-6);
        assert!((e_max - dense_max).abs() < 1e-6);
    }

    #[test]
    fn moments_of_zero_operator_are_trivial() {
        let hopping = SparseMatrix::zeros(3);
        let diag = vec![0.0; 3];
        let moments = chebyshev_moments(&hopping, &diag, 1.0, 0.0, 4);
        assert!((moments[0] - 1.0).abs() < 1e-12);
        assert!(moments[1].abs() < 1e-12);
    }
}
