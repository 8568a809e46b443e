/*!
Continuous distributions used by the sampler: a multivariate normal that tolerates
singular covariance matrices, the [`Prior`] capability and two concrete priors.

# Examples

```rust
use abc_pmc::distributions::{Prior, TophatPrior};
use ndarray::arr1;
use rand::{rngs::SmallRng, SeedableRng};

let prior = TophatPrior::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 2.0])).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let theta = prior.sample(&mut rng);
assert_eq!(theta.len(), 2);
assert_eq!(prior.density(theta.view()), 1.0);
```
*/

use nalgebra::DMatrix;
use ndarray::prelude::*;
use rand::Rng;
use rand_distr::{StandardNormal, Uniform};
use std::f64::consts::PI;

use crate::error::{AbcError, Result};

/// A prior over the D-dimensional parameter space.
///
/// Implementations are stateless: randomness comes from the caller's RNG so
/// that every particle slot can draw from its own deterministic stream.
pub trait Prior: Sync {
    /// Dimensionality D of the parameter vectors.
    fn dim(&self) -> usize;

    /// Draws an unconditional sample of length D.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64>;

    /// Evaluates the (possibly unnormalized) non-negative density at `theta`.
    fn density(&self, theta: ArrayView1<f64>) -> f64;
}

/**
A multivariate normal distribution whose covariance may be singular.

The covariance is decomposed with a symmetric eigendecomposition. Eigenvalues
below `1e6 · ε · max|λ|` are treated as zero, so the density is evaluated on
the supporting subspace with the pseudo-determinant and pseudo-inverse instead
of failing. Sampling uses `mean + V · diag(√λ) · z`, which is well defined for
any positive semi-definite matrix.

# Examples

```rust
use abc_pmc::distributions::MultivariateNormal;
use ndarray::{arr1, arr2};

// Rank-deficient: the second coordinate is a copy of the first.
let mvn = MultivariateNormal::new(arr1(&[0.0, 0.0]), arr2(&[[1.0, 1.0], [1.0, 1.0]]).view()).unwrap();
let p = mvn.pdf(arr1(&[0.5, 0.5]).view());
assert!(p.is_finite() && p > 0.0);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateNormal {
    mean: Array1<f64>,
    /// `V · diag(√λ)`, D × D.
    factor: Array2<f64>,
    /// `V_r · diag(1/√λ_r)` over the kept eigenpairs, D × rank.
    whitening: Array2<f64>,
    log_norm: f64,
}

impl MultivariateNormal {
    /// Builds the distribution from a mean and a symmetric positive semi-definite covariance.
    ///
    /// The covariance is symmetrized before decomposition. Slightly negative
    /// eigenvalues coming from round-off are clamped to zero.
    pub fn new(mean: Array1<f64>, cov: ArrayView2<f64>) -> Result<Self> {
        let dim = mean.len();
        if cov.nrows() != cov.ncols() {
            return Err(AbcError::InvalidConfig(format!(
                "covariance must be square, got {}x{}",
                cov.nrows(),
                cov.ncols()
            )));
        }
        if cov.nrows() != dim {
            return Err(AbcError::DimensionMismatch {
                what: "covariance",
                expected: dim,
                got: cov.nrows(),
            });
        }
        if cov.iter().chain(mean.iter()).any(|x| !x.is_finite()) {
            return Err(AbcError::InvalidConfig(
                "mean and covariance must be finite".to_string(),
            ));
        }

        let sym = DMatrix::from_fn(dim, dim, |i, j| 0.5 * (cov[[i, j]] + cov[[j, i]]));
        let eigen = sym.symmetric_eigen();
        let max_abs = eigen.eigenvalues.iter().fold(0.0f64, |acc, l| acc.max(l.abs()));
        let tol = 1e6 * f64::EPSILON * max_abs;

        let mut factor = Array2::<f64>::zeros((dim, dim));
        let mut kept = Vec::with_capacity(dim);
        for (k, &lambda) in eigen.eigenvalues.iter().enumerate() {
            let scale = lambda.max(0.0).sqrt();
            for i in 0..dim {
                factor[[i, k]] = eigen.eigenvectors[(i, k)] * scale;
            }
            if lambda > tol {
                kept.push(k);
            }
        }

        let rank = kept.len();
        let mut whitening = Array2::<f64>::zeros((dim, rank));
        let mut log_pdet = 0.0;
        for (col, &k) in kept.iter().enumerate() {
            let lambda = eigen.eigenvalues[k];
            log_pdet += lambda.ln();
            let inv_scale = 1.0 / lambda.sqrt();
            for i in 0..dim {
                whitening[[i, col]] = eigen.eigenvectors[(i, k)] * inv_scale;
            }
        }
        let log_norm = -0.5 * (rank as f64 * (2.0 * PI).ln() + log_pdet);

        Ok(Self {
            mean,
            factor,
            whitening,
            log_norm,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Number of eigen-directions the density is supported on.
    pub fn rank(&self) -> usize {
        self.whitening.ncols()
    }

    /// Draws one sample using the caller's RNG.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let z: Array1<f64> = (0..self.dim()).map(|_| rng.sample(StandardNormal)).collect();
        &self.mean + &self.factor.dot(&z)
    }

    /// Log-density at `x`, using the pseudo-inverse on singular covariances.
    pub fn log_pdf(&self, x: ArrayView1<f64>) -> f64 {
        let dev = &x - &self.mean;
        let projected = dev.dot(&self.whitening);
        self.log_norm - 0.5 * projected.dot(&projected)
    }

    pub fn pdf(&self, x: ArrayView1<f64>) -> f64 {
        self.log_pdf(x).exp()
    }
}

/// Normal prior with mean `mu` and covariance `cov`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianPrior {
    mvn: MultivariateNormal,
}

impl GaussianPrior {
    pub fn new(mu: Array1<f64>, cov: ArrayView2<f64>) -> Result<Self> {
        Ok(Self {
            mvn: MultivariateNormal::new(mu, cov)?,
        })
    }
}

impl Prior for GaussianPrior {
    fn dim(&self) -> usize {
        self.mvn.dim()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        self.mvn.sample(rng)
    }

    fn density(&self, theta: ArrayView1<f64>) -> f64 {
        if theta.len() != self.dim() {
            return 0.0;
        }
        self.mvn.pdf(theta)
    }
}

/// Uniform box prior: each coordinate lies in `[min_i, max_i)`.
///
/// The density is an indicator (1 inside the box, 0 outside) rather than the
/// normalized uniform density; importance weights are normalized anyway.
#[derive(Debug, Clone, PartialEq)]
pub struct TophatPrior {
    min: Array1<f64>,
    max: Array1<f64>,
}

impl TophatPrior {
    /// Fails when the bounds differ in length, are empty, or `min_i >= max_i` for some `i`.
    pub fn new(min: Array1<f64>, max: Array1<f64>) -> Result<Self> {
        if min.len() != max.len() {
            return Err(AbcError::InvalidConfig(format!(
                "prior bounds have mismatched shapes: min has {} entries, max has {}",
                min.len(),
                max.len()
            )));
        }
        if min.is_empty() {
            return Err(AbcError::InvalidConfig("prior bounds are empty".to_string()));
        }
        if let Some(i) = (0..min.len()).find(|&i| !(min[i] < max[i])) {
            return Err(AbcError::InvalidConfig(format!(
                "prior bounds are not increasing at index {i}: min={} max={}",
                min[i], max[i]
            )));
        }
        Ok(Self { min, max })
    }

    pub fn bounds(&self) -> (ArrayView1<f64>, ArrayView1<f64>) {
        (self.min.view(), self.max.view())
    }
}

impl Prior for TophatPrior {
    fn dim(&self) -> usize {
        self.min.len()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        self.min
            .iter()
            .zip(self.max.iter())
            .map(|(&lo, &hi)| rng.sample(Uniform::new(lo, hi)))
            .collect()
    }

    fn density(&self, theta: ArrayView1<f64>) -> f64 {
        let inside = theta.len() == self.dim()
            && theta
                .iter()
                .zip(self.min.iter().zip(self.max.iter()))
                .all(|(&x, (&lo, &hi))| x >= lo && x < hi);
        if inside {
            1.0
        } else {
            0.0
        }
    }
}
