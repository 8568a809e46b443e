//! Importance weights for a freshly accepted population.
//!
//! A particle `θ` proposed from the previous population gets
//! ```text
//! w(θ) = π(θ) / Σ_j w_j · K(θ; θ_j, Σ),    Σ = 2 · weighted_cov(θ_prev, w_prev)
//! ```
//! where `K` is a multivariate normal density that accepts singular `Σ`.

use ndarray::prelude::*;

use crate::distributions::{MultivariateNormal, Prior};
use crate::error::{AbcError, Result};
use crate::population::Population;
use crate::stats::weighted_covariance;

/// Computes unnormalized weights against one previous population.
#[derive(Debug)]
pub struct ImportanceWeighter<'a, P> {
    prior: &'a P,
    pool: &'a Population,
    kernel: MultivariateNormal,
}

impl<'a, P: Prior> ImportanceWeighter<'a, P> {
    /// Builds the Gaussian-mixture kernel from `pool`.
    pub fn new(prior: &'a P, pool: &'a Population) -> Result<Self> {
        let sigma = weighted_covariance(pool.thetas.view(), pool.ws.view())? * 2.0;
        let kernel = MultivariateNormal::new(Array1::zeros(pool.dim()), sigma.view())?;
        Ok(Self { prior, pool, kernel })
    }

    /// Unnormalized importance weight of `theta`. Zero outside the prior support.
    pub fn weight(&self, theta: ArrayView1<f64>) -> f64 {
        let prior = self.prior.density(theta);
        if prior == 0.0 {
            return 0.0;
        }
        let mixture: f64 = self
            .pool
            .thetas
            .rows()
            .into_iter()
            .zip(self.pool.ws.iter())
            .map(|(theta_j, &w_j)| w_j * self.kernel.pdf((&theta - &theta_j).view()))
            .sum();
        prior / mixture
    }
}

/// Divides raw weights by their sum.
///
/// Fails when the sum is zero or not finite, e.g. when every particle fell
/// outside the prior support.
pub fn normalize_weights(raw: Vec<f64>) -> Result<Array1<f64>> {
    let raw = Array1::from(raw);
    let total = raw.sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(AbcError::DegenerateWeights(format!(
            "importance weights sum to {total}"
        )));
    }
    Ok(raw / total)
}
