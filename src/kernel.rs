/*!
# Particle proposal kernels

From iteration 1 on, every particle slot runs the same loop:

1. draw a parent from the previous population with probability proportional to its weight,
2. perturb it with a zero-mean multivariate normal whose covariance is computed by the kernel,
3. simulate the candidate and accept it if its discrepancy is within the current threshold,
4. otherwise start again from 1.

The variants only differ in step 2:

- [`ProposalKernel::Global`] uses twice the weighted population covariance
  (Beaumont et al. 2009), shared by all slots.
- [`ProposalKernel::Knn`] uses the sample covariance of the `k` nearest neighbours
  of the parent (Filippi et al. 2012).
- [`ProposalKernel::Olcm`] uses the optimal local covariance matrix (Filippi et al. 2012):
  the weighted covariance of the particles that already satisfy the new threshold,
  recentred on the parent.
*/

use ndarray::prelude::*;
use ndarray_stats::CorrelationExt;
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::Distribution;
use std::borrow::Cow;

use crate::distributions::MultivariateNormal;
use crate::error::{AbcError, Result};
use crate::model::{Acceptance, Distance, Simulator};
use crate::neighbors::KdTree;
use crate::population::{Population, SlotResult};
use crate::stats::weighted_covariance;
use crate::threshold::Threshold;

/// Selects how the proposal covariance is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProposalKernel {
    #[default]
    Global,
    Knn {
        k: usize,
    },
    Olcm,
}

impl ProposalKernel {
    /// KNN kernel over `k` neighbours. A sample covariance needs `k >= 2`.
    pub fn knn(k: usize) -> Result<Self> {
        if k < 2 {
            return Err(AbcError::InvalidConfig(format!(
                "KNN kernel needs at least 2 neighbours, got k={k}"
            )));
        }
        Ok(ProposalKernel::Knn { k })
    }

    /// Precomputes everything the slots of one iteration share.
    pub(crate) fn prepare(&self, pool: &Population, eps: &Threshold) -> Result<LocalCovariance> {
        match *self {
            ProposalKernel::Global => {
                log::debug!("global kernel for t={}", pool.t + 1);
                prepare_global(pool)
            }
            ProposalKernel::Knn { k } => {
                if k < 2 || k > pool.n() {
                    return Err(AbcError::InvalidConfig(format!(
                        "KNN kernel needs 2 <= k <= N, got k={k} with N={}",
                        pool.n()
                    )));
                }
                log::debug!("KNN kernel with k={k} for t={}", pool.t + 1);
                Ok(LocalCovariance::Knn {
                    tree: KdTree::new(pool.thetas.view()),
                    k,
                })
            }
            ProposalKernel::Olcm => prepare_olcm(pool, eps),
        }
    }
}

fn prepare_global(pool: &Population) -> Result<LocalCovariance> {
    let sigma = weighted_covariance(pool.thetas.view(), pool.ws.view())? * 2.0;
    let perturbation = MultivariateNormal::new(Array1::zeros(pool.dim()), sigma.view())?;
    Ok(LocalCovariance::Global {
        sigma,
        perturbation,
    })
}

fn prepare_olcm(pool: &Population, eps: &Threshold) -> Result<LocalCovariance> {
    eps.check_dim(pool.dists.ncols())?;

    let keep: Vec<usize> = pool
        .dists
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, dist)| eps.accepts(dist.view()))
        .map(|(i, _)| i)
        .collect();
    let ws = pool.ws.select(Axis(0), &keep);
    let w_sum = ws.sum();
    if keep.is_empty() || !(w_sum > 0.0) {
        // No particle of the previous population satisfies the new threshold.
        log::warn!(
            "OLCM: no particle of t={} satisfies eps={}, falling back to the global kernel",
            pool.t,
            eps
        );
        return prepare_global(pool);
    }

    let thetas = pool.thetas.select(Axis(0), &keep);
    let ws = ws / w_sum;
    let mean = ws.dot(&thetas);
    let centered = &thetas - &mean.view().insert_axis(Axis(0));
    let spread = (&centered * &ws.view().insert_axis(Axis(1))).t().dot(&centered);
    log::debug!(
        "OLCM kernel for t={}: {} of {} particles within eps",
        pool.t + 1,
        keep.len(),
        pool.n()
    );
    Ok(LocalCovariance::Olcm { mean, spread })
}

/// Per-iteration state of a proposal kernel, read-only and shared by all slots.
#[derive(Debug, Clone)]
pub(crate) enum LocalCovariance {
    /// `sigma = 2 · weighted_cov`, decomposed once for all slots.
    Global {
        sigma: Array2<f64>,
        perturbation: MultivariateNormal,
    },
    Knn {
        tree: KdTree,
        k: usize,
    },
    /// `spread = Σ_i w_i (θ_i − m)(θ_i − m)ᵀ` over the particles within eps.
    Olcm {
        mean: Array1<f64>,
        spread: Array2<f64>,
    },
}

impl LocalCovariance {
    /// Proposal covariance for a parent at `theta`.
    pub fn covariance(&self, theta: ArrayView1<f64>) -> Result<Array2<f64>> {
        match self {
            LocalCovariance::Global { sigma, .. } => Ok(sigma.clone()),
            LocalCovariance::Knn { tree, k } => {
                let idxs = tree.nearest(theta, *k);
                let neighbours = tree.points().select(Axis(0), &idxs);
                neighbours
                    .t()
                    .cov(1.0)
                    .map_err(|e| AbcError::InvalidConfig(format!("KNN covariance: {e}")))
            }
            LocalCovariance::Olcm { mean, spread } => {
                let offset = mean - &theta;
                let bias = offset
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&offset.view().insert_axis(Axis(0)));
                Ok(spread + &bias)
            }
        }
    }

    fn perturbation(&self, theta: ArrayView1<f64>) -> Result<Cow<'_, MultivariateNormal>> {
        match self {
            LocalCovariance::Global { perturbation, .. } => Ok(Cow::Borrowed(perturbation)),
            _ => {
                let sigma = self.covariance(theta)?;
                MultivariateNormal::new(Array1::zeros(theta.len()), sigma.view()).map(Cow::Owned)
            }
        }
    }
}

/// Draws and accepts one particle for `slot`.
pub(crate) fn propose<M, F, R>(
    slot: usize,
    pool: &Population,
    covariance: &LocalCovariance,
    parents: &WeightedIndex<f64>,
    acceptance: &Acceptance<'_, M, F>,
    rng: &mut R,
) -> Result<SlotResult>
where
    M: Simulator,
    F: Distance<M::Output>,
    R: Rng + ?Sized,
{
    let mut attempts = 1;
    loop {
        let parent = pool.thetas.row(parents.sample(rng));
        let perturbation = covariance.perturbation(parent)?;
        let theta = &parent + &perturbation.sample(rng);
        if let Some(dist) = acceptance.test(theta.view())? {
            return Ok(SlotResult {
                theta,
                dist,
                attempts,
            });
        }
        acceptance.check_budget(slot, attempts)?;
        attempts += 1;
    }
}

/// Categorical distribution over the previous population's particles.
pub(crate) fn parent_sampler(pool: &Population) -> Result<WeightedIndex<f64>> {
    WeightedIndex::new(pool.ws.iter())
        .map_err(|e| AbcError::DegenerateWeights(format!("cannot resample parents: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn population(thetas: Array2<f64>, dists: Array2<f64>, ws: Array1<f64>) -> Population {
        Population {
            t: 0,
            eps: Threshold::Scalar(1.0),
            ratio: 1.0,
            thetas,
            dists,
            ws,
        }
    }

    fn line_population(n: usize) -> Population {
        let thetas = Array2::from_shape_fn((n, 2), |(i, j)| i as f64 * (j as f64 + 1.0) + 0.1 * (i % 3) as f64);
        let dists = Array2::from_shape_fn((n, 1), |(i, _)| i as f64 / n as f64);
        population(thetas, dists, Array1::from_elem(n, 1.0 / n as f64))
    }

    #[test]
    fn knn_needs_two_neighbours() {
        assert!(ProposalKernel::knn(1).is_err());
        assert_eq!(ProposalKernel::knn(3).unwrap(), ProposalKernel::Knn { k: 3 });
    }

    #[test]
    fn global_covariance_is_twice_weighted_covariance() {
        let pool = line_population(10);
        let prepared = ProposalKernel::Global.prepare(&pool, &Threshold::Scalar(1.0)).unwrap();
        let expected = weighted_covariance(pool.thetas.view(), pool.ws.view()).unwrap() * 2.0;
        let sigma = prepared.covariance(pool.thetas.row(0)).unwrap();
        assert_abs_diff_eq!(sigma, expected, epsilon = 1e-9);
        // Shared by every parent.
        assert_abs_diff_eq!(prepared.covariance(pool.thetas.row(7)).unwrap(), sigma, epsilon = 1e-12);
    }

    #[test]
    fn knn_covariance_uses_exactly_k_rows() {
        let k = 4;
        let small = line_population(12);
        let large = {
            // Same first 12 particles plus far-away ones that are never neighbours.
            let mut thetas = small.thetas.clone();
            for i in 0..30 {
                let row = arr2(&[[1000.0 + i as f64, -1000.0]]);
                thetas = ndarray::concatenate![Axis(0), thetas, row];
            }
            let n = thetas.nrows();
            population(thetas, Array2::zeros((n, 1)), Array1::from_elem(n, 1.0 / n as f64))
        };
        let parent = small.thetas.row(5).to_owned();

        let a = ProposalKernel::Knn { k }.prepare(&small, &Threshold::Scalar(1.0)).unwrap();
        let b = ProposalKernel::Knn { k }.prepare(&large, &Threshold::Scalar(1.0)).unwrap();
        let sigma_a = a.covariance(parent.view()).unwrap();
        let sigma_b = b.covariance(parent.view()).unwrap();
        assert_eq!(sigma_a.dim(), (2, 2));
        assert_abs_diff_eq!(sigma_a, sigma_b, epsilon = 1e-12);

        let tree = KdTree::new(small.thetas.view());
        let idxs = tree.nearest(parent.view(), k);
        assert_eq!(idxs.len(), k);
        let expected = small.thetas.select(Axis(0), &idxs).t().cov(1.0).unwrap();
        assert_abs_diff_eq!(sigma_a, expected, epsilon = 1e-12);
    }

    #[test]
    fn knn_rejects_k_above_population_size() {
        let pool = line_population(3);
        assert!(matches!(
            ProposalKernel::Knn { k: 5 }.prepare(&pool, &Threshold::Scalar(1.0)),
            Err(AbcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn olcm_recentres_on_the_parent() {
        let thetas = arr2(&[[0.0], [1.0], [2.0], [10.0]]);
        let dists = arr2(&[[0.1], [0.2], [0.3], [5.0]]);
        let ws = arr1(&[0.25, 0.25, 0.25, 0.25]);
        let pool = population(thetas, dists, ws);
        let prepared = ProposalKernel::Olcm.prepare(&pool, &Threshold::Scalar(0.5)).unwrap();

        // Filtered: {0, 1, 2} with weights 1/3, mean 1, spread 2/3.
        let at_mean = prepared.covariance(arr1(&[1.0]).view()).unwrap();
        assert_abs_diff_eq!(at_mean[[0, 0]], 2.0 / 3.0, epsilon = 1e-12);
        let off_mean = prepared.covariance(arr1(&[3.0]).view()).unwrap();
        assert_abs_diff_eq!(off_mean[[0, 0]], 2.0 / 3.0 + 4.0, epsilon = 1e-12);
    }

    #[test]
    fn olcm_falls_back_to_global_when_nothing_passes() {
        let pool = line_population(6);
        let prepared = ProposalKernel::Olcm.prepare(&pool, &Threshold::Scalar(-1.0)).unwrap();
        assert!(matches!(prepared, LocalCovariance::Global { .. }));
    }

    #[test]
    fn olcm_rejects_mismatched_eps_vector() {
        let pool = line_population(6);
        assert!(matches!(
            ProposalKernel::Olcm.prepare(&pool, &Threshold::from(vec![1.0, 1.0])),
            Err(AbcError::DimensionMismatch { expected: 1, got: 2, .. })
        ));
    }

    #[test]
    fn proposals_satisfy_the_threshold() {
        let pool = line_population(20);
        let eps = Threshold::Scalar(2.0);
        let sim = |theta: ArrayView1<f64>| theta[0];
        let dist = |x: &f64, y: &f64| (x - y).abs();
        let acceptance = Acceptance {
            simulator: &sim,
            distance: &dist,
            observed: &5.0,
            eps: &eps,
            max_attempts: None,
        };
        let parents = parent_sampler(&pool).unwrap();
        for kernel in [ProposalKernel::Global, ProposalKernel::Knn { k: 5 }, ProposalKernel::Olcm] {
            let prepared = kernel.prepare(&pool, &eps).unwrap();
            let mut rng = SmallRng::seed_from_u64(11);
            for slot in 0..10 {
                let result = propose(slot, &pool, &prepared, &parents, &acceptance, &mut rng).unwrap();
                assert!(result.dist[0] <= 2.0);
                assert!(result.attempts >= 1);
                assert_abs_diff_eq!(result.dist[0], (result.theta[0] - 5.0).abs(), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn capped_proposals_report_unreachable_thresholds() {
        let pool = line_population(5);
        let eps = Threshold::Scalar(-1.0);
        let sim = |theta: ArrayView1<f64>| theta[0];
        let dist = |x: &f64, y: &f64| (x - y).abs();
        let acceptance = Acceptance {
            simulator: &sim,
            distance: &dist,
            observed: &0.0,
            eps: &eps,
            max_attempts: Some(25),
        };
        let prepared = ProposalKernel::Global.prepare(&pool, &eps).unwrap();
        let parents = parent_sampler(&pool).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        let err = propose(3, &pool, &prepared, &parents, &acceptance, &mut rng).unwrap_err();
        assert!(matches!(err, AbcError::ThresholdUnreachable { slot: 3, attempts: 25 }));
    }
}
