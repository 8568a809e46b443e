//! The per-iteration particle population handed to the caller.

use ndarray::prelude::*;

use crate::error::{AbcError, Result};
use crate::stats::weighted_mean_and_std_axis;
use crate::threshold::Threshold;

/// One iteration's weighted particle population.
///
/// Created by the sampler at the end of an iteration and never modified by it
/// afterwards. The sampler only keeps the latest population to build the next one;
/// keeping history is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    /// Iteration index, 0 for the rejection bootstrap.
    pub t: usize,
    /// Threshold every particle of this iteration was accepted under.
    pub eps: Threshold,
    /// Acceptance efficiency: N / total simulator calls, in (0, 1].
    pub ratio: f64,
    /// Particle positions, N × D.
    pub thetas: Array2<f64>,
    /// Discrepancy of each particle, N × K (K = 1 for scalar distances).
    pub dists: Array2<f64>,
    /// Normalized importance weights, length N.
    pub ws: Array1<f64>,
}

/// Posterior summary of a population.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl Population {
    /// Number of particles N.
    pub fn n(&self) -> usize {
        self.thetas.nrows()
    }

    /// Parameter dimensionality D.
    pub fn dim(&self) -> usize {
        self.thetas.ncols()
    }

    /// Weighted per-dimension mean and standard deviation of the particles.
    pub fn summary(&self) -> Result<Summary> {
        let (mean, std) = weighted_mean_and_std_axis(self.thetas.view(), self.ws.view(), Axis(0))?;
        Ok(Summary { mean, std })
    }
}

#[derive(Debug)]
pub(crate) struct SlotResult {
    pub theta: Array1<f64>,
    pub dist: Array1<f64>,
    pub attempts: u64,
}

/// Stacks per-slot results (in slot order) into the population matrices.
///
/// Every slot must report a parameter vector and a discrepancy of the same
/// length as slot 0. Returns `(thetas, dists, total_attempts)`.
pub(crate) fn stack_slots(results: Vec<SlotResult>) -> Result<(Array2<f64>, Array2<f64>, u64)> {
    let n = results.len();
    let dim = results.first().map_or(0, |r| r.theta.len());
    let n_dist = results.first().map_or(0, |r| r.dist.len());
    let mut thetas = Array2::<f64>::zeros((n, dim));
    let mut dists = Array2::<f64>::zeros((n, n_dist));
    let mut total = 0;
    for (i, result) in results.into_iter().enumerate() {
        if result.theta.len() != dim {
            return Err(AbcError::DimensionMismatch {
                what: "parameter",
                expected: dim,
                got: result.theta.len(),
            });
        }
        if result.dist.len() != n_dist {
            return Err(AbcError::DimensionMismatch {
                what: "distance",
                expected: n_dist,
                got: result.dist.len(),
            });
        }
        thetas.row_mut(i).assign(&result.theta);
        dists.row_mut(i).assign(&result.dist);
        total += result.attempts;
    }
    Ok((thetas, dists, total))
}
