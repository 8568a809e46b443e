//! The simulator and distance capabilities the sampler consumes.
//!
//! Plain closures implement both traits. Implement the traits directly on a
//! type when the simulation can fail; the error is handed back to the caller
//! of the iteration unchanged.

use ndarray::prelude::*;

use crate::error::{AbcError, BoxError, Result};
use crate::threshold::Threshold;

/// Generates a synthetic dataset for a parameter vector `theta`.
pub trait Simulator: Sync {
    type Output;

    fn simulate(&self, theta: ArrayView1<f64>) -> Result<Self::Output, BoxError>;
}

impl<F, X> Simulator for F
where
    F: Fn(ArrayView1<f64>) -> X + Sync,
{
    type Output = X;

    fn simulate(&self, theta: ArrayView1<f64>) -> Result<X, BoxError> {
        Ok(self(theta))
    }
}

/// Discrepancy between a simulated and the observed dataset.
///
/// The result holds one non-negative value per component; a scalar distance
/// is a vector of length one.
pub trait Distance<X>: Sync {
    fn distance(&self, simulated: &X, observed: &X) -> Result<Array1<f64>, BoxError>;
}

impl<F, X, D> Distance<X> for F
where
    F: Fn(&X, &X) -> D + Sync,
    D: IntoDiscrepancy,
{
    fn distance(&self, simulated: &X, observed: &X) -> Result<Array1<f64>, BoxError> {
        Ok(self(simulated, observed).into_discrepancy())
    }
}

/// Values a distance closure may return.
pub trait IntoDiscrepancy {
    fn into_discrepancy(self) -> Array1<f64>;
}

impl IntoDiscrepancy for f64 {
    fn into_discrepancy(self) -> Array1<f64> {
        arr1(&[self])
    }
}

impl IntoDiscrepancy for Vec<f64> {
    fn into_discrepancy(self) -> Array1<f64> {
        Array1::from(self)
    }
}

impl IntoDiscrepancy for Array1<f64> {
    fn into_discrepancy(self) -> Array1<f64> {
        self
    }
}

impl<const K: usize> IntoDiscrepancy for [f64; K] {
    fn into_discrepancy(self) -> Array1<f64> {
        Array1::from(self.to_vec())
    }
}

/// Everything a particle slot needs to test a candidate against the data.
pub(crate) struct Acceptance<'a, M: Simulator, F> {
    pub simulator: &'a M,
    pub distance: &'a F,
    pub observed: &'a M::Output,
    pub eps: &'a Threshold,
    pub max_attempts: Option<u64>,
}

impl<M, F> Acceptance<'_, M, F>
where
    M: Simulator,
    F: Distance<M::Output>,
{
    /// Simulates `theta` and returns its discrepancy when it is within `eps`.
    pub fn test(&self, theta: ArrayView1<f64>) -> Result<Option<Array1<f64>>> {
        let simulated = self.simulator.simulate(theta).map_err(AbcError::Simulation)?;
        let dist = self
            .distance
            .distance(&simulated, self.observed)
            .map_err(AbcError::Simulation)?;
        self.eps.check_dim(dist.len())?;
        Ok(self.eps.accepts(dist.view()).then_some(dist))
    }

    /// Fails once `attempts` has used up the optional budget.
    pub fn check_budget(&self, slot: usize, attempts: u64) -> Result<()> {
        match self.max_attempts {
            Some(max) if attempts >= max => Err(AbcError::ThresholdUnreachable { slot, attempts }),
            _ => Ok(()),
        }
    }
}
