//! Plain ABC rejection sampling for the first population.

use rand::Rng;

use crate::distributions::Prior;
use crate::error::Result;
use crate::model::{Acceptance, Distance, Simulator};
use crate::population::SlotResult;

/// Draws from the prior until one candidate is accepted.
///
/// The returned attempt count includes the accepted draw, so it is at least 1.
pub(crate) fn rejection_sample<P, M, F, R>(
    slot: usize,
    prior: &P,
    acceptance: &Acceptance<'_, M, F>,
    rng: &mut R,
) -> Result<SlotResult>
where
    P: Prior,
    M: Simulator,
    F: Distance<M::Output>,
    R: Rng + ?Sized,
{
    let mut attempts = 1;
    loop {
        let theta = prior.sample(rng);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::TophatPrior;
    use crate::error::{AbcError, BoxError};
    use crate::threshold::Threshold;
    use ndarray::prelude::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn accepted_particles_are_within_eps() {
        let prior = TophatPrior::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let sim = |theta: ArrayView1<f64>| theta[0];
        let dist = |x: &f64, y: &f64| (x - y).abs();
        let eps = Threshold::Scalar(0.05);
        let acceptance = Acceptance {
            simulator: &sim,
            distance: &dist,
            observed: &0.5,
            eps: &eps,
            max_attempts: None,
        };
        let mut rng = SmallRng::seed_from_u64(42);
        let mut total = 0;
        for slot in 0..50 {
            let result = rejection_sample(slot, &prior, &acceptance, &mut rng).unwrap();
            assert!(result.dist[0] <= 0.05);
            assert!((0.45..=0.55).contains(&result.theta[0]));
            total += result.attempts;
        }
        // Acceptance probability is 0.1, so 50 particles need far more than 50 draws.
        assert!(total > 100);
    }

    struct Broken;

    impl Simulator for Broken {
        type Output = f64;

        fn simulate(&self, _theta: ArrayView1<f64>) -> std::result::Result<f64, BoxError> {
            Err("no data".into())
        }
    }

    #[test]
    fn simulator_errors_propagate() {
        let prior = TophatPrior::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let dist = |x: &f64, y: &f64| (x - y).abs();
        let eps = Threshold::Scalar(1.0);
        let acceptance = Acceptance {
            simulator: &Broken,
            distance: &dist,
            observed: &0.5,
            eps: &eps,
            max_attempts: None,
        };
        let mut rng = SmallRng::seed_from_u64(0);
        let err = rejection_sample(0, &prior, &acceptance, &mut rng).unwrap_err();
        assert!(matches!(err, AbcError::Simulation(_)));
    }
}
