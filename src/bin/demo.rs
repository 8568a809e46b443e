//! A small ABC-PMC demo: infers the mean of a 2D Gaussian from 200 noisy draws
//! without ever evaluating a likelihood.

use abc_pmc::distributions::TophatPrior;
use abc_pmc::kernel::ProposalKernel;
use abc_pmc::threshold::ExponentialEps;
use abc_pmc::Sampler;
use ndarray::{arr1, Array1, Array2, ArrayView1, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::error::Error;

const N_PARTICLES: usize = 500;
const N_DATA: usize = 200;
const SEED: u64 = 42;

fn draw(theta: ArrayView1<f64>, rng: &mut SmallRng) -> Array2<f64> {
    // Unit variance, so the parameter fully determines the distribution.
    Array2::from_shape_fn((N_DATA, theta.len()), |(_, j)| {
        theta[j] + rng.sample::<f64, _>(StandardNormal)
    })
}

/// Euclidean distance between the sample means of two datasets.
fn distance(simulated: &Array2<f64>, observed: &Array2<f64>) -> f64 {
    let (a, b) = match (simulated.mean_axis(Axis(0)), observed.mean_axis(Axis(0))) {
        (Some(a), Some(b)) => (a, b),
        _ => return f64::INFINITY,
    };
    (&a - &b).mapv(|d| d * d).sum().sqrt()
}

fn main() -> Result<(), Box<dyn Error>> {
    let truth = arr1(&[1.0, -0.5]);
    let observed = draw(truth.view(), &mut SmallRng::seed_from_u64(SEED));

    // The simulator has to be a pure function of theta; derive its noise from theta.
    let simulator = |theta: ArrayView1<f64>| {
        let bits = theta.iter().fold(0u64, |acc, x| acc.rotate_left(17) ^ x.to_bits());
        draw(theta, &mut SmallRng::seed_from_u64(bits))
    };

    let prior = TophatPrior::new(Array1::from_elem(2, -5.0), Array1::from_elem(2, 5.0))?;
    let mut sampler = Sampler::new(N_PARTICLES, observed, simulator, distance)?
        .with_kernel(ProposalKernel::Olcm)
        .set_seed(SEED)
        .with_threads(4)?
        .with_progress(true);

    for pool in sampler.sample(prior, ExponentialEps::new(8, 2.0, 0.05)?) {
        let pool = pool?;
        let summary = pool.summary()?;
        println!(
            "t={} eps={} ratio={:.3} mean={:.3} std={:.3}",
            pool.t, pool.eps, pool.ratio, summary.mean, summary.std
        );
    }
    println!("true mean: {:.3}", truth);

    sampler.close();
    Ok(())
}
