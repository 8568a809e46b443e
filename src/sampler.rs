/*!
# ABC-PMC sampler

[`Sampler`] holds the fixed part of a run: population size, observed data,
simulator, distance, proposal kernel, executor and master seed. Calling
[`Sampler::sample`] with a prior and a threshold schedule returns an
[`Iterations`] iterator which yields one [`Population`] per threshold:

- the first threshold runs plain rejection sampling from the prior with uniform weights,
- every later threshold perturbs particles of the previous population
  with the configured [`ProposalKernel`] and reweights them by importance sampling.

Every population is complete before the next one starts. The iterator stops when
the schedule runs out, or after yielding the first error.

## Example

```rust
use abc_pmc::distributions::TophatPrior;
use abc_pmc::sampler::Sampler;
use abc_pmc::threshold::LinearEps;
use ndarray::{arr1, ArrayView1};

let simulator = |theta: ArrayView1<f64>| theta[0];
let distance = |x: &f64, y: &f64| (x - y).abs();
let prior = TophatPrior::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
let sampler = Sampler::new(100, 0.3, simulator, distance).unwrap().set_seed(42);

for pool in sampler.sample(prior, LinearEps::new(3, 0.5, 0.1).unwrap()) {
    let pool = pool.unwrap();
    assert!((pool.ws.sum() - 1.0).abs() < 1e-9);
    assert!(pool.dists.rows().into_iter().all(|d| pool.eps.accepts(d)));
}
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use rand::{thread_rng, Rng};
use std::iter::FusedIterator;
use std::mem;

use crate::bootstrap::rejection_sample;
use crate::distributions::Prior;
use crate::error::{AbcError, Result};
use crate::executor::{Executor, ParallelMap};
use crate::kernel::{parent_sampler, propose, ProposalKernel};
use crate::model::{Acceptance, Distance, Simulator};
use crate::population::{stack_slots, Population, SlotResult};
use crate::rng::slot_rng;
use crate::threshold::Threshold;
use crate::weights::{normalize_weights, ImportanceWeighter};

/// Configured ABC-PMC engine.
pub struct Sampler<M: Simulator, F, E = Executor> {
    /// Number of particles per population.
    pub n: usize,
    pub observed: M::Output,
    simulator: M,
    distance: F,
    kernel: ProposalKernel,
    executor: E,
    /// Master seed every per-slot stream derives from.
    pub seed: u64,
    max_attempts: Option<u64>,
    show_progress: bool,
}

impl<M, F> Sampler<M, F>
where
    M: Simulator,
    M::Output: Sync,
    F: Distance<M::Output>,
{
    /// Creates a sequential sampler with the global kernel and a random master seed.
    ///
    /// A single particle is enough for the rejection bootstrap, but PMC iterations
    /// need `n >= 2` to estimate a covariance; with `n == 1` the first PMC
    /// iteration fails with [`AbcError::InvalidConfig`].
    pub fn new(n: usize, observed: M::Output, simulator: M, distance: F) -> Result<Self> {
        if n == 0 {
            return Err(AbcError::InvalidConfig(
                "population size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            n,
            observed,
            simulator,
            distance,
            kernel: ProposalKernel::default(),
            executor: Executor::Sequential,
            seed: thread_rng().gen::<u64>(),
            max_attempts: None,
            show_progress: false,
        })
    }
}

impl<M, F, E> Sampler<M, F, E>
where
    M: Simulator,
    M::Output: Sync,
    F: Distance<M::Output>,
    E: ParallelMap,
{
    pub fn with_kernel(mut self, kernel: ProposalKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Replaces the executor with an owned pool of `threads` workers (1 means sequential).
    pub fn with_threads(self, threads: usize) -> Result<Sampler<M, F, Executor>> {
        Ok(self.with_executor(Executor::with_threads(threads)?))
    }

    /// Runs slots on any executor, e.g. [`Executor::Shared`] or a custom [`ParallelMap`].
    pub fn with_executor<E2: ParallelMap>(mut self, executor: E2) -> Sampler<M, F, E2> {
        self.executor.close();
        Sampler {
            n: self.n,
            observed: self.observed,
            simulator: self.simulator,
            distance: self.distance,
            kernel: self.kernel,
            executor,
            seed: self.seed,
            max_attempts: self.max_attempts,
            show_progress: self.show_progress,
        }
    }

    /// Sets the master seed. Runs with the same seed produce the same populations
    /// whatever executor they use.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Caps the simulations a single slot may spend on one particle.
    ///
    /// Without a cap an unreachable threshold blocks forever; with one, the
    /// iteration fails with [`AbcError::ThresholdUnreachable`].
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Result<Self> {
        if max_attempts == 0 {
            return Err(AbcError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        self.max_attempts = Some(max_attempts);
        Ok(self)
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn kernel(&self) -> ProposalKernel {
        self.kernel
    }

    /// Releases the worker pool if the sampler owns one. Safe to call repeatedly
    /// and on samplers that never ran.
    pub fn close(&mut self) {
        self.executor.close();
    }

    /// Starts a run. The first threshold of `schedule` is used for the rejection
    /// bootstrap, each further one for a PMC iteration.
    pub fn sample<P, S>(&self, prior: P, schedule: S) -> Iterations<'_, M, F, E, P, S::IntoIter>
    where
        P: Prior,
        S: IntoIterator,
        S::Item: Into<Threshold>,
    {
        log::debug!(
            "starting ABC-PMC run: N={}, kernel={:?}, seed={}",
            self.n,
            self.kernel,
            self.seed
        );
        Iterations {
            sampler: self,
            prior,
            schedule: schedule.into_iter(),
            state: State::Bootstrapping,
        }
    }

    fn acceptance<'a>(&'a self, eps: &'a Threshold) -> Acceptance<'a, M, F> {
        Acceptance {
            simulator: &self.simulator,
            distance: &self.distance,
            observed: &self.observed,
            eps,
            max_attempts: self.max_attempts,
        }
    }

    fn progress_bar(&self, t: usize, eps: &Threshold) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(self.n as u64);
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        pb.set_style(style);
        pb.set_prefix(format!("t={t}"));
        pb.set_message(format!("eps={eps}"));
        pb
    }

    /// Fans `slot_work` out over all slots and collects the accepted particles in slot order.
    fn run_slots<W>(&self, t: usize, eps: &Threshold, slot_work: W) -> Result<(Population, u64)>
    where
        W: Fn(usize) -> Result<SlotResult> + Sync + Send,
    {
        let pb = self.progress_bar(t, eps);
        let results = self.executor.map(self.n, |slot| {
            let result = slot_work(slot);
            pb.inc(1);
            result
        });
        pb.finish_and_clear();

        let results = results.into_iter().collect::<Result<Vec<_>>>()?;
        let (thetas, dists, attempts) = stack_slots(results)?;
        let n = thetas.nrows();
        Ok((
            Population {
                t,
                eps: eps.clone(),
                ratio: n as f64 / attempts as f64,
                thetas,
                dists,
                ws: ndarray::Array1::from_elem(n, 1.0 / n as f64),
            },
            attempts,
        ))
    }

    fn bootstrap<P: Prior>(&self, prior: &P, eps: Threshold) -> Result<Population> {
        let acceptance = self.acceptance(&eps);
        let seed = self.seed;
        let (pool, attempts) = self.run_slots(0, &eps, |slot| {
            let mut rng = slot_rng(seed, 0, slot);
            rejection_sample(slot, prior, &acceptance, &mut rng)
        })?;
        log::debug!("bootstrap accepted {} particles in {} simulations", pool.n(), attempts);
        Ok(pool)
    }

    fn iterate<P: Prior>(&self, prior: &P, previous: &Population, eps: Threshold) -> Result<Population> {
        let t = previous.t + 1;
        if previous.n() < 2 {
            return Err(AbcError::InvalidConfig(format!(
                "PMC iterations need at least 2 particles, got N={}",
                previous.n()
            )));
        }
        let covariance = self.kernel.prepare(previous, &eps)?;
        let parents = parent_sampler(previous)?;
        let acceptance = self.acceptance(&eps);
        let seed = self.seed;
        let (mut pool, attempts) = self.run_slots(t, &eps, |slot| {
            let mut rng = slot_rng(seed, t, slot);
            propose(slot, previous, &covariance, &parents, &acceptance, &mut rng)
        })?;
        log::debug!("t={t}: accepted {} particles in {} simulations", pool.n(), attempts);

        let weighter = ImportanceWeighter::new(prior, previous)?;
        let thetas = &pool.thetas;
        let raw = self.executor.map(pool.n(), |i| weighter.weight(thetas.row(i)));
        pool.ws = normalize_weights(raw)?;
        Ok(pool)
    }
}

enum State {
    Bootstrapping,
    Iterating(Population),
    Exhausted,
}

/// Lazily runs one ABC-PMC iteration per threshold.
///
/// Yields `Err` at most once; the iterator is exhausted afterwards.
pub struct Iterations<'a, M: Simulator, F, E, P, S> {
    sampler: &'a Sampler<M, F, E>,
    prior: P,
    schedule: S,
    state: State,
}

impl<M: Simulator, F, E, P, S> Iterations<'_, M, F, E, P, S> {
    /// Index of the population the next call to `next` will produce.
    pub fn next_t(&self) -> Option<usize> {
        match &self.state {
            State::Bootstrapping => Some(0),
            State::Iterating(pool) => Some(pool.t + 1),
            State::Exhausted => None,
        }
    }
}

impl<M, F, E, P, S> Iterator for Iterations<'_, M, F, E, P, S>
where
    M: Simulator,
    M::Output: Sync,
    F: Distance<M::Output>,
    E: ParallelMap,
    P: Prior,
    S: Iterator,
    S::Item: Into<Threshold>,
{
    type Item = Result<Population>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match mem::replace(&mut self.state, State::Exhausted) {
            State::Exhausted => return None,
            State::Bootstrapping => match self.schedule.next() {
                Some(eps) => self.sampler.bootstrap(&self.prior, eps.into()),
                None => Err(AbcError::InvalidConfig(
                    "threshold schedule is empty".to_string(),
                )),
            },
            State::Iterating(previous) => {
                let eps = self.schedule.next()?;
                self.sampler.iterate(&self.prior, &previous, eps.into())
            }
        };
        match result {
            Ok(pool) => {
                log::info!("t={}: eps={}, ratio={:.4}", pool.t, pool.eps, pool.ratio);
                self.state = State::Iterating(pool.clone());
                Some(Ok(pool))
            }
            Err(e) => {
                log::error!("ABC-PMC run aborted: {e}");
                Some(Err(e))
            }
        }
    }
}

impl<M, F, E, P, S> FusedIterator for Iterations<'_, M, F, E, P, S>
where
    M: Simulator,
    M::Output: Sync,
    F: Distance<M::Output>,
    E: ParallelMap,
    P: Prior,
    S: Iterator,
    S::Item: Into<Threshold>,
{
}
