//! Likelihood-free Bayesian inference with Approximate Bayesian Computation and
//! Population Monte Carlo (ABC-PMC).

mod bootstrap;
pub mod distributions;
pub mod error;
pub mod executor;
pub mod kernel;
pub mod model;
pub mod neighbors;
pub mod population;
pub mod rng;
pub mod sampler;
pub mod stats;
pub mod threshold;
pub mod weights;

pub use error::{AbcError, Result};
pub use population::Population;
pub use sampler::Sampler;
