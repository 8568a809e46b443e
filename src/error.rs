//! Error type shared by every stage of the sampler.

use thiserror::Error;

/// Boxed error produced by user-supplied simulators and distance functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum AbcError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("degenerate weights: {0}")]
    DegenerateWeights(String),
    #[error("threshold unreachable: slot {slot} gave up after {attempts} attempts")]
    ThresholdUnreachable { slot: usize, attempts: u64 },
    #[error("simulation failed: {0}")]
    Simulation(#[source] BoxError),
}

/// Convenience type for `Result<T, AbcError>`.
pub type Result<T, E = AbcError> = std::result::Result<T, E>;
