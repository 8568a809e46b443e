//! Acceptance thresholds and threshold schedules.
//!
//! A schedule is any iterator of [`Threshold`]s. The sampler pulls the first
//! element for the rejection bootstrap and then one element per iteration until
//! the iterator ends, so an infinite iterator keeps the sampler going forever.

use ndarray::prelude::*;
use std::fmt;

use crate::error::{AbcError, Result};

/// Maximum admissible discrepancy for a particle to be accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    /// Applies to every component of the discrepancy.
    Scalar(f64),
    /// Componentwise bound; its length must equal the distance dimensionality.
    Vector(Array1<f64>),
}

impl Threshold {
    /// Fails when a vector threshold does not match `n_components` discrepancy values.
    pub fn check_dim(&self, n_components: usize) -> Result<()> {
        match self {
            Threshold::Scalar(_) => Ok(()),
            Threshold::Vector(eps) if eps.len() == n_components => Ok(()),
            Threshold::Vector(eps) => Err(AbcError::DimensionMismatch {
                what: "threshold vs. distance",
                expected: n_components,
                got: eps.len(),
            }),
        }
    }

    /// The acceptance predicate: every component of `dist` is `<=` its bound.
    ///
    /// Call [`Threshold::check_dim`] first; mismatched lengths are never accepted.
    pub fn accepts(&self, dist: ArrayView1<f64>) -> bool {
        match self {
            Threshold::Scalar(eps) => dist.iter().all(|d| d <= eps),
            Threshold::Vector(eps) => {
                eps.len() == dist.len() && dist.iter().zip(eps.iter()).all(|(d, e)| d <= e)
            }
        }
    }
}

impl From<f64> for Threshold {
    fn from(eps: f64) -> Self {
        Threshold::Scalar(eps)
    }
}

impl From<Vec<f64>> for Threshold {
    fn from(eps: Vec<f64>) -> Self {
        Threshold::Vector(Array1::from(eps))
    }
}

impl From<Array1<f64>> for Threshold {
    fn from(eps: Array1<f64>) -> Self {
        Threshold::Vector(eps)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Scalar(eps) => write!(f, "{eps:.4}"),
            Threshold::Vector(eps) => {
                write!(f, "[")?;
                for (i, e) in eps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e:.4}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Repeats the same threshold `t` times.
#[derive(Debug, Clone)]
pub struct ConstEps {
    remaining: usize,
    eps: Threshold,
}

impl ConstEps {
    pub fn new(t: usize, eps: impl Into<Threshold>) -> Self {
        Self {
            remaining: t,
            eps: eps.into(),
        }
    }
}

impl Iterator for ConstEps {
    type Item = Threshold;

    fn next(&mut self) -> Option<Threshold> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.eps.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ConstEps {}

/// Yields an explicit list of thresholds in order.
#[derive(Debug, Clone)]
pub struct ListEps {
    inner: std::vec::IntoIter<Threshold>,
}

impl ListEps {
    pub fn new<T: Into<Threshold>>(eps: impl IntoIterator<Item = T>) -> Self {
        let list: Vec<Threshold> = eps.into_iter().map(Into::into).collect();
        Self {
            inner: list.into_iter(),
        }
    }
}

impl Iterator for ListEps {
    type Item = Threshold;

    fn next(&mut self) -> Option<Threshold> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ListEps {}

/// `t` scalar thresholds evenly spaced from `max` down to `min` (both included).
#[derive(Debug, Clone)]
pub struct LinearEps {
    inner: std::vec::IntoIter<f64>,
}

impl LinearEps {
    pub fn new(t: usize, max: f64, min: f64) -> Result<Self> {
        if !(max.is_finite() && min.is_finite()) {
            return Err(AbcError::InvalidConfig(format!(
                "linear schedule bounds must be finite, got max={max} min={min}"
            )));
        }
        Ok(Self {
            inner: Array1::linspace(max, min, t).to_vec().into_iter(),
        })
    }
}

impl Iterator for LinearEps {
    type Item = Threshold;

    fn next(&mut self) -> Option<Threshold> {
        self.inner.next().map(Threshold::Scalar)
    }
}

/// `t` scalar thresholds spaced evenly on a log scale from `max` down to `min`.
#[derive(Debug, Clone)]
pub struct ExponentialEps {
    inner: std::vec::IntoIter<f64>,
}

impl ExponentialEps {
    pub fn new(t: usize, max: f64, min: f64) -> Result<Self> {
        if !(max > 0.0 && min > 0.0 && max.is_finite() && min.is_finite()) {
            return Err(AbcError::InvalidConfig(format!(
                "exponential schedule bounds must be positive and finite, got max={max} min={min}"
            )));
        }
        let exps = Array1::linspace(max.log10(), min.log10(), t);
        Ok(Self {
            inner: exps.mapv(|e| 10f64.powf(e)).to_vec().into_iter(),
        })
    }
}

impl Iterator for ExponentialEps {
    type Item = Threshold;

    fn next(&mut self) -> Option<Threshold> {
        self.inner.next().map(Threshold::Scalar)
    }
}
