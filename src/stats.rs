//! Weighted statistics over particle populations.
//!
//! Rows are observations and each observation carries one non-negative weight.
//! Weights need not be normalized.

use ndarray::prelude::*;
use ndarray::{Dimension, RemoveAxis};

use crate::error::{AbcError, Result};

/// Computes the bias-corrected weighted covariance of `values` (N × D).
///
/// With `m` the weighted column mean and `c = Σw / ((Σw)² − Σw²)`,
/// ```text
/// Σ[j, k] = c · Σ_i w_i (x[i, j] − m_j)(x[i, k] − m_k)
/// ```
/// For uniform weights this reduces to the usual unbiased sample covariance.
///
/// # Errors
///
/// Returns [`AbcError::DegenerateWeights`] when `(Σw)² == Σw²`, which happens
/// whenever fewer than two weights are non-zero, and
/// [`AbcError::DimensionMismatch`] when `weights.len() != values.nrows()`.
pub fn weighted_covariance(values: ArrayView2<f64>, weights: ArrayView1<f64>) -> Result<Array2<f64>> {
    let (n, dim) = values.dim();
    if weights.len() != n {
        return Err(AbcError::DimensionMismatch {
            what: "weights",
            expected: n,
            got: weights.len(),
        });
    }
    let w_sum = weights.sum();
    let w_sq_sum = weights.dot(&weights);
    let denom = w_sum * w_sum - w_sq_sum;
    if denom == 0.0 || !denom.is_finite() {
        return Err(AbcError::DegenerateWeights(format!(
            "bias correction undefined: (sum w)^2 - sum w^2 = {denom}"
        )));
    }
    let correction = w_sum / denom;

    let mean = weighted_column_mean(values, weights, w_sum);
    let centered = &values - &mean.insert_axis(Axis(0));
    let weighted = &centered * &weights.insert_axis(Axis(1));
    let sigma = weighted.t().dot(&centered) * correction;

    debug_assert_eq!(sigma.dim(), (dim, dim));
    Ok(sigma)
}

fn weighted_column_mean(values: ArrayView2<f64>, weights: ArrayView1<f64>, w_sum: f64) -> Array1<f64> {
    weights.dot(&values) / w_sum
}

/// Weighted mean and standard deviation over every element of `values`.
///
/// `weights` must have the same shape as `values`. The variance is the
/// weighted average of squared deviations (no bias correction), so uniform
/// weights give the population standard deviation.
pub fn weighted_mean_and_std<D: Dimension>(
    values: ArrayView<f64, D>,
    weights: ArrayView<f64, D>,
) -> Result<(f64, f64)> {
    if values.shape() != weights.shape() {
        return Err(AbcError::DimensionMismatch {
            what: "weights",
            expected: values.len(),
            got: weights.len(),
        });
    }
    let w_sum = checked_weight_sum(weights.sum())?;
    let mean = values
        .iter()
        .zip(weights.iter())
        .map(|(x, w)| x * w)
        .sum::<f64>()
        / w_sum;
    let variance = values
        .iter()
        .zip(weights.iter())
        .map(|(x, w)| w * (x - mean).powi(2))
        .sum::<f64>()
        / w_sum;
    Ok((mean, variance.sqrt()))
}

/// Weighted mean and standard deviation reduced along `axis`.
///
/// `weights` holds one entry per lane along `axis` and is broadcast over the
/// remaining dimensions. See [`weighted_mean_and_std`] for the estimator.
pub fn weighted_mean_and_std_axis<D>(
    values: ArrayView<f64, D>,
    weights: ArrayView1<f64>,
    axis: Axis,
) -> Result<(Array<f64, D::Smaller>, Array<f64, D::Smaller>)>
where
    D: Dimension + RemoveAxis,
{
    let n = values.len_of(axis);
    if weights.len() != n {
        return Err(AbcError::DimensionMismatch {
            what: "weights",
            expected: n,
            got: weights.len(),
        });
    }
    let w_sum = checked_weight_sum(weights.sum())?;

    let reduced_dim = values.raw_dim().remove_axis(axis);
    let mut mean = Array::<f64, D::Smaller>::zeros(reduced_dim.clone());
    for (lane, &w) in values.axis_iter(axis).zip(weights.iter()) {
        mean.scaled_add(w, &lane);
    }
    mean /= w_sum;

    let mut variance = Array::<f64, D::Smaller>::zeros(reduced_dim);
    for (lane, &w) in values.axis_iter(axis).zip(weights.iter()) {
        let sq_dev = (&lane - &mean).mapv(|x| x * x);
        variance.scaled_add(w, &sq_dev);
    }
    variance /= w_sum;

    Ok((mean, variance.mapv(f64::sqrt)))
}

fn checked_weight_sum(w_sum: f64) -> Result<f64> {
    if w_sum > 0.0 && w_sum.is_finite() {
        Ok(w_sum)
    } else {
        Err(AbcError::DegenerateWeights(format!(
            "weights must have a positive finite sum, got {w_sum}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_stats::CorrelationExt;

    #[test]
    fn uniform_weights_match_sample_covariance() {
        let values = arr2(&[
            [1.0, 2.0],
            [2.0, 1.5],
            [3.0, 4.0],
            [4.0, 3.0],
            [0.5, 0.0],
            [2.5, 2.5],
        ]);
        let weights = Array1::from_elem(6, 1.0 / 6.0);
        let sigma = weighted_covariance(values.view(), weights.view()).unwrap();
        let reference = values.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(sigma, reference, epsilon = 1e-12);
    }

    #[test]
    fn covariance_is_symmetric() {
        let values = arr2(&[[0.1, 1.0, -2.0], [0.3, 0.2, 1.0], [1.7, -0.4, 0.0], [0.9, 0.9, 0.5]]);
        let weights = arr1(&[0.1, 0.4, 0.3, 0.2]);
        let sigma = weighted_covariance(values.view(), weights.view()).unwrap();
        assert_abs_diff_eq!(sigma, sigma.t().to_owned(), epsilon = 1e-14);
    }

    #[test]
    fn covariance_ignores_weight_scale() {
        let values = arr2(&[[1.0], [2.0], [4.0]]);
        let a = weighted_covariance(values.view(), arr1(&[1.0, 2.0, 1.0]).view()).unwrap();
        let b = weighted_covariance(values.view(), arr1(&[0.25, 0.5, 0.25]).view()).unwrap();
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }

    #[test]
    fn single_nonzero_weight_is_degenerate() {
        let values = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let weights = arr1(&[1.0, 0.0]);
        let err = weighted_covariance(values.view(), weights.view()).unwrap_err();
        assert!(matches!(err, AbcError::DegenerateWeights(_)));
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let values = arr2(&[[1.0], [3.0]]);
        let weights = arr1(&[0.5, 0.25, 0.25]);
        assert!(matches!(
            weighted_covariance(values.view(), weights.view()),
            Err(AbcError::DimensionMismatch { expected: 2, got: 3, .. })
        ));
    }

    #[test]
    fn flat_mean_and_std_use_population_variance() {
        let values = arr1(&[1.0, 2.0, 3.0, 4.0]);
        let weights = Array1::from_elem(4, 1.0);
        let (mean, std) = weighted_mean_and_std(values.view(), weights.view()).unwrap();
        assert_abs_diff_eq!(mean, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(std, 1.25f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn axis_reduction_matches_flat_per_column() {
        let values = arr2(&[[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]]);
        let weights = arr1(&[0.1, 0.2, 0.3, 0.4]);
        let (mean, std) = weighted_mean_and_std_axis(values.view(), weights.view(), Axis(0)).unwrap();
        for (j, column) in values.axis_iter(Axis(1)).enumerate() {
            let (m, s) = weighted_mean_and_std(column, weights.view()).unwrap();
            assert_abs_diff_eq!(mean[j], m, epsilon = 1e-12);
            assert_abs_diff_eq!(std[j], s, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(mean[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_weights_are_rejected() {
        let values = arr1(&[1.0, 2.0]);
        let weights = arr1(&[0.0, 0.0]);
        assert!(weighted_mean_and_std(values.view(), weights.view()).is_err());
    }
}
