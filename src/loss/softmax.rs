//! Softmax cross-entropy loss

use ndarray::{Array2, Axis};
use tracing::debug;

use super::validate_labels;
use crate::error::Result;

/// Loss and gradient for softmax classification
///
/// # Arguments
/// * `x` - Scores of shape `(N, C)`
/// * `y` - Labels, `0 <= y[i] < C`
///
/// # Returns
/// `(loss, dx)` where `loss = -mean(log softmax(x)[i, y[i]])`
pub fn softmax_loss(x: &Array2<f64>, y: &[usize]) -> Result<(f64, Array2<f64>)> {
    validate_labels(x, y)?;

    let n = x.nrows();
    let mut loss = 0.0;
    let mut dx = Array2::zeros(x.raw_dim());

    for ((row, mut grad), &label) in x
        .axis_iter(Axis(0))
        .zip(dx.axis_iter_mut(Axis(0)))
        .zip(y)
    {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let shifted = row.mapv(|v| v - max);
        let sum_exp = shifted.mapv(f64::exp).sum();
        let log_sum_exp = sum_exp.ln();

        loss += log_sum_exp - shifted[label];

        grad.assign(&shifted.mapv(|v| v.exp() / sum_exp));
        grad[label] -= 1.0;
    }

    let scale = 1.0 / n as f64;
    dx.mapv_inplace(|g| g * scale);
    let loss = loss * scale;

    debug!(n, classes = x.ncols(), loss, "softmax loss");

    Ok((loss, dx))
}
