//! Multiclass SVM (hinge) loss

use ndarray::Array2;
use tracing::debug;

use super::validate_labels;
use crate::error::Result;

/// Hinge margin between a class score and the correct class score
const MARGIN: f64 = 1.0;

/// Loss and gradient for multiclass SVM classification
///
/// # Arguments
/// * `x` - Scores of shape `(N, C)`, `x[[i, j]]` is the score of class `j` for sample `i`
/// * `y` - Labels, `y[i]` is the class of sample `i` with `0 <= y[i] < C`
///
/// # Returns
/// `(loss, dx)` where `dx` has the shape of `x`
pub fn svm_loss(x: &Array2<f64>, y: &[usize]) -> Result<(f64, Array2<f64>)> {
    validate_labels(x, y)?;

    let n = x.nrows();
    let mut loss = 0.0;
    let mut dx = Array2::zeros(x.raw_dim());

    for (i, (row, &label)) in x.rows().into_iter().zip(y).enumerate() {
        let correct = row[label];
        let mut positive = 0usize;

        for (j, &score) in row.iter().enumerate() {
            if j == label {
                continue;
            }
            let margin = score - correct + MARGIN;
            if margin > 0.0 {
                loss += margin;
                dx[[i, j]] = 1.0;
                positive += 1;
            }
        }
        dx[[i, label]] -= positive as f64;
    }

    let scale = 1.0 / n as f64;
    dx.mapv_inplace(|g| g * scale);
    let loss = loss * scale;

    debug!(n, classes = x.ncols(), loss, "svm loss");

    Ok((loss, dx))
}
