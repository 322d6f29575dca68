//! Classification losses
//!
//! Both losses take a score matrix `x` of shape `(N, C)` and one label per row,
//! and return the mean loss over the batch with its gradient with respect to `x`.

mod softmax;
mod svm;

pub use softmax::softmax_loss;
pub use svm::svm_loss;

use ndarray::Array2;

use crate::error::{LayerError, Result};

/// Check that `labels` has one entry per row of `x`, each a valid class index
fn validate_labels(x: &Array2<f64>, labels: &[usize]) -> Result<()> {
    let (n, classes) = x.dim();

    if n == 0 {
        return Err(LayerError::EmptyBatch);
    }
    if labels.len() != n {
        return Err(LayerError::ShapeMismatch {
            expected: format!("{} labels", n),
            got: format!("{} labels", labels.len()),
        });
    }
    if let Some(&label) = labels.iter().find(|&&label| label >= classes) {
        return Err(LayerError::LabelOutOfRange { label, classes });
    }
    Ok(())
}
