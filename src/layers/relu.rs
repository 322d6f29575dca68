//! Rectified linear unit: `max(0, x)`

use ndarray::{Array, Dimension, Zip};
use tracing::debug;

use crate::error::{LayerError, Result};

/// Input saved by [`relu_forward`]
#[derive(Debug, Clone)]
pub struct ReluCache<D: Dimension> {
    pub x: Array<f64, D>,
}

/// Forward pass for a layer of ReLUs; `x` may have any shape
pub fn relu_forward<D: Dimension>(x: &Array<f64, D>) -> (Array<f64, D>, ReluCache<D>) {
    debug!(shape = ?x.shape(), "relu forward");

    // NaN is not > 0 and maps to zero
    let out = x.mapv(|v| if v > 0.0 { v } else { 0.0 });
    (out, ReluCache { x: x.clone() })
}

/// Backward pass for a layer of ReLUs
///
/// The upstream gradient passes through where the cached input was positive.
pub fn relu_backward<D: Dimension>(
    dout: &Array<f64, D>,
    cache: &ReluCache<D>,
) -> Result<Array<f64, D>> {
    if dout.shape() != cache.x.shape() {
        return Err(LayerError::shape_mismatch(
            format!("{:?}", cache.x.shape()),
            dout.shape(),
        ));
    }

    debug!(shape = ?dout.shape(), "relu backward");

    Ok(Zip::from(dout)
        .and(&cache.x)
        .map_collect(|&g, &x| if x > 0.0 { g } else { 0.0 }))
}
