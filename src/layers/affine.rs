//! Affine (fully connected) layer
//!
//! `out = x_rows · w + b`, where `x_rows` is the input flattened to one row per sample.

use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};
use tracing::debug;

use crate::error::{LayerError, Result};

/// Values saved by [`affine_forward`] for the backward pass
#[derive(Debug, Clone)]
pub struct AffineCache {
    /// Input as given, shape `(N, d_1, ..., d_k)`
    pub x: ArrayD<f64>,
    /// Weights, shape `(D, M)`
    pub w: Array2<f64>,
    /// Biases, shape `(M,)`
    pub b: Array1<f64>,
}

/// Flatten `(N, d_1, ..., d_k)` into `(N, D)` in row-major order
fn flatten_rows(x: &ArrayD<f64>) -> Result<Array2<f64>> {
    let n = match x.shape().first() {
        Some(&n) => n,
        None => return Err(LayerError::shape_mismatch("(N, d_1, ..., d_k)", x.shape())),
    };
    let d: usize = x.shape()[1..].iter().product();
    Ok(Array2::from_shape_vec((n, d), x.iter().cloned().collect())?)
}

/// Forward pass for an affine layer
///
/// # Arguments
/// * `x` - Input of shape `(N, d_1, ..., d_k)`
/// * `w` - Weights of shape `(D, M)` with `D = d_1 * ... * d_k`
/// * `b` - Biases of shape `(M,)`
///
/// # Returns
/// Output of shape `(N, M)` and the cache for [`affine_backward`]
pub fn affine_forward(
    x: &ArrayD<f64>,
    w: &Array2<f64>,
    b: &Array1<f64>,
) -> Result<(Array2<f64>, AffineCache)> {
    let rows = flatten_rows(x)?;
    let (d, m) = w.dim();

    if rows.ncols() != d {
        return Err(LayerError::shape_mismatch(
            format!("input with {} features per sample", d),
            x.shape(),
        ));
    }
    if b.len() != m {
        return Err(LayerError::shape_mismatch(format!("[{}]", m), b.shape()));
    }

    debug!(batch = rows.nrows(), d, m, "affine forward");

    let out = rows.dot(w) + b;

    let cache = AffineCache {
        x: x.clone(),
        w: w.clone(),
        b: b.clone(),
    };
    Ok((out, cache))
}

/// Backward pass for an affine layer
///
/// # Returns
/// `(dx, dw, db)` with the shapes of `x`, `w` and `b`
pub fn affine_backward(
    dout: &Array2<f64>,
    cache: &AffineCache,
) -> Result<(ArrayD<f64>, Array2<f64>, Array1<f64>)> {
    let rows = flatten_rows(&cache.x)?;
    let expected = (rows.nrows(), cache.w.ncols());

    if dout.dim() != expected {
        return Err(LayerError::shape_mismatch(
            format!("[{}, {}]", expected.0, expected.1),
            dout.shape(),
        ));
    }

    debug!(batch = expected.0, m = expected.1, "affine backward");

    let dw = rows.t().dot(dout);
    let db = dout.sum_axis(Axis(0));
    let dx_rows = dout.dot(&cache.w.t());
    let dx = ArrayD::from_shape_vec(IxDyn(cache.x.shape()), dx_rows.iter().cloned().collect())?;

    Ok((dx, dw, db))
}
