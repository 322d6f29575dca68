//! Max pooling over `(N, C, H, W)` images

use ndarray::{s, Array4};
use tracing::debug;

use super::PoolParam;
use crate::error::{LayerError, Result};

/// Values saved by [`max_pool_forward_naive`] for the backward pass
#[derive(Debug, Clone)]
pub struct PoolCache {
    /// Input, shape `(N, C, H, W)`
    pub x: Array4<f64>,
    /// Row-major offset of the maximum inside each window, shape `(N, C, H', W')`
    pub switches: Array4<usize>,
    pub param: PoolParam,
}

/// Forward pass for a max pooling layer
///
/// # Arguments
/// * `x` - Input data of shape `(N, C, H, W)`
/// * `param` - Pool height, pool width and stride
///
/// # Returns
/// Output of shape `(N, C, H', W')` where
/// `H' = 1 + (H - pool_height) / stride` and `W' = 1 + (W - pool_width) / stride`
pub fn max_pool_forward_naive(
    x: &Array4<f64>,
    param: &PoolParam,
) -> Result<(Array4<f64>, PoolCache)> {
    param.validate()?;

    let (n, c, h, w) = x.dim();
    let (out_h, out_w) = param.output_dims(h, w)?;
    let PoolParam {
        pool_height: ph,
        pool_width: pw,
        stride,
    } = *param;

    debug!(n, c, h, w, ph, pw, stride, out_h, out_w, "max pool forward");

    let mut out = Array4::zeros((n, c, out_h, out_w));
    let mut switches = Array4::zeros((n, c, out_h, out_w));

    for img in 0..n {
        for ch in 0..c {
            for i in 0..out_h {
                for j in 0..out_w {
                    let (top, left) = (i * stride, j * stride);
                    let window = x.slice(s![img, ch, top..top + ph, left..left + pw]);

                    // First occurrence wins on ties
                    let mut best = 0;
                    let mut best_value = f64::NEG_INFINITY;
                    for (offset, &v) in window.iter().enumerate() {
                        if offset == 0 || v > best_value {
                            best = offset;
                            best_value = v;
                        }
                    }

                    out[[img, ch, i, j]] = best_value;
                    switches[[img, ch, i, j]] = best;
                }
            }
        }
    }

    let cache = PoolCache {
        x: x.clone(),
        switches,
        param: *param,
    };
    Ok((out, cache))
}

/// Backward pass for a max pooling layer
///
/// Routes each upstream gradient to the input position that won its window.
pub fn max_pool_backward_naive(dout: &Array4<f64>, cache: &PoolCache) -> Result<Array4<f64>> {
    if dout.dim() != cache.switches.dim() {
        return Err(LayerError::shape_mismatch(
            format!("{:?}", cache.switches.shape()),
            dout.shape(),
        ));
    }

    let pw = cache.param.pool_width;
    let stride = cache.param.stride;

    debug!(shape = ?dout.shape(), "max pool backward");

    let mut dx = Array4::zeros(cache.x.raw_dim());

    for ((img, ch, i, j), &g) in dout.indexed_iter() {
        let offset = cache.switches[[img, ch, i, j]];
        let row = i * stride + offset / pw;
        let col = j * stride + offset % pw;
        // Overlapping windows may share a winner
        dx[[img, ch, row, col]] += g;
    }

    Ok(dx)
}
