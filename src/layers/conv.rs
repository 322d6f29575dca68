//! 2D Convolution
//!
//! Naive convolution over `(N, C, H, W)` images with `(F, C, HH, WW)` filters.
//! Both passes go through a column matrix holding one unrolled receptive
//! field per output position:
//!
//! ```text
//! columns: (C * HH * WW, N * H' * W')
//! column index: n * H' * W' + i * W' + j
//! ```
//!
//! The forward pass is then a single matrix product with the flattened filters,
//! and the backward pass scatters the column gradients back onto the padded input.

use ndarray::{s, Array1, Array2, Array4, Axis};
use tracing::debug;

use super::ConvParam;
use crate::error::{LayerError, Result};

/// Values saved by [`conv_forward_naive`] for the backward pass
#[derive(Debug, Clone)]
pub struct ConvCache {
    /// Input, shape `(N, C, H, W)`
    pub x: Array4<f64>,
    /// Filters, shape `(F, C, HH, WW)`
    pub w: Array4<f64>,
    /// Biases, shape `(F,)`
    pub b: Array1<f64>,
    /// Unrolled receptive fields of the padded input
    pub columns: Array2<f64>,
    pub param: ConvParam,
}

impl ConvCache {
    /// Output spatial size `(H', W')` of the cached forward pass
    pub fn output_dims(&self) -> (usize, usize) {
        let (_, _, h, w) = self.x.dim();
        let (_, _, hh, ww) = self.w.dim();
        let pad = self.param.pad;
        (
            (h + 2 * pad - hh) / self.param.stride + 1,
            (w + 2 * pad - ww) / self.param.stride + 1,
        )
    }
}

/// Zero-pad both spatial axes of every (sample, channel) plane
fn pad_spatial(x: &Array4<f64>, pad: usize) -> Array4<f64> {
    if pad == 0 {
        return x.clone();
    }
    let (n, c, h, w) = x.dim();
    let mut padded = Array4::zeros((n, c, h + 2 * pad, w + 2 * pad));
    padded
        .slice_mut(s![.., .., pad..pad + h, pad..pad + w])
        .assign(x);
    padded
}

/// Unroll every `kh x kw` window of `padded` into a column
fn im2col(
    padded: &Array4<f64>,
    kh: usize,
    kw: usize,
    stride: usize,
    out_h: usize,
    out_w: usize,
) -> Array2<f64> {
    let (n, c, _, _) = padded.dim();
    let mut columns = Array2::zeros((c * kh * kw, n * out_h * out_w));

    for img in 0..n {
        for i in 0..out_h {
            for j in 0..out_w {
                let col = img * out_h * out_w + i * out_w + j;
                let (top, left) = (i * stride, j * stride);
                let window = padded.slice(s![img, .., top..top + kh, left..left + kw]);

                for (row, &v) in window.iter().enumerate() {
                    columns[[row, col]] = v;
                }
            }
        }
    }

    columns
}

/// Inverse of [`im2col`]: add every column back onto its window.
///
/// Windows overlap whenever `stride < kernel`, so values accumulate.
fn col2im(
    columns: &Array2<f64>,
    padded_dim: (usize, usize, usize, usize),
    kh: usize,
    kw: usize,
    stride: usize,
    out_h: usize,
    out_w: usize,
) -> Array4<f64> {
    let mut padded = Array4::zeros(padded_dim);

    for img in 0..padded_dim.0 {
        for i in 0..out_h {
            for j in 0..out_w {
                let col = img * out_h * out_w + i * out_w + j;
                let (top, left) = (i * stride, j * stride);
                let mut window = padded.slice_mut(s![img, .., top..top + kh, left..left + kw]);

                for (dst, &g) in window.iter_mut().zip(columns.column(col).iter()) {
                    *dst += g;
                }
            }
        }
    }

    padded
}

/// Filters flattened to `(F, C * HH * WW)` in row-major order
fn filter_rows(w: &Array4<f64>) -> Result<Array2<f64>> {
    let (f, c, hh, ww) = w.dim();
    Ok(Array2::from_shape_vec(
        (f, c * hh * ww),
        w.iter().cloned().collect(),
    )?)
}

/// Forward pass for a convolutional layer
///
/// # Arguments
/// * `x` - Input data of shape `(N, C, H, W)`
/// * `w` - Filter weights of shape `(F, C, HH, WW)`
/// * `b` - Biases of shape `(F,)`
/// * `param` - Stride and zero padding
///
/// # Returns
/// Output of shape `(N, F, H', W')` where
/// `H' = 1 + (H + 2 * pad - HH) / stride` and
/// `W' = 1 + (W + 2 * pad - WW) / stride`
pub fn conv_forward_naive(
    x: &Array4<f64>,
    w: &Array4<f64>,
    b: &Array1<f64>,
    param: &ConvParam,
) -> Result<(Array4<f64>, ConvCache)> {
    param.validate()?;

    let (n, c, h, width) = x.dim();
    let (f, wc, hh, ww) = w.dim();

    if wc != c {
        return Err(LayerError::ShapeMismatch {
            expected: format!("filters with {} channels", c),
            got: format!("{:?}", w.shape()),
        });
    }
    if b.len() != f {
        return Err(LayerError::shape_mismatch(format!("[{}]", f), b.shape()));
    }

    let out_h = param.output_extent(h, hh)?;
    let out_w = param.output_extent(width, ww)?;

    debug!(
        n, c, h, w = width, filters = f, hh, ww,
        stride = param.stride, pad = param.pad, out_h, out_w,
        "conv forward"
    );

    let padded = pad_spatial(x, param.pad);
    let columns = im2col(&padded, hh, ww, param.stride, out_h, out_w);

    // (F, C*HH*WW) · (C*HH*WW, N*H'*W')
    let products = filter_rows(w)?.dot(&columns);

    let out = Array4::from_shape_fn((n, f, out_h, out_w), |(img, filter, i, j)| {
        products[[filter, img * out_h * out_w + i * out_w + j]] + b[filter]
    });

    let cache = ConvCache {
        x: x.clone(),
        w: w.clone(),
        b: b.clone(),
        columns,
        param: *param,
    };
    Ok((out, cache))
}

/// Backward pass for a convolutional layer
///
/// # Arguments
/// * `dout` - Upstream derivatives of shape `(N, F, H', W')`
/// * `cache` - Cache from [`conv_forward_naive`]
///
/// # Returns
/// `(dx, dw, db)` with the shapes of `x`, `w` and `b`
pub fn conv_backward_naive(
    dout: &Array4<f64>,
    cache: &ConvCache,
) -> Result<(Array4<f64>, Array4<f64>, Array1<f64>)> {
    let (n, c, h, width) = cache.x.dim();
    let (f, _, hh, ww) = cache.w.dim();
    let (out_h, out_w) = cache.output_dims();
    let ConvParam { stride, pad } = cache.param;

    if dout.dim() != (n, f, out_h, out_w) {
        return Err(LayerError::shape_mismatch(
            format!("[{}, {}, {}, {}]", n, f, out_h, out_w),
            dout.shape(),
        ));
    }

    debug!(n, c, filters = f, out_h, out_w, "conv backward");

    let db = dout
        .sum_axis(Axis(3))
        .sum_axis(Axis(2))
        .sum_axis(Axis(0));

    // dout laid out like the columns: (F, N*H'*W')
    let positions = out_h * out_w;
    let dout_rows = Array2::from_shape_fn((f, n * positions), |(filter, col)| {
        let rem = col % positions;
        dout[[col / positions, filter, rem / out_w, rem % out_w]]
    });

    let dw_rows = dout_rows.dot(&cache.columns.t());
    let dw = Array4::from_shape_vec((f, c, hh, ww), dw_rows.iter().cloned().collect())?;

    let dcolumns = filter_rows(&cache.w)?.t().dot(&dout_rows);
    let dx_padded = col2im(
        &dcolumns,
        (n, c, h + 2 * pad, width + 2 * pad),
        hh,
        ww,
        stride,
        out_h,
        out_w,
    );
    let dx = dx_padded
        .slice(s![.., .., pad..pad + h, pad..pad + width])
        .to_owned();

    Ok((dx, dw, db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array, Array3};

    #[test]
    fn test_conv_forward_shape() {
        let x = Array4::zeros((2, 3, 4, 4));
        let w = Array4::zeros((3, 3, 4, 4));
        let b = Array1::zeros(3);
        let param = ConvParam::new(2, 1);

        let (out, _) = conv_forward_naive(&x, &w, &b, &param).unwrap();
        assert_eq!(out.dim(), (2, 3, 2, 2));
    }

    #[test]
    fn test_conv_forward_box_filter() {
        // 3x3 ones filter over a 4x4 ones image with pad 1 counts
        // the in-bounds neighbours of each pixel
        let x = Array4::ones((1, 1, 4, 4));
        let w = Array4::ones((1, 1, 3, 3));
        let b = Array1::from_elem(1, 0.5);

        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvParam::new(1, 1)).unwrap();

        let expected = [
            [4.0, 6.0, 6.0, 4.0],
            [6.0, 9.0, 9.0, 6.0],
            [6.0, 9.0, 9.0, 6.0],
            [4.0, 6.0, 6.0, 4.0],
        ];
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(out[[0, 0, i, j]], expected[i][j] + 0.5, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_conv_forward_multichannel() {
        // Filter 0 picks channel 0's top-left pixel, filter 1 sums channel 1
        let x = Array::from_shape_fn((1, 2, 2, 2), |(_, ch, i, j)| (ch * 4 + i * 2 + j) as f64);
        let mut w = Array4::zeros((2, 2, 2, 2));
        w[[0, 0, 0, 0]] = 1.0;
        w.slice_mut(s![1, 1, .., ..]).fill(1.0);
        let b = Array1::zeros(2);

        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvParam::default()).unwrap();
        assert_eq!(out.dim(), (1, 2, 1, 1));
        assert_relative_eq!(out[[0, 0, 0, 0]], 0.0);
        assert_relative_eq!(out[[0, 1, 0, 0]], 4.0 + 5.0 + 6.0 + 7.0);
    }

    #[test]
    fn test_conv_backward_without_padding() {
        let x = Array::linspace(-1.0, 1.0, 2 * 2 * 5 * 5)
            .into_shape((2, 2, 5, 5))
            .unwrap();
        let w = Array::linspace(-0.5, 0.5, 3 * 2 * 3 * 3)
            .into_shape((3, 2, 3, 3))
            .unwrap();
        let b = Array1::zeros(3);

        let (out, cache) = conv_forward_naive(&x, &w, &b, &ConvParam::new(2, 0)).unwrap();
        assert_eq!(out.dim(), (2, 3, 2, 2));

        let (dx, dw, db) = conv_backward_naive(&Array4::ones(out.raw_dim()), &cache).unwrap();
        assert_eq!(dx.dim(), x.dim());
        assert_eq!(dw.dim(), w.dim());
        // Each filter sees 2 images x 4 output positions
        assert_eq!(db, Array1::from_elem(3, 8.0));
    }

    #[test]
    fn test_conv_backward_accumulates_overlaps() {
        // With a ones filter and ones upstream gradient, dx counts how many
        // windows cover each pixel
        let x = Array4::zeros((1, 1, 3, 3));
        let w = Array4::ones((1, 1, 2, 2));
        let b = Array1::zeros(1);

        let (_, cache) = conv_forward_naive(&x, &w, &b, &ConvParam::default()).unwrap();
        let (dx, _, _) = conv_backward_naive(&Array4::ones((1, 1, 2, 2)), &cache).unwrap();

        let coverage = Array3::from_shape_vec(
            (1, 3, 3),
            vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0],
        )
        .unwrap();
        assert_eq!(dx.index_axis(Axis(0), 0), coverage);
    }

    #[test]
    fn test_conv_rejects_bad_shapes() {
        let x = Array4::zeros((1, 3, 5, 5));
        let b = Array1::zeros(2);

        let wrong_channels = Array4::zeros((2, 2, 3, 3));
        assert!(matches!(
            conv_forward_naive(&x, &wrong_channels, &b, &ConvParam::default()),
            Err(LayerError::ShapeMismatch { .. })
        ));

        let w = Array4::zeros((2, 3, 3, 3));
        assert!(matches!(
            conv_forward_naive(&x, &w, &b, &ConvParam::new(3, 0)),
            Err(LayerError::UnevenStride { .. })
        ));
        assert!(matches!(
            conv_forward_naive(&x, &w, &b, &ConvParam::new(0, 0)),
            Err(LayerError::InvalidParameter(_))
        ));

        let (_, cache) = conv_forward_naive(&x, &w, &b, &ConvParam::default()).unwrap();
        assert!(conv_backward_naive(&Array4::zeros((1, 2, 2, 2)), &cache).is_err());
    }
}
