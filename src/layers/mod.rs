//! Layer forward and backward passes
//!
//! Every layer is a pair of free functions:
//! - `*_forward` computes the output and returns a cache of what the backward pass needs
//! - `*_backward` takes the upstream gradient and that cache and returns input gradients
//!
//! Layers:
//! - Affine (fully connected)
//! - ReLU
//! - Convolution over `(N, C, H, W)` images
//! - Max pooling over `(N, C, H, W)` images

mod affine;
mod conv;
mod pool;
mod relu;

pub use affine::{affine_backward, affine_forward, AffineCache};
pub use conv::{conv_backward_naive, conv_forward_naive, ConvCache};
pub use pool::{max_pool_backward_naive, max_pool_forward_naive, PoolCache};
pub use relu::{relu_backward, relu_forward, ReluCache};

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

/// Convolution hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvParam {
    /// Pixels between adjacent receptive fields, both directions
    pub stride: usize,
    /// Zero padding added to each spatial border
    pub pad: usize,
}

impl Default for ConvParam {
    fn default() -> Self {
        Self { stride: 1, pad: 0 }
    }
}

impl ConvParam {
    pub fn new(stride: usize, pad: usize) -> Self {
        Self { stride, pad }
    }

    /// Builder method to set stride
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Builder method to set padding
    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = pad;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(LayerError::InvalidParameter(
                "stride must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Output extent along one spatial axis for a kernel of size `kernel`
    pub fn output_extent(&self, input: usize, kernel: usize) -> Result<usize> {
        output_extent(input + 2 * self.pad, kernel, self.stride)
    }
}

/// Max pooling hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParam {
    /// Height of each pooling region
    pub pool_height: usize,
    /// Width of each pooling region
    pub pool_width: usize,
    /// Distance between adjacent pooling regions
    pub stride: usize,
}

impl Default for PoolParam {
    fn default() -> Self {
        Self {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        }
    }
}

impl PoolParam {
    pub fn new(pool_height: usize, pool_width: usize, stride: usize) -> Self {
        Self {
            pool_height,
            pool_width,
            stride,
        }
    }

    /// Square pooling window whose stride equals its size
    pub fn square(size: usize) -> Self {
        Self::new(size, size, size)
    }

    /// Builder method to set stride
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_height == 0 || self.pool_width == 0 {
            return Err(LayerError::InvalidParameter(format!(
                "pool size must be > 0, got {}x{}",
                self.pool_height, self.pool_width
            )));
        }
        if self.stride == 0 {
            return Err(LayerError::InvalidParameter(
                "stride must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Output `(height, width)` for an input of spatial size `(h, w)`
    pub fn output_dims(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        Ok((
            output_extent(h, self.pool_height, self.stride)?,
            output_extent(w, self.pool_width, self.stride)?,
        ))
    }
}

/// Number of window positions along an axis of length `extent`.
///
/// The stride must tile `extent - window` exactly, so that the last window
/// ends on the border.
pub(crate) fn output_extent(extent: usize, window: usize, stride: usize) -> Result<usize> {
    if window == 0 || stride == 0 {
        return Err(LayerError::InvalidParameter(format!(
            "window and stride must be > 0, got window {} stride {}",
            window, stride
        )));
    }
    if window > extent {
        return Err(LayerError::WindowTooLarge { window, extent });
    }
    let span = extent - window;
    if span % stride != 0 {
        return Err(LayerError::UnevenStride {
            extent,
            window,
            stride,
        });
    }
    Ok(span / stride + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_output_extent() {
        let param = ConvParam::new(1, 1);
        assert_eq!(param.output_extent(4, 3).unwrap(), 4);

        let param = ConvParam::new(2, 1);
        assert_eq!(param.output_extent(5, 3).unwrap(), 3); // (5 + 2 - 3) / 2 + 1
    }

    #[test]
    fn test_uneven_stride_rejected() {
        let param = ConvParam::new(2, 0);
        assert!(matches!(
            param.output_extent(6, 3),
            Err(LayerError::UnevenStride { .. })
        ));
    }

    #[test]
    fn test_window_too_large() {
        let pool = PoolParam::square(3);
        assert!(matches!(
            pool.output_dims(2, 6),
            Err(LayerError::WindowTooLarge { window: 3, extent: 2 })
        ));
    }

    #[test]
    fn test_pool_output_dims() {
        let pool = PoolParam::default();
        assert_eq!(pool.output_dims(4, 6).unwrap(), (2, 3));

        let overlapping = PoolParam::new(3, 3, 1);
        assert_eq!(overlapping.output_dims(4, 4).unwrap(), (2, 2));
    }

    #[test]
    fn test_validate() {
        assert!(ConvParam::default().validate().is_ok());
        assert!(ConvParam::default().with_stride(0).validate().is_err());
        assert!(PoolParam::default().validate().is_ok());
        assert!(PoolParam::new(0, 2, 2).validate().is_err());
        assert!(PoolParam::default().with_stride(0).validate().is_err());
    }

    #[test]
    fn test_params_from_json() {
        let conv: ConvParam = serde_json::from_str(r#"{"stride": 2, "pad": 1}"#).unwrap();
        assert_eq!(conv, ConvParam::new(2, 1));

        // Missing keys fall back to defaults
        let conv: ConvParam = serde_json::from_str(r#"{"pad": 3}"#).unwrap();
        assert_eq!(conv, ConvParam::new(1, 3));

        let pool: PoolParam =
            serde_json::from_str(r#"{"pool_height": 3, "pool_width": 2, "stride": 1}"#).unwrap();
        assert_eq!(pool, PoolParam::new(3, 2, 1));
    }
}
