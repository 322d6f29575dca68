//! # Backprop Layers
//!
//! Forward and backward passes for the basic building blocks of a layered
//! neural network trained by backpropagation.
//!
//! This library provides:
//! - Affine, ReLU, convolution and max pooling layers (`layers`)
//! - Multiclass SVM and softmax cross-entropy losses (`loss`)
//! - Numeric gradient checking for all of the above (`gradient_check`)
//!
//! Every forward pass returns its output together with a cache; the matching
//! backward pass takes the upstream gradient and that cache.
//!
//! ## Example
//!
//! ```rust
//! use backprop_layers::prelude::*;
//! use ndarray::{Array1, Array4};
//!
//! let x = Array4::<f64>::ones((2, 3, 8, 8));
//! let w = Array4::<f64>::ones((4, 3, 3, 3));
//! let b = Array1::<f64>::zeros(4);
//!
//! let (conv_out, conv_cache) = conv_forward_naive(&x, &w, &b, &ConvParam::new(1, 1))?;
//! let (pool_out, pool_cache) = max_pool_forward_naive(&conv_out, &PoolParam::default())?;
//! assert_eq!(pool_out.dim(), (2, 4, 4, 4));
//!
//! let dpool = max_pool_backward_naive(&Array4::ones(pool_out.raw_dim()), &pool_cache)?;
//! let (dx, dw, db) = conv_backward_naive(&dpool, &conv_cache)?;
//! assert_eq!(dx.dim(), x.dim());
//! # Ok::<(), backprop_layers::LayerError>(())
//! ```

pub mod error;
pub mod gradient_check;
pub mod layers;
pub mod loss;

// Re-exports for convenience
pub use error::{LayerError, Result};
pub use gradient_check::{GradientCheckConfig, GradientCheckResult, GradientSuite, LayerKind};
pub use layers::{
    affine_backward, affine_forward, conv_backward_naive, conv_forward_naive,
    max_pool_backward_naive, max_pool_forward_naive, relu_backward, relu_forward, ConvParam,
    PoolParam,
};
pub use loss::{softmax_loss, svm_loss};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::LayerError;
    pub use crate::gradient_check::*;
    pub use crate::layers::*;
    pub use crate::loss::*;
}
