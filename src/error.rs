//! Error type shared by all layers and losses

use thiserror::Error;

/// Layer errors
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Window of size {window} does not fit spatial extent {extent}")]
    WindowTooLarge { window: usize, extent: usize },

    #[error("Stride {stride} does not tile extent {extent} with window {window}")]
    UnevenStride {
        extent: usize,
        window: usize,
        stride: usize,
    },

    #[error("Label {label} out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },

    #[error("Empty batch")]
    EmptyBatch,

    #[error("Reshape failed: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl LayerError {
    pub(crate) fn shape_mismatch(expected: impl Into<String>, got: &[usize]) -> Self {
        LayerError::ShapeMismatch {
            expected: expected.into(),
            got: format!("{:?}", got),
        }
    }
}

pub type Result<T> = std::result::Result<T, LayerError>;
