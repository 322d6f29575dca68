//! Numeric gradient checking
//!
//! Compares analytic gradients from the backward passes against centered
//! finite differences:
//!
//! ```text
//! f'(x) ≈ [f(x + h) - f(x - h)] / (2h)
//! ```
//!
//! For array-valued functions the scalar being differentiated is
//! `sum(f(x) * dout)` for a fixed upstream gradient `dout`, which is exactly
//! what a backward pass computes.

mod suite;

pub use suite::{GradientSuite, LayerKind};

use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

/// Configuration for gradient checking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientCheckConfig {
    /// Step for finite differences
    pub epsilon: f64,
    /// Maximum accepted relative error
    pub tolerance: f64,
}

impl Default for GradientCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            tolerance: 1e-7,
        }
    }
}

impl GradientCheckConfig {
    pub fn strict() -> Self {
        Self {
            epsilon: 1e-6,
            tolerance: 1e-9,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            epsilon: 1e-5,
            tolerance: 1e-5,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0) {
            return Err(LayerError::InvalidParameter(format!(
                "epsilon must be > 0, got {}",
                self.epsilon
            )));
        }
        if !(self.tolerance > 0.0) {
            return Err(LayerError::InvalidParameter(format!(
                "tolerance must be > 0, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Outcome of checking one gradient
#[derive(Debug, Clone, Serialize)]
pub struct GradientCheckResult {
    /// Name of the checked gradient, e.g. `conv/dw`
    pub name: String,
    pub rel_error: f64,
    pub num_elements: usize,
    pub passed: bool,
}

/// Copy of `values` with element `index` (in logical order) shifted by `delta`
fn perturbed<D: Dimension>(
    shape: &D,
    values: &[f64],
    index: usize,
    delta: f64,
) -> Result<Array<f64, D>> {
    let mut shifted = values.to_vec();
    shifted[index] += delta;
    Ok(Array::from_shape_vec(shape.clone(), shifted)?)
}

/// Centered-difference gradient of a scalar function at `x`
pub fn numerical_gradient<D, F>(
    mut f: F,
    x: &Array<f64, D>,
    epsilon: f64,
) -> Result<Array<f64, D>>
where
    D: Dimension,
    F: FnMut(&Array<f64, D>) -> Result<f64>,
{
    let shape = x.raw_dim();
    let values: Vec<f64> = x.iter().cloned().collect();
    let mut grad = Vec::with_capacity(values.len());

    for index in 0..values.len() {
        let plus = f(&perturbed(&shape, &values, index, epsilon)?)?;
        let minus = f(&perturbed(&shape, &values, index, -epsilon)?)?;
        grad.push((plus - minus) / (2.0 * epsilon));
    }

    Ok(Array::from_shape_vec(shape, grad)?)
}

/// Centered-difference gradient of `sum(f(x) * dout)` at `x`
pub fn numerical_gradient_array<D, E, F>(
    mut f: F,
    x: &Array<f64, D>,
    dout: &Array<f64, E>,
    epsilon: f64,
) -> Result<Array<f64, D>>
where
    D: Dimension,
    E: Dimension,
    F: FnMut(&Array<f64, D>) -> Result<Array<f64, E>>,
{
    let shape = x.raw_dim();
    let values: Vec<f64> = x.iter().cloned().collect();
    let mut grad = Vec::with_capacity(values.len());

    for index in 0..values.len() {
        let plus = f(&perturbed(&shape, &values, index, epsilon)?)?;
        let minus = f(&perturbed(&shape, &values, index, -epsilon)?)?;

        if plus.shape() != dout.shape() {
            return Err(LayerError::shape_mismatch(
                format!("{:?}", dout.shape()),
                plus.shape(),
            ));
        }

        let projected: f64 = plus
            .iter()
            .zip(minus.iter())
            .zip(dout.iter())
            .map(|((p, m), g)| (p - m) * g)
            .sum();
        grad.push(projected / (2.0 * epsilon));
    }

    Ok(Array::from_shape_vec(shape, grad)?)
}

/// Maximum elementwise relative error `|a - b| / max(1e-8, |a| + |b|)`
pub fn rel_error<D: Dimension>(a: &Array<f64, D>, b: &Array<f64, D>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs() / (x.abs() + y.abs()).max(1e-8))
        .fold(0.0, f64::max)
}

/// Compare an analytic gradient against its numeric estimate
pub fn compare_gradients<D: Dimension>(
    name: &str,
    analytic: &Array<f64, D>,
    numeric: &Array<f64, D>,
    config: &GradientCheckConfig,
) -> Result<GradientCheckResult> {
    if analytic.shape() != numeric.shape() {
        return Err(LayerError::shape_mismatch(
            format!("{:?}", numeric.shape()),
            analytic.shape(),
        ));
    }

    let rel_error = rel_error(analytic, numeric);
    Ok(GradientCheckResult {
        name: name.to_string(),
        rel_error,
        num_elements: analytic.len(),
        passed: rel_error <= config.tolerance,
    })
}
