//! Gradient checks for every forward/backward pair on seeded random inputs

use std::fmt;
use std::str::FromStr;

use ndarray::{Array, Array1, Array2, Array4, ArrayD, IxDyn};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{info, warn};

use super::{
    compare_gradients, numerical_gradient, numerical_gradient_array, GradientCheckConfig,
    GradientCheckResult,
};
use crate::error::{LayerError, Result};
use crate::layers::{
    affine_backward, affine_forward, conv_backward_naive, conv_forward_naive,
    max_pool_backward_naive, max_pool_forward_naive, relu_backward, relu_forward, ConvParam,
    PoolParam,
};
use crate::loss::{softmax_loss, svm_loss};

/// Layer or loss covered by the suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Affine,
    Relu,
    Conv,
    Pool,
    Svm,
    Softmax,
}

impl LayerKind {
    pub const ALL: [LayerKind; 6] = [
        LayerKind::Affine,
        LayerKind::Relu,
        LayerKind::Conv,
        LayerKind::Pool,
        LayerKind::Svm,
        LayerKind::Softmax,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Affine => "affine",
            LayerKind::Relu => "relu",
            LayerKind::Conv => "conv",
            LayerKind::Pool => "pool",
            LayerKind::Svm => "svm",
            LayerKind::Softmax => "softmax",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LayerKind {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self> {
        LayerKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s.to_ascii_lowercase())
            .ok_or_else(|| LayerError::InvalidParameter(format!("unknown layer: {}", s)))
    }
}

/// Smallest input extent at least 1 whose padded size is tiled exactly by `window` and `stride`
fn tiled_extent(window: usize, stride: usize, pad: usize) -> usize {
    let mut steps = 3;
    while window + steps * stride < 2 * pad + 1 {
        steps += 1;
    }
    window + steps * stride - 2 * pad
}

/// Runs numeric gradient checks for the selected layers
#[derive(Debug, Clone)]
pub struct GradientSuite {
    pub config: GradientCheckConfig,
    pub conv: ConvParam,
    pub pool: PoolParam,
    pub seed: u64,
}

impl Default for GradientSuite {
    fn default() -> Self {
        Self {
            config: GradientCheckConfig::default(),
            conv: ConvParam::new(1, 1),
            pool: PoolParam::default(),
            seed: 231,
        }
    }
}

impl GradientSuite {
    pub fn new(config: GradientCheckConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_conv(mut self, conv: ConvParam) -> Self {
        self.conv = conv;
        self
    }

    pub fn with_pool(mut self, pool: PoolParam) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check every layer in `kinds`, one result per gradient
    pub fn run(&self, kinds: &[LayerKind]) -> Result<Vec<GradientCheckResult>> {
        self.config.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut results = Vec::new();

        for kind in kinds {
            let checked = match kind {
                LayerKind::Affine => self.check_affine(&mut rng)?,
                LayerKind::Relu => self.check_relu(&mut rng)?,
                LayerKind::Conv => self.check_conv(&mut rng)?,
                LayerKind::Pool => self.check_pool(&mut rng)?,
                LayerKind::Svm => self.check_loss(&mut rng, *kind, svm_loss)?,
                LayerKind::Softmax => self.check_loss(&mut rng, *kind, softmax_loss)?,
            };

            for result in &checked {
                if result.passed {
                    info!(name = %result.name, rel_error = result.rel_error, "gradient check passed");
                } else {
                    warn!(
                        name = %result.name,
                        rel_error = result.rel_error,
                        tolerance = self.config.tolerance,
                        "gradient check failed"
                    );
                }
            }
            results.extend(checked);
        }

        Ok(results)
    }

    /// Check every layer
    pub fn run_all(&self) -> Result<Vec<GradientCheckResult>> {
        self.run(&LayerKind::ALL)
    }

    fn check_affine(&self, rng: &mut StdRng) -> Result<Vec<GradientCheckResult>> {
        let x: ArrayD<f64> = Array::random_using(IxDyn(&[4, 2, 3]), StandardNormal, rng);
        let w: Array2<f64> = Array::random_using((6, 5), StandardNormal, rng);
        let b: Array1<f64> = Array::random_using(5, StandardNormal, rng);
        let dout: Array2<f64> = Array::random_using((4, 5), StandardNormal, rng);

        let (_, cache) = affine_forward(&x, &w, &b)?;
        let (dx, dw, db) = affine_backward(&dout, &cache)?;

        let eps = self.config.epsilon;
        let dx_num =
            numerical_gradient_array(|x| Ok(affine_forward(x, &w, &b)?.0), &x, &dout, eps)?;
        let dw_num =
            numerical_gradient_array(|w| Ok(affine_forward(&x, w, &b)?.0), &w, &dout, eps)?;
        let db_num =
            numerical_gradient_array(|b| Ok(affine_forward(&x, &w, b)?.0), &b, &dout, eps)?;

        Ok(vec![
            compare_gradients("affine/dx", &dx, &dx_num, &self.config)?,
            compare_gradients("affine/dw", &dw, &dw_num, &self.config)?,
            compare_gradients("affine/db", &db, &db_num, &self.config)?,
        ])
    }

    fn check_relu(&self, rng: &mut StdRng) -> Result<Vec<GradientCheckResult>> {
        // Keep inputs away from the kink at zero
        let x: Array2<f64> = Array::random_using((6, 8), StandardNormal, rng);
        let x = x.mapv(|v| v + v.signum() * 0.05);
        let dout: Array2<f64> = Array::random_using((6, 8), StandardNormal, rng);

        let (_, cache) = relu_forward(&x);
        let dx = relu_backward(&dout, &cache)?;
        let dx_num =
            numerical_gradient_array(|x| Ok(relu_forward(x).0), &x, &dout, self.config.epsilon)?;

        Ok(vec![compare_gradients("relu/dx", &dx, &dx_num, &self.config)?])
    }

    fn check_conv(&self, rng: &mut StdRng) -> Result<Vec<GradientCheckResult>> {
        let param = self.conv;
        param.validate()?;
        let (filters, channels, kernel) = (3, 3, 3);
        let extent = tiled_extent(kernel, param.stride, param.pad);

        let x: Array4<f64> = Array::random_using((2, channels, extent, extent), StandardNormal, rng);
        let w: Array4<f64> =
            Array::random_using((filters, channels, kernel, kernel), StandardNormal, rng);
        let b: Array1<f64> = Array::random_using(filters, StandardNormal, rng);

        let (out, cache) = conv_forward_naive(&x, &w, &b, &param)?;
        let dout: Array4<f64> = Array::random_using(out.raw_dim(), StandardNormal, rng);
        let (dx, dw, db) = conv_backward_naive(&dout, &cache)?;

        let eps = self.config.epsilon;
        let dx_num = numerical_gradient_array(
            |x| Ok(conv_forward_naive(x, &w, &b, &param)?.0),
            &x,
            &dout,
            eps,
        )?;
        let dw_num = numerical_gradient_array(
            |w| Ok(conv_forward_naive(&x, w, &b, &param)?.0),
            &w,
            &dout,
            eps,
        )?;
        let db_num = numerical_gradient_array(
            |b| Ok(conv_forward_naive(&x, &w, b, &param)?.0),
            &b,
            &dout,
            eps,
        )?;

        Ok(vec![
            compare_gradients("conv/dx", &dx, &dx_num, &self.config)?,
            compare_gradients("conv/dw", &dw, &dw_num, &self.config)?,
            compare_gradients("conv/db", &db, &db_num, &self.config)?,
        ])
    }

    fn check_pool(&self, rng: &mut StdRng) -> Result<Vec<GradientCheckResult>> {
        let param = self.pool;
        param.validate()?;
        let h = tiled_extent(param.pool_height, param.stride, 0);
        let w = tiled_extent(param.pool_width, param.stride, 0);

        // Distinct, well separated values so that no perturbation changes a window's winner
        let len = 3 * 2 * h * w;
        let mut values: Vec<f64> = Array::linspace(-0.3, 0.4, len).to_vec();
        values.shuffle(rng);
        let x = Array4::from_shape_vec((3, 2, h, w), values)?;
        let (out, cache) = max_pool_forward_naive(&x, &param)?;
        let dout: Array4<f64> = Array::random_using(out.raw_dim(), StandardNormal, rng);
        let dx = max_pool_backward_naive(&dout, &cache)?;

        let dx_num = numerical_gradient_array(
            |x| Ok(max_pool_forward_naive(x, &param)?.0),
            &x,
            &dout,
            self.config.epsilon,
        )?;

        Ok(vec![compare_gradients("pool/dx", &dx, &dx_num, &self.config)?])
    }

    fn check_loss<L>(
        &self,
        rng: &mut StdRng,
        kind: LayerKind,
        loss: L,
    ) -> Result<Vec<GradientCheckResult>>
    where
        L: Fn(&Array2<f64>, &[usize]) -> Result<(f64, Array2<f64>)>,
    {
        let (n, classes) = (10, 5);
        // Small scores keep every hinge margin positive and away from its kink
        let x: Array2<f64> = Array::random_using((n, classes), StandardNormal, rng);
        let x = x * 1e-3;
        let y: Vec<usize> = (0..n).map(|_| rng.gen_range(0..classes)).collect();

        let (_, dx) = loss(&x, &y)?;
        let dx_num = numerical_gradient(|x| Ok(loss(x, &y)?.0), &x, self.config.epsilon)?;

        let name = format!("{}/dx", kind);
        Ok(vec![compare_gradients(&name, &dx, &dx_num, &self.config)?])
    }
}
