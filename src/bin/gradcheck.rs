//! Numeric gradient check of every layer and loss
//!
//! Usage:
//! ```bash
//! cargo run --release --bin gradcheck -- --layer conv --stride 2 --pad 1
//! cargo run --release --bin gradcheck -- --config gradcheck.json --verbose
//! ```
//!
//! The config file is JSON with optional `check`, `conv` and `pool` sections:
//! ```json
//! { "check": { "epsilon": 1e-5, "tolerance": 1e-7 }, "conv": { "stride": 1, "pad": 1 } }
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use backprop_layers::{ConvParam, GradientCheckConfig, GradientSuite, LayerKind, PoolParam};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use serde::Deserialize;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LayerArg {
    All,
    Affine,
    Relu,
    Conv,
    Pool,
    Svm,
    Softmax,
}

impl LayerArg {
    fn kinds(self) -> Vec<LayerKind> {
        match self {
            LayerArg::All => LayerKind::ALL.to_vec(),
            LayerArg::Affine => vec![LayerKind::Affine],
            LayerArg::Relu => vec![LayerKind::Relu],
            LayerArg::Conv => vec![LayerKind::Conv],
            LayerArg::Pool => vec![LayerKind::Pool],
            LayerArg::Svm => vec![LayerKind::Svm],
            LayerArg::Softmax => vec![LayerKind::Softmax],
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Compare analytic layer gradients against finite differences")]
struct Args {
    /// Layer or loss to check
    #[arg(long, value_enum, default_value_t = LayerArg::All)]
    layer: LayerArg,

    /// Seed for the random inputs
    #[arg(long, default_value = "231")]
    seed: u64,

    /// JSON file with `check`, `conv` and `pool` sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// Finite difference step
    #[arg(long)]
    epsilon: Option<f64>,

    /// Maximum accepted relative error
    #[arg(long)]
    tolerance: Option<f64>,

    /// Convolution stride
    #[arg(long)]
    stride: Option<usize>,

    /// Convolution zero padding
    #[arg(long)]
    pad: Option<usize>,

    /// Square pooling window size
    #[arg(long)]
    pool_size: Option<usize>,

    /// Pooling stride
    #[arg(long)]
    pool_stride: Option<usize>,

    /// Log every forward and backward pass
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FileConfig {
    check: GradientCheckConfig,
    conv: ConvParam,
    pool: PoolParam,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            check: GradientCheckConfig::default(),
            conv: ConvParam::new(1, 1),
            pool: PoolParam::default(),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = load_config(args.config.as_ref())?;

    // Command line flags override the config file
    if let Some(epsilon) = args.epsilon {
        config.check.epsilon = epsilon;
    }
    if let Some(tolerance) = args.tolerance {
        config.check.tolerance = tolerance;
    }
    if let Some(stride) = args.stride {
        config.conv.stride = stride;
    }
    if let Some(pad) = args.pad {
        config.conv.pad = pad;
    }
    if let Some(size) = args.pool_size {
        config.pool.pool_height = size;
        config.pool.pool_width = size;
    }
    if let Some(stride) = args.pool_stride {
        config.pool.stride = stride;
    }

    debug!(?config, "resolved configuration");

    let suite = GradientSuite::new(config.check)
        .with_conv(config.conv)
        .with_pool(config.pool)
        .with_seed(args.seed);

    let results = suite.run(&args.layer.kinds())?;

    println!("{}", "=".repeat(52).blue());
    println!("{}", "Gradient Check".bold().blue());
    println!("{}", "=".repeat(52).blue());
    println!(
        "epsilon = {:e}, tolerance = {:e}, seed = {}\n",
        config.check.epsilon, config.check.tolerance, args.seed
    );
    println!("{:<14} {:>10} {:>16} {:>8}", "Gradient", "Elements", "Rel. error", "Status");
    println!("{}", "-".repeat(52));

    for result in &results {
        let status = if result.passed {
            "PASS".green()
        } else {
            "FAIL".red().bold()
        };
        println!(
            "{:<14} {:>10} {:>16.3e} {:>8}",
            result.name, result.num_elements, result.rel_error, status
        );
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    println!();
    if failed > 0 {
        anyhow::bail!("{} of {} gradient checks failed", failed, results.len());
    }
    println!("{}", format!("All {} gradient checks passed", results.len()).green());

    Ok(())
}
