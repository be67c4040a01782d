//! Hyperparameter record of a restoration model, persisted as `config.json`

use crate::data::axes::Axes;
use crate::io::configuration::{
    DEFAULT_BATCH_SIZE, DEFAULT_KERNEL_SIZE, DEFAULT_LEARNING_RATE, DEFAULT_SEED,
    DEFAULT_STEPS_PER_EPOCH, DEFAULT_TRAIN_EPOCHS, REDUCE_LR_FACTOR, REDUCE_LR_PATIENCE,
};
use crate::io::error::{PipelineError, Result, WithPath};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Training objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Mean absolute error
    Mae,
    /// Mean squared error
    Mse,
    /// Laplace negative log-likelihood with a learned scale
    Laplace,
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mae => "mae",
            Self::Mse => "mse",
            Self::Laplace => "laplace",
        })
    }
}

/// Learning rate reduction when validation loss stops improving
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReduceLrConfig {
    /// Multiplier applied to the learning rate
    pub factor: f64,
    /// Epochs without improvement before reducing
    pub patience: usize,
}

impl Default for ReduceLrConfig {
    fn default() -> Self {
        Self {
            factor: REDUCE_LR_FACTOR,
            patience: REDUCE_LR_PATIENCE,
        }
    }
}

/// Model hyperparameters
///
/// Built with [`ModelConfig::new`] and the consuming `with_*` setters, then
/// read-only. Channel counts come from the training data, everything else
/// defaults to the values in [`crate::io::configuration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    axes: Axes,
    n_dim: usize,
    n_channel_in: usize,
    n_channel_out: usize,
    probabilistic: bool,
    kernel_size: usize,
    residual: bool,
    train_loss: LossKind,
    train_epochs: usize,
    train_steps_per_epoch: usize,
    train_batch_size: usize,
    train_learning_rate: f64,
    train_reduce_lr: Option<ReduceLrConfig>,
    seed: u64,
}

impl ModelConfig {
    /// Configuration for data with the given axes and channel counts
    ///
    /// The sample axis is dropped and a channel axis is added when missing.
    /// The residual connection is enabled whenever input and output channel
    /// counts agree.
    pub fn new(axes: &Axes, n_channel_in: usize, n_channel_out: usize) -> Self {
        let without_samples = axes.without_samples();
        let axes = if without_samples.has_channel() {
            without_samples
        } else {
            Axes::parse(&format!("C{without_samples}")).unwrap_or(without_samples)
        };

        Self {
            n_dim: axes.spatial_dims(),
            axes,
            n_channel_in,
            n_channel_out,
            probabilistic: false,
            kernel_size: DEFAULT_KERNEL_SIZE,
            residual: n_channel_in == n_channel_out,
            train_loss: LossKind::Mae,
            train_epochs: DEFAULT_TRAIN_EPOCHS,
            train_steps_per_epoch: DEFAULT_STEPS_PER_EPOCH,
            train_batch_size: DEFAULT_BATCH_SIZE,
            train_learning_rate: DEFAULT_LEARNING_RATE,
            train_reduce_lr: Some(ReduceLrConfig::default()),
            seed: DEFAULT_SEED,
        }
    }

    /// Predict a Laplace scale next to the mean; switches the loss to `laplace`
    pub const fn with_probabilistic(mut self, probabilistic: bool) -> Self {
        self.probabilistic = probabilistic;
        self.train_loss = if probabilistic {
            LossKind::Laplace
        } else {
            LossKind::Mae
        };
        self
    }

    /// Override the training loss
    pub const fn with_train_loss(mut self, loss: LossKind) -> Self {
        self.train_loss = loss;
        self
    }

    /// Override the kernel edge length
    pub const fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Enable or disable the identity skip connection
    pub const fn with_residual(mut self, residual: bool) -> Self {
        self.residual = residual;
        self
    }

    /// Override the number of epochs
    pub const fn with_train_epochs(mut self, epochs: usize) -> Self {
        self.train_epochs = epochs;
        self
    }

    /// Override the number of mini-batches per epoch
    pub const fn with_train_steps_per_epoch(mut self, steps: usize) -> Self {
        self.train_steps_per_epoch = steps;
        self
    }

    /// Override the mini-batch size
    pub const fn with_train_batch_size(mut self, batch_size: usize) -> Self {
        self.train_batch_size = batch_size;
        self
    }

    /// Override the initial learning rate
    pub const fn with_train_learning_rate(mut self, learning_rate: f64) -> Self {
        self.train_learning_rate = learning_rate;
        self
    }

    /// Override or disable the plateau schedule
    pub const fn with_train_reduce_lr(mut self, reduce_lr: Option<ReduceLrConfig>) -> Self {
        self.train_reduce_lr = reduce_lr;
        self
    }

    /// Override the batching seed
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Axis layout without the sample axis
    pub const fn axes(&self) -> &Axes {
        &self.axes
    }

    /// Number of spatial dimensions
    pub const fn n_dim(&self) -> usize {
        self.n_dim
    }

    /// Input channel count
    pub const fn n_channel_in(&self) -> usize {
        self.n_channel_in
    }

    /// Output channel count
    pub const fn n_channel_out(&self) -> usize {
        self.n_channel_out
    }

    /// Whether a Laplace scale is predicted
    pub const fn probabilistic(&self) -> bool {
        self.probabilistic
    }

    /// Kernel edge length
    pub const fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Whether the input is added to the output
    pub const fn residual(&self) -> bool {
        self.residual
    }

    /// Training loss
    pub const fn train_loss(&self) -> LossKind {
        self.train_loss
    }

    /// Number of epochs
    pub const fn train_epochs(&self) -> usize {
        self.train_epochs
    }

    /// Mini-batches per epoch
    pub const fn train_steps_per_epoch(&self) -> usize {
        self.train_steps_per_epoch
    }

    /// Mini-batch size
    pub const fn train_batch_size(&self) -> usize {
        self.train_batch_size
    }

    /// Initial learning rate
    pub const fn train_learning_rate(&self) -> f64 {
        self.train_learning_rate
    }

    /// Plateau schedule, if enabled
    pub const fn train_reduce_lr(&self) -> Option<ReduceLrConfig> {
        self.train_reduce_lr
    }

    /// Batching seed
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Names of every field holding an invalid value
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        let mut invalid = Vec::new();

        if self.axes.has_samples() || !self.axes.has_channel() {
            invalid.push("axes");
        }
        if self.n_dim != 2 {
            invalid.push("n_dim");
        }
        if self.n_channel_in == 0 {
            invalid.push("n_channel_in");
        }
        if self.n_channel_out == 0 {
            invalid.push("n_channel_out");
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            invalid.push("kernel_size");
        }
        if self.residual && self.n_channel_in != self.n_channel_out {
            invalid.push("residual");
        }
        if self.probabilistic != (self.train_loss == LossKind::Laplace) {
            invalid.push("train_loss");
        }
        if self.train_epochs == 0 {
            invalid.push("train_epochs");
        }
        if self.train_steps_per_epoch == 0 {
            invalid.push("train_steps_per_epoch");
        }
        if self.train_batch_size == 0 {
            invalid.push("train_batch_size");
        }
        if !(self.train_learning_rate.is_finite() && self.train_learning_rate > 0.0) {
            invalid.push("train_learning_rate");
        }
        if let Some(reduce_lr) = self.train_reduce_lr
            && !(reduce_lr.factor > 0.0 && reduce_lr.factor < 1.0)
        {
            invalid.push("train_reduce_lr");
        }

        invalid
    }

    /// Check every field at once
    ///
    /// # Errors
    ///
    /// Returns an error naming all invalid fields
    pub fn validate(&self) -> Result<()> {
        let invalid = self.invalid_fields();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InvalidParameter {
                parameter: "model config",
                value: invalid.join(", "),
                reason: "fields hold invalid values".to_string(),
            })
        }
    }

    /// Write as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| {
            PipelineError::Serialization {
                path: path.to_path_buf(),
                source,
            }
        })?;
        std::fs::write(path, text).with_path(path, "write config")
    }

    /// Read and validate a configuration written by [`ModelConfig::save_json`]
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path, "read config")?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| PipelineError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ModelConfig(axes={}, n_dim={}, channels={}->{}, probabilistic={}, kernel={}, residual={}, loss={}, epochs={}, steps/epoch={}, batch={}, lr={})",
            self.axes,
            self.n_dim,
            self.n_channel_in,
            self.n_channel_out,
            self.probabilistic,
            self.kernel_size,
            self.residual,
            self.train_loss,
            self.train_epochs,
            self.train_steps_per_epoch,
            self.train_batch_size,
            self.train_learning_rate
        )
    }
}
