//! Single-layer convolutional restoration network with optional residual path and Laplace scale

use crate::io::error::{Result, shape_mismatch};
use crate::model::config::ModelConfig;
use crate::model::loss::LossGradient;
use ndarray::{Array1, Array4, ArrayView4, Axis, Zip, s};

/// Raw scale parameter whose softplus is 1
const UNIT_SCALE_PARAMETER: f32 = 0.541_324_85;

/// Trainable parameters, also used to carry their gradients
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkWeights {
    /// Convolution kernels shaped `(C_out, C_in, k, k)`
    pub kernels: Array4<f32>,
    /// Per-output-channel bias
    pub bias: Array1<f32>,
    /// Per-output-channel Laplace scale before the softplus
    pub scale: Option<Array1<f32>>,
}

/// Network output for a batch
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Restored images shaped `(N, C_out, Y, X)`
    pub mean: Array4<f32>,
    /// Laplace scale per output channel in probabilistic mode
    pub scale: Option<Array1<f32>>,
}

/// `k × k` convolution over all input channels with zero padding
///
/// With the residual path enabled the input is added to the output, so a
/// freshly initialised network is the identity.
#[derive(Debug, Clone)]
pub struct FilterNetwork {
    weights: NetworkWeights,
    residual: bool,
}

fn softplus(x: f32) -> f32 {
    if x > 20.0 { x } else { x.exp().ln_1p() }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// Output start, input start and length of the rows shared by a shifted pair
const fn overlap(extent: usize, offset: isize) -> Option<(usize, usize, usize)> {
    let shift = offset.unsigned_abs();
    if shift >= extent {
        return None;
    }
    let len = extent - shift;
    if offset >= 0 {
        Some((0, shift, len))
    } else {
        Some((shift, 0, len))
    }
}

impl FilterNetwork {
    /// Initialise parameters for a configuration
    ///
    /// Residual networks start with zero kernels; others start by averaging
    /// the input channels at the kernel centre.
    pub fn new(config: &ModelConfig) -> Self {
        let (c_out, c_in, k) = (
            config.n_channel_out(),
            config.n_channel_in(),
            config.kernel_size(),
        );
        let centre = k / 2;

        let mut kernels = Array4::zeros((c_out, c_in, k, k));
        if !config.residual() {
            let weight = 1.0 / c_in.max(1) as f32;
            for o in 0..c_out {
                for i in 0..c_in {
                    if let Some(w) = kernels.get_mut([o, i, centre, centre]) {
                        *w = weight;
                    }
                }
            }
        }

        let scale = config
            .probabilistic()
            .then(|| Array1::from_elem(c_out, UNIT_SCALE_PARAMETER));

        Self {
            weights: NetworkWeights {
                kernels,
                bias: Array1::zeros(c_out),
                scale,
            },
            residual: config.residual(),
        }
    }

    /// Restore a network from persisted parameters
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter shapes disagree with the configuration
    pub fn from_weights(weights: NetworkWeights, config: &ModelConfig) -> Result<Self> {
        let k = config.kernel_size();
        let expected = [config.n_channel_out(), config.n_channel_in(), k, k];
        if weights.kernels.shape() != expected {
            return Err(shape_mismatch("kernels", &expected, weights.kernels.shape()));
        }
        if weights.bias.len() != config.n_channel_out() {
            return Err(shape_mismatch(
                "bias",
                &[config.n_channel_out()],
                weights.bias.shape(),
            ));
        }
        match (&weights.scale, config.probabilistic()) {
            (Some(scale), true) if scale.len() == config.n_channel_out() => {}
            (None, false) => {}
            (scale, _) => {
                return Err(shape_mismatch(
                    "scale",
                    &[usize::from(config.probabilistic()) * config.n_channel_out()],
                    &[scale.as_ref().map_or(0, Array1::len)],
                ));
            }
        }

        Ok(Self {
            weights,
            residual: config.residual(),
        })
    }

    /// Current parameters
    pub const fn weights(&self) -> &NetworkWeights {
        &self.weights
    }

    /// Mutable parameters for optimizer updates
    pub const fn weights_mut(&mut self) -> &mut NetworkWeights {
        &mut self.weights
    }

    /// Laplace scale per output channel, if probabilistic
    pub fn scale(&self) -> Option<Array1<f32>> {
        self.weights.scale.as_ref().map(|s| s.mapv(softplus))
    }

    fn check_input(&self, input: &ArrayView4<'_, f32>) -> Result<()> {
        let c_in = self.weights.kernels.len_of(Axis(1));
        let channels = input.len_of(Axis(1));
        if channels == c_in {
            Ok(())
        } else {
            Err(shape_mismatch("input channels", &[c_in], &[channels]))
        }
    }

    /// Apply the network to a batch shaped `(N, C_in, Y, X)`
    ///
    /// # Errors
    ///
    /// Returns an error if the input channel count differs from the kernels
    pub fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Prediction> {
        self.check_input(&input)?;

        let (batch, _, height, width) = input.dim();
        let (c_out, c_in, k, _) = self.weights.kernels.dim();
        let radius = (k / 2) as isize;

        let mut mean = Array4::zeros((batch, c_out, height, width));
        for o in 0..c_out {
            let mut out = mean.slice_mut(s![.., o, .., ..]);
            out.fill(self.weights.bias.get(o).copied().unwrap_or(0.0));

            if self.residual && o < c_in {
                out.scaled_add(1.0, &input.slice(s![.., o, .., ..]));
            }

            for i in 0..c_in {
                for dy in 0..k {
                    let Some((out_y, in_y, rows)) = overlap(height, dy as isize - radius) else {
                        continue;
                    };
                    for dx in 0..k {
                        let Some((out_x, in_x, cols)) = overlap(width, dx as isize - radius)
                        else {
                            continue;
                        };
                        let weight = self
                            .weights
                            .kernels
                            .get([o, i, dy, dx])
                            .copied()
                            .unwrap_or(0.0);

                        out.slice_mut(s![.., out_y..out_y + rows, out_x..out_x + cols])
                            .scaled_add(
                                weight,
                                &input.slice(s![.., i, in_y..in_y + rows, in_x..in_x + cols]),
                            );
                    }
                }
            }
        }

        Ok(Prediction {
            mean,
            scale: self.scale(),
        })
    }

    /// Parameter gradients for a batch given the loss gradient of its outputs
    ///
    /// # Errors
    ///
    /// Returns an error if the input channel count differs from the kernels
    /// or the gradient does not match the output shape
    pub fn backward(
        &self,
        input: ArrayView4<'_, f32>,
        gradient: &LossGradient,
    ) -> Result<NetworkWeights> {
        self.check_input(&input)?;

        let (batch, _, height, width) = input.dim();
        let (c_out, c_in, k, _) = self.weights.kernels.dim();
        let radius = (k / 2) as isize;
        let expected = [batch, c_out, height, width];
        if gradient.mean.shape() != expected {
            return Err(shape_mismatch(
                "output gradient",
                &expected,
                gradient.mean.shape(),
            ));
        }

        let mut kernels = Array4::zeros(self.weights.kernels.raw_dim());
        let mut bias = Array1::zeros(c_out);

        for o in 0..c_out {
            let grad_out = gradient.mean.slice(s![.., o, .., ..]);
            if let Some(b) = bias.get_mut(o) {
                *b = grad_out.sum();
            }

            for i in 0..c_in {
                for dy in 0..k {
                    let Some((out_y, in_y, rows)) = overlap(height, dy as isize - radius) else {
                        continue;
                    };
                    for dx in 0..k {
                        let Some((out_x, in_x, cols)) = overlap(width, dx as isize - radius)
                        else {
                            continue;
                        };

                        let g = grad_out.slice(s![.., out_y..out_y + rows, out_x..out_x + cols]);
                        let v = input.slice(s![.., i, in_y..in_y + rows, in_x..in_x + cols]);
                        let total = Zip::from(&g).and(&v).fold(0.0_f64, |acc, &a, &b| {
                            f64::from(a).mul_add(f64::from(b), acc)
                        });

                        if let Some(w) = kernels.get_mut([o, i, dy, dx]) {
                            *w = total as f32;
                        }
                    }
                }
            }
        }

        let scale = match (&self.weights.scale, &gradient.scale) {
            (Some(raw), Some(grad_sigma)) => {
                let mut grad = grad_sigma.clone();
                Zip::from(&mut grad)
                    .and(raw)
                    .for_each(|g, &r| *g *= sigmoid(r));
                Some(grad)
            }
            (Some(raw), None) => Some(Array1::zeros(raw.len())),
            (None, _) => None,
        };

        Ok(NetworkWeights {
            kernels,
            bias,
            scale,
        })
    }
}
