//! Training losses with their gradients, and running metric averages

use crate::io::error::{Result, computation_error, shape_mismatch};
use crate::model::config::LossKind;
use crate::model::network::Prediction;
use ndarray::{Array1, Array4, ArrayView4, Axis, Zip};
use std::f64::consts::LN_2;

/// Loss of the configured objective plus the two reference metrics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossValues {
    /// Value of the training objective
    pub loss: f64,
    /// Mean squared error of the predicted mean
    pub mse: f64,
    /// Mean absolute error of the predicted mean
    pub mae: f64,
}

/// Gradient of the loss with respect to the network outputs
#[derive(Debug, Clone)]
pub struct LossGradient {
    /// Gradient with respect to the predicted mean
    pub mean: Array4<f32>,
    /// Gradient with respect to the per-channel Laplace scale
    pub scale: Option<Array1<f32>>,
}

/// Sample-weighted running average of [`LossValues`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricAccumulator {
    sum: LossValues,
    samples: usize,
}

impl MetricAccumulator {
    /// Add the values of one batch holding `samples` samples
    pub fn add(&mut self, values: &LossValues, samples: usize) {
        let weight = samples as f64;
        self.sum.loss += values.loss * weight;
        self.sum.mse += values.mse * weight;
        self.sum.mae += values.mae * weight;
        self.samples += samples;
    }

    /// Average over every added sample
    pub fn mean(&self) -> LossValues {
        if self.samples == 0 {
            return LossValues::default();
        }
        let weight = self.samples as f64;
        LossValues {
            loss: self.sum.loss / weight,
            mse: self.sum.mse / weight,
            mae: self.sum.mae / weight,
        }
    }
}

const fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Evaluate the loss and its gradient for one batch
///
/// The Laplace objective is `|μ − y| / σ + ln σ + ln 2` averaged over all
/// elements, with one σ per output channel.
///
/// # Errors
///
/// Returns an error if prediction and target differ in shape, the batch is
/// empty, or the Laplace loss is requested without a predicted scale
pub fn loss_and_gradient(
    kind: LossKind,
    prediction: &Prediction,
    target: ArrayView4<'_, f32>,
) -> Result<(LossValues, LossGradient)> {
    let mean = &prediction.mean;
    if mean.shape() != target.shape() {
        return Err(shape_mismatch(
            "prediction/target",
            target.shape(),
            mean.shape(),
        ));
    }
    if mean.is_empty() {
        return Err(computation_error("loss", &"batch holds no elements"));
    }

    let sigmas: Vec<f64> = match kind {
        LossKind::Laplace => prediction
            .scale
            .as_ref()
            .ok_or_else(|| computation_error("laplace loss", &"network predicts no scale"))?
            .iter()
            .map(|&s| f64::from(s))
            .collect(),
        LossKind::Mae | LossKind::Mse => Vec::new(),
    };

    let n = mean.len() as f64;
    let mut grad_mean = Array4::<f32>::zeros(mean.raw_dim());
    let mut grad_sigma = vec![0.0_f64; mean.len_of(Axis(1))];
    let (mut sum_abs, mut sum_sq, mut sum_nll) = (0.0_f64, 0.0_f64, 0.0_f64);

    Zip::indexed(&mut grad_mean)
        .and(mean)
        .and(&target)
        .for_each(|(_, c, _, _), grad, &m, &t| {
            let diff = f64::from(m) - f64::from(t);
            sum_abs += diff.abs();
            sum_sq += diff * diff;

            let g = match kind {
                LossKind::Mae => sign(diff) / n,
                LossKind::Mse => 2.0 * diff / n,
                LossKind::Laplace => {
                    let sigma = sigmas.get(c).copied().unwrap_or(1.0);
                    sum_nll += diff.abs() / sigma + sigma.ln() + LN_2;
                    if let Some(slot) = grad_sigma.get_mut(c) {
                        *slot += (1.0 / sigma - diff.abs() / (sigma * sigma)) / n;
                    }
                    sign(diff) / (sigma * n)
                }
            };
            *grad = g as f32;
        });

    let values = LossValues {
        loss: match kind {
            LossKind::Mae => sum_abs / n,
            LossKind::Mse => sum_sq / n,
            LossKind::Laplace => sum_nll / n,
        },
        mse: sum_sq / n,
        mae: sum_abs / n,
    };

    let scale = (kind == LossKind::Laplace)
        .then(|| grad_sigma.iter().map(|&g| g as f32).collect::<Array1<f32>>());

    Ok((
        values,
        LossGradient {
            mean: grad_mean,
            scale,
        },
    ))
}

/// Evaluate the loss without keeping the gradient
///
/// # Errors
///
/// Same conditions as [`loss_and_gradient`]
pub fn loss_values(
    kind: LossKind,
    prediction: &Prediction,
    target: ArrayView4<'_, f32>,
) -> Result<LossValues> {
    loss_and_gradient(kind, prediction, target).map(|(values, _)| values)
}
