//! Adam optimizer and plateau-based learning rate reduction

use crate::model::config::ReduceLrConfig;
use ndarray::{Array, ArrayD, Dimension, Zip};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-7;

/// Adam with one pair of moment estimates per parameter slot
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    step: i32,
    moments: Vec<Option<(ArrayD<f32>, ArrayD<f32>)>>,
}

impl Adam {
    /// Create an optimizer with the given initial learning rate
    pub const fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            step: 0,
            moments: Vec::new(),
        }
    }

    /// Current learning rate
    pub const fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Replace the learning rate
    pub const fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Number of started optimization steps
    pub const fn steps(&self) -> i32 {
        self.step
    }

    /// Advance the bias-correction counter; call once before updating the slots of a step
    pub const fn begin_step(&mut self) {
        self.step = self.step.saturating_add(1);
    }

    /// Update one parameter tensor in place from its gradient
    ///
    /// Every slot must always be used with tensors of the same shape.
    pub fn update<D: Dimension>(&mut self, slot: usize, param: &mut Array<f32, D>, grad: &Array<f32, D>) {
        let t = self.step.max(1);
        let step_size =
            self.learning_rate * (1.0 - BETA2.powi(t)).sqrt() / (1.0 - BETA1.powi(t));

        if self.moments.len() <= slot {
            self.moments.resize_with(slot + 1, || None);
        }
        let Some(entry) = self.moments.get_mut(slot) else {
            return;
        };
        let (first, second) = entry.get_or_insert_with(|| {
            (
                ArrayD::zeros(param.shape()),
                ArrayD::zeros(param.shape()),
            )
        });

        Zip::from(param.view_mut().into_dyn())
            .and(grad.view().into_dyn())
            .and(first)
            .and(second)
            .for_each(|p, &g, m, v| {
                let g = f64::from(g);
                let m_next = BETA1.mul_add(f64::from(*m), (1.0 - BETA1) * g);
                let v_next = BETA2.mul_add(f64::from(*v), (1.0 - BETA2) * g * g);
                *m = m_next as f32;
                *v = v_next as f32;
                *p -= (step_size * m_next / (v_next.sqrt() + EPSILON)) as f32;
            });
    }
}

/// Halves (by default) the learning rate after `patience` epochs without improvement
#[derive(Debug, Clone)]
pub struct PlateauSchedule {
    config: ReduceLrConfig,
    best: f64,
    wait: usize,
}

impl PlateauSchedule {
    /// Create a schedule that has seen no value yet
    pub const fn new(config: ReduceLrConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Record the monitored value of an epoch; returns whether the rate was reduced
    pub fn observe(&mut self, value: f64, optimizer: &mut Adam) -> bool {
        if value < self.best {
            self.best = value;
            self.wait = 0;
            return false;
        }

        self.wait += 1;
        if self.wait < self.config.patience {
            return false;
        }

        self.wait = 0;
        optimizer.set_learning_rate(optimizer.learning_rate() * self.config.factor);
        true
    }
}
