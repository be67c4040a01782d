//! Restoration model: a filter network bound to a model directory, with training and prediction

use crate::io::archive::{load_weights, save_weights};
use crate::io::configuration::{CONFIG_FILE, HISTORY_FILE, WEIGHTS_BEST_FILE, WEIGHTS_LAST_FILE};
use crate::io::error::{
    Result, WithPath, computation_error, invalid_parameter, invalid_source, shape_mismatch,
};
use crate::io::progress::ProgressManager;
use crate::model::config::ModelConfig;
use crate::model::history::History;
use crate::model::loss::{LossValues, MetricAccumulator, loss_and_gradient, loss_values};
use crate::model::network::FilterNetwork;
use crate::model::optimizer::{Adam, PlateauSchedule};
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use rand::seq::SliceRandom;
use rand::{SeedableRng, rngs::StdRng};
use std::path::{Path, PathBuf};

/// A configured network persisted under `<basedir>/<name>/`
///
/// The directory holds `config.json`, `weights_last.npz`, `weights_best.npz`
/// and, after training, `history.json`.
#[derive(Debug, Clone)]
pub struct RestorationModel {
    config: ModelConfig,
    name: String,
    basedir: PathBuf,
    network: FilterNetwork,
}

/// Draws mini-batches from a shuffled order, reshuffling once exhausted
struct BatchSampler {
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl BatchSampler {
    fn new(samples: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..samples).collect();
        order.shuffle(&mut rng);
        Self {
            order,
            cursor: 0,
            rng,
        }
    }

    fn next_batch(&mut self, size: usize) -> Vec<usize> {
        let mut batch = Vec::with_capacity(size);
        while batch.len() < size {
            if self.cursor >= self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
            }
            let Some(&index) = self.order.get(self.cursor) else {
                break;
            };
            batch.push(index);
            self.cursor += 1;
        }
        batch
    }
}

impl RestorationModel {
    /// Create a fresh model and write its configuration to `<basedir>/<name>/config.json`
    ///
    /// An existing model directory of the same name is reused and its
    /// configuration overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the name is empty,
    /// or the directory or configuration cannot be written
    pub fn new(config: ModelConfig, name: &str, basedir: &Path) -> Result<Self> {
        config.validate()?;
        if name.trim().is_empty() {
            return Err(invalid_parameter(
                "name",
                &name,
                &"model name must not be empty",
            ));
        }

        let model = Self {
            network: FilterNetwork::new(&config),
            config,
            name: name.to_string(),
            basedir: basedir.to_path_buf(),
        };

        let logdir = model.logdir();
        let config_path = logdir.join(CONFIG_FILE);
        if config_path.exists() {
            log::warn!(
                "Output path {} already exists; configuration will be overwritten",
                logdir.display()
            );
        }
        std::fs::create_dir_all(&logdir).with_path(&logdir, "create model directory")?;
        model.config.save_json(&config_path)?;

        log::info!("Created model '{}' with {}", model.name, model.config);
        Ok(model)
    }

    /// Open a model created earlier, restoring its best weights if present and its last weights otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is missing or invalid, no
    /// weights were saved, or the weights disagree with the configuration
    pub fn load(name: &str, basedir: &Path) -> Result<Self> {
        let logdir = basedir.join(name);
        let config = ModelConfig::load_json(&logdir.join(CONFIG_FILE))?;

        let weights_path = [WEIGHTS_BEST_FILE, WEIGHTS_LAST_FILE]
            .into_iter()
            .map(|file| logdir.join(file))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                invalid_source(&format!(
                    "model directory '{}' holds no saved weights",
                    logdir.display()
                ))
            })?;

        let network = FilterNetwork::from_weights(load_weights(&weights_path)?, &config)?;
        log::info!(
            "Loaded model '{name}' from {}",
            weights_path.display()
        );

        Ok(Self {
            config,
            name: name.to_string(),
            basedir: basedir.to_path_buf(),
            network,
        })
    }

    /// Model configuration
    pub const fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the model files
    pub fn logdir(&self) -> PathBuf {
        self.basedir.join(&self.name)
    }

    /// Underlying network
    pub const fn network(&self) -> &FilterNetwork {
        &self.network
    }

    fn check_pair(
        &self,
        context: &'static str,
        x: &ArrayView4<'_, f32>,
        y: &ArrayView4<'_, f32>,
    ) -> Result<()> {
        let (n, c_in, height, width) = x.dim();
        let (m, c_out, height_y, width_y) = y.dim();

        if c_in != self.config.n_channel_in() {
            return Err(shape_mismatch(
                context,
                &[self.config.n_channel_in()],
                &[c_in],
            ));
        }
        if c_out != self.config.n_channel_out() {
            return Err(shape_mismatch(
                context,
                &[self.config.n_channel_out()],
                &[c_out],
            ));
        }
        if (n, height, width) != (m, height_y, width_y) {
            return Err(shape_mismatch(
                context,
                &[n, c_out, height, width],
                y.shape(),
            ));
        }
        if n == 0 {
            return Err(invalid_source(&format!("{context} holds no samples")));
        }
        Ok(())
    }

    fn train_step(
        &mut self,
        x: ArrayView4<'_, f32>,
        y: ArrayView4<'_, f32>,
        optimizer: &mut Adam,
    ) -> Result<LossValues> {
        let prediction = self.network.forward(x)?;
        let (values, gradient) = loss_and_gradient(self.config.train_loss(), &prediction, y)?;
        let grads = self.network.backward(x, &gradient)?;

        optimizer.begin_step();
        let weights = self.network.weights_mut();
        optimizer.update(0, &mut weights.kernels, &grads.kernels);
        optimizer.update(1, &mut weights.bias, &grads.bias);
        if let (Some(scale), Some(grad)) = (weights.scale.as_mut(), grads.scale.as_ref()) {
            optimizer.update(2, scale, grad);
        }

        Ok(values)
    }

    /// Train on `(x, y)` while monitoring `validation`, returning the per-epoch history
    ///
    /// Every epoch runs `train_steps_per_epoch` mini-batches, then evaluates
    /// the validation data. `weights_last.npz` is written after every epoch,
    /// `weights_best.npz` whenever `val_loss` improves, and `history.json`
    /// once training ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the data disagrees with the configured channel
    /// counts, either subset is empty, the loss diverges, or a model file
    /// cannot be written
    pub fn train(
        &mut self,
        x: ArrayView4<'_, f32>,
        y: ArrayView4<'_, f32>,
        validation: (ArrayView4<'_, f32>, ArrayView4<'_, f32>),
        progress: &mut ProgressManager,
    ) -> Result<History> {
        let (x_val, y_val) = validation;
        self.check_pair("training data", &x, &y)?;
        self.check_pair("validation data", &x_val, &y_val)?;

        let samples = x.len_of(Axis(0));
        let epochs = self.config.train_epochs();
        let steps = self.config.train_steps_per_epoch();
        let batch_size = self.config.train_batch_size().min(samples);
        let logdir = self.logdir();

        let mut sampler = BatchSampler::new(samples, self.config.seed());
        let mut optimizer = Adam::new(self.config.train_learning_rate());
        let mut schedule = self.config.train_reduce_lr().map(PlateauSchedule::new);
        let mut history = History::new();
        let mut best_val_loss = f64::INFINITY;

        log::info!(
            "Training '{}' for {epochs} epochs of {steps} steps with batch size {batch_size}",
            self.name
        );

        progress.initialize("Training", epochs);
        for epoch in 1..=epochs {
            progress.start_unit(&format!("Epoch {epoch}/{epochs}"), steps);

            let mut metrics = MetricAccumulator::default();
            for step in 1..=steps {
                let indices = sampler.next_batch(batch_size);
                let x_batch: Array4<f32> = x.select(Axis(0), &indices);
                let y_batch: Array4<f32> = y.select(Axis(0), &indices);

                let values = self.train_step(x_batch.view(), y_batch.view(), &mut optimizer)?;
                metrics.add(&values, indices.len());
                progress.update_step(step);
            }

            let train = metrics.mean();
            if !train.loss.is_finite() {
                return Err(computation_error(
                    "training",
                    &format!("loss became {} in epoch {epoch}", train.loss),
                ));
            }
            let val = self.evaluate(x_val, y_val)?;
            let learning_rate = optimizer.learning_rate();

            history.record_epoch(&[
                ("loss", train.loss),
                ("mse", train.mse),
                ("mae", train.mae),
                ("val_loss", val.loss),
                ("val_mse", val.mse),
                ("val_mae", val.mae),
                ("lr", learning_rate),
            ]);
            log::info!(
                "Epoch {epoch}/{epochs}: loss={:.5} mse={:.5} mae={:.5} val_loss={:.5} val_mse={:.5} val_mae={:.5} lr={learning_rate:.2e}",
                train.loss,
                train.mse,
                train.mae,
                val.loss,
                val.mse,
                val.mae
            );

            save_weights(&logdir.join(WEIGHTS_LAST_FILE), self.network.weights())?;
            if val.loss < best_val_loss {
                best_val_loss = val.loss;
                save_weights(&logdir.join(WEIGHTS_BEST_FILE), self.network.weights())?;
                log::debug!("val_loss improved to {:.5}, saved best weights", val.loss);
            }

            if let Some(ref mut schedule) = schedule
                && schedule.observe(val.loss, &mut optimizer)
            {
                log::info!(
                    "Reducing learning rate to {:.2e}",
                    optimizer.learning_rate()
                );
            }

            progress.set_status(&format!("val_loss {:.4}", val.loss));
            progress.complete_unit();
        }
        progress.finish();

        history.save_json(&logdir.join(HISTORY_FILE))?;
        Ok(history)
    }

    /// Mean loss and metrics over a dataset, evaluated in mini-batches
    ///
    /// # Errors
    ///
    /// Returns an error if the data disagrees with the configured channel
    /// counts or holds no samples
    pub fn evaluate(&self, x: ArrayView4<'_, f32>, y: ArrayView4<'_, f32>) -> Result<LossValues> {
        self.check_pair("evaluation data", &x, &y)?;

        let chunk = self.config.train_batch_size().max(1);
        let mut metrics = MetricAccumulator::default();
        for (x_chunk, y_chunk) in x
            .axis_chunks_iter(Axis(0), chunk)
            .zip(y.axis_chunks_iter(Axis(0), chunk))
        {
            let prediction = self.network.forward(x_chunk)?;
            let values = loss_values(self.config.train_loss(), &prediction, y_chunk)?;
            metrics.add(&values, x_chunk.len_of(Axis(0)));
        }
        Ok(metrics.mean())
    }

    /// Restore one `(C, Y, X)` image, returning the predicted mean
    ///
    /// # Errors
    ///
    /// Returns an error if the channel count differs from the configuration
    pub fn predict(&self, image: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let channels = image.len_of(Axis(0));
        if channels != self.config.n_channel_in() {
            return Err(shape_mismatch(
                "prediction input",
                &[self.config.n_channel_in()],
                &[channels],
            ));
        }

        let prediction = self.network.forward(image.insert_axis(Axis(0)))?;
        Ok(prediction.mean.index_axis_move(Axis(0), 0))
    }
}
