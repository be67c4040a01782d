//! Deterministic train/validation partition of a persisted patch dataset

use crate::data::axes::Axes;
use crate::data::patches::PatchDataset;
use crate::io::archive::load_patch_dataset;
use crate::io::error::{Result, invalid_parameter};
use ndarray::{Array4, ArrayView4, Axis, s};
use std::path::Path;

/// Training and validation patches of one dataset
#[derive(Debug, Clone)]
pub struct TrainingData {
    x: Array4<f32>,
    y: Array4<f32>,
    x_val: Array4<f32>,
    y_val: Array4<f32>,
    axes: Axes,
}

/// Sizes of the training and validation subsets for `total` samples
///
/// `validation = round(total × validation_split)` with ties rounded to even,
/// and `training = total − validation`.
///
/// # Errors
///
/// Returns an error if `validation_split` lies outside `(0, 1)` or either
/// subset would be empty
pub fn split_counts(total: usize, validation_split: f64) -> Result<(usize, usize)> {
    if !(validation_split > 0.0 && validation_split < 1.0) {
        return Err(invalid_parameter(
            "validation_split",
            &validation_split,
            &"must lie strictly between 0 and 1",
        ));
    }

    let n_val = (total as f64 * validation_split).round_ties_even() as usize;
    let n_train = total.saturating_sub(n_val);
    if n_val == 0 || n_train == 0 {
        return Err(invalid_parameter(
            "validation_split",
            &validation_split,
            &format!("{total} sample(s) yield {n_train} training and {n_val} validation sample(s)"),
        ));
    }

    Ok((n_train, n_val))
}

/// Partition a dataset: the first samples train, the last `round(n × split)` validate
///
/// `n_images` optionally restricts the dataset to its first samples before
/// splitting.
///
/// # Errors
///
/// Returns an error if `n_images` is zero or the split leaves a subset empty
pub fn split_dataset(
    dataset: PatchDataset,
    validation_split: f64,
    n_images: Option<usize>,
) -> Result<TrainingData> {
    let available = dataset.len();
    let total = match n_images {
        Some(0) => {
            return Err(invalid_parameter(
                "n_images",
                &0,
                &"at least one sample must be used",
            ));
        }
        Some(limit) => limit.min(available),
        None => available,
    };

    let (n_train, _) = split_counts(total, validation_split)?;
    let (x, y, axes) = dataset.into_parts();

    Ok(TrainingData {
        x: x.slice(s![..n_train, .., .., ..]).to_owned(),
        y: y.slice(s![..n_train, .., .., ..]).to_owned(),
        x_val: x.slice(s![n_train..total, .., .., ..]).to_owned(),
        y_val: y.slice(s![n_train..total, .., .., ..]).to_owned(),
        axes,
    })
}

/// Load a persisted patch dataset and split it
///
/// # Errors
///
/// Returns an error if the archive is absent or malformed, or the split is invalid
pub fn load_training_data(
    path: &Path,
    validation_split: f64,
    n_images: Option<usize>,
) -> Result<TrainingData> {
    let dataset = load_patch_dataset(path)?;
    split_dataset(dataset, validation_split, n_images)
}

impl TrainingData {
    /// Training source and target patches
    pub fn train(&self) -> (ArrayView4<'_, f32>, ArrayView4<'_, f32>) {
        (self.x.view(), self.y.view())
    }

    /// Validation source and target patches
    pub fn validation(&self) -> (ArrayView4<'_, f32>, ArrayView4<'_, f32>) {
        (self.x_val.view(), self.y_val.view())
    }

    /// Axis layout of all four arrays
    pub const fn axes(&self) -> &Axes {
        &self.axes
    }

    /// Number of training samples
    pub fn train_len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    /// Number of validation samples
    pub fn validation_len(&self) -> usize {
        self.x_val.len_of(Axis(0))
    }

    /// Input and output channel counts read off the channel axis
    ///
    /// # Errors
    ///
    /// Returns an error if the axes do not match the array rank
    pub fn channels(&self) -> Result<(usize, usize)> {
        Ok((
            self.axes.channel_count(self.x.shape())?,
            self.axes.channel_count(self.y.shape())?,
        ))
    }

    /// Log sample counts, patch size, axes and channels
    ///
    /// # Errors
    ///
    /// Returns an error if the axes do not match the array rank
    pub fn log_summary(&self) -> Result<()> {
        let (n_in, n_out) = self.channels()?;
        let spatial: Vec<usize> = self
            .axes
            .as_str()
            .chars()
            .zip(self.x.shape())
            .filter(|(axis, _)| matches!(axis, 'Y' | 'X'))
            .map(|(_, &extent)| extent)
            .collect();

        log::info!("number of training images:   {}", self.train_len());
        log::info!("number of validation images: {}", self.validation_len());
        log::info!("image size ({}D):            {spatial:?}", spatial.len());
        log::info!("axes:                        {}", self.axes);
        log::info!("channels in / out:           {n_in} / {n_out}");
        Ok(())
    }
}
