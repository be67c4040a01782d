//! Percentile statistics and min/max normalization of image intensities

use crate::io::configuration::NORM_EPSILON;
use ndarray::{Array3, ArrayViewMut2, Axis};

/// Finite samples of one image channel in ascending order
#[derive(Debug, Clone)]
pub struct SortedSamples {
    values: Vec<f32>,
}

impl SortedSamples {
    /// Collect and sort the finite values of an iterator
    pub fn new(values: impl IntoIterator<Item = f32>) -> Self {
        let mut values: Vec<f32> = values.into_iter().filter(|v| v.is_finite()).collect();
        values.sort_unstable_by(f32::total_cmp);
        Self { values }
    }

    /// Number of finite samples
    pub const fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no finite sample was collected
    pub const fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Percentile in `[0, 100]` with linear interpolation between neighbouring ranks
    ///
    /// Returns 0 for an empty sample set.
    pub fn percentile(&self, p: f64) -> f32 {
        let Some(last) = self.values.len().checked_sub(1) else {
            return 0.0;
        };

        let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let fraction = (rank - lower as f64) as f32;

        let low = self.values.get(lower).copied().unwrap_or(0.0);
        let high = self.values.get(upper).copied().unwrap_or(low);
        (high - low).mul_add(fraction, low)
    }
}

/// Sorted samples for every channel of a `(C, Y, X)` image
pub fn channel_samples(image: &Array3<f32>) -> Vec<SortedSamples> {
    image
        .axis_iter(Axis(0))
        .map(|channel| SortedSamples::new(channel.iter().copied()))
        .collect()
}

/// Map `low` to 0 and `high` to 1 in place
pub fn normalize_min_max(mut view: ArrayViewMut2<'_, f32>, low: f32, high: f32) {
    let scale = 1.0 / (high - low + NORM_EPSILON);
    view.mapv_inplace(|v| (v - low) * scale);
}

/// Normalize every channel of a `(C, Y, X)` image by its own percentiles
pub fn normalize_percentile(image: &Array3<f32>, low_percentile: f64, high_percentile: f64) -> Array3<f32> {
    let mut normalized = image.to_owned();
    let samples = channel_samples(image);

    for (channel, sorted) in normalized.axis_iter_mut(Axis(0)).zip(&samples) {
        normalize_min_max(
            channel,
            sorted.percentile(low_percentile),
            sorted.percentile(high_percentile),
        );
    }

    normalized
}
