//! Paired patch sampling from raw images into a normalized `SCYX` dataset

use crate::data::axes::Axes;
use crate::data::normalize::{SortedSamples, channel_samples, normalize_min_max};
use crate::data::raw::RawData;
use crate::io::archive::save_training_data;
use crate::io::configuration::{
    BACKGROUND_PERCENTILE, BACKGROUND_THRESHOLD, DATASET_AXES, DEFAULT_PATCHES_PER_IMAGE,
    DEFAULT_PATCH_SIZE, DEFAULT_SEED, NORM_HIGH_PERCENTILES, NORM_LOW_PERCENTILES,
};
use crate::io::error::{Result, invalid_parameter, invalid_source, shape_mismatch};
use crate::io::progress::ProgressManager;
use ndarray::{Array2, Array3, Array4, ArrayD, Axis, IxDyn, Ix3, s};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::path::Path;

/// Rejects patches whose target is mostly background
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundFilter {
    /// Fraction of the reference intensity the neighbourhood maximum must exceed
    pub threshold: f32,
    /// Percentile of the whole target used as reference intensity
    pub percentile: f64,
}

impl Default for BackgroundFilter {
    fn default() -> Self {
        Self {
            threshold: BACKGROUND_THRESHOLD,
            percentile: BACKGROUND_PERCENTILE,
        }
    }
}

/// Ranges from which each patch draws its normalization percentiles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileRange {
    /// Inclusive range of the low percentile
    pub low: (f64, f64),
    /// Inclusive range of the high percentile
    pub high: (f64, f64),
}

impl Default for PercentileRange {
    fn default() -> Self {
        Self {
            low: NORM_LOW_PERCENTILES,
            high: NORM_HIGH_PERCENTILES,
        }
    }
}

/// Patch sampling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PatchConfig {
    /// Patch extent as `(height, width)`
    pub patch_size: (usize, usize),
    /// Patches sampled from every image pair
    pub n_patches_per_image: usize,
    /// Seed for position sampling, percentile sampling and shuffling
    pub seed: u64,
    /// Optional foreground requirement on sampled positions
    pub patch_filter: Option<BackgroundFilter>,
    /// Per-patch normalization percentiles
    pub normalization: PercentileRange,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_size: (DEFAULT_PATCH_SIZE, DEFAULT_PATCH_SIZE),
            n_patches_per_image: DEFAULT_PATCHES_PER_IMAGE,
            seed: DEFAULT_SEED,
            patch_filter: Some(BackgroundFilter::default()),
            normalization: PercentileRange::default(),
        }
    }
}

impl PatchConfig {
    /// Check that the configuration can produce at least one patch
    ///
    /// # Errors
    ///
    /// Returns an error if the patch size or count is zero, or a percentile
    /// range is reversed or outside `[0, 100]`
    pub fn validate(&self) -> Result<()> {
        let (height, width) = self.patch_size;
        if height == 0 || width == 0 {
            return Err(invalid_parameter(
                "patch_size",
                &format!("{height}x{width}"),
                &"patch extents must be positive",
            ));
        }
        if self.n_patches_per_image == 0 {
            return Err(invalid_parameter(
                "n_patches_per_image",
                &self.n_patches_per_image,
                &"at least one patch per image is required",
            ));
        }
        for (name, (low, high)) in [
            ("normalization.low", self.normalization.low),
            ("normalization.high", self.normalization.high),
        ] {
            if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) || low > high {
                return Err(invalid_parameter(
                    name,
                    &format!("({low}, {high})"),
                    &"percentile range must be ordered and within [0, 100]",
                ));
            }
        }
        Ok(())
    }
}

/// Paired source/target patches in `SCYX` layout
///
/// Source and target always hold the same number of equally-shaped patches.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchDataset {
    x: Array4<f32>,
    y: Array4<f32>,
    axes: Axes,
}

impl PatchDataset {
    /// Build a dataset, enforcing the pairing invariant
    ///
    /// # Errors
    ///
    /// Returns an error if `axes` is not `SCYX` or source and target shapes
    /// differ
    pub fn new(x: Array4<f32>, y: Array4<f32>, axes: Axes) -> Result<Self> {
        let dataset = Self { x, y, axes };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Check the pairing invariant
    ///
    /// # Errors
    ///
    /// Returns an error if `axes` is not `SCYX` or source and target shapes
    /// differ
    pub fn validate(&self) -> Result<()> {
        if self.axes.as_str() != DATASET_AXES {
            return Err(invalid_parameter(
                "axes",
                &self.axes,
                &format!("patch datasets are laid out as {DATASET_AXES}"),
            ));
        }
        self.axes.check_rank(self.x.shape(), "patch dataset")?;
        if self.x.shape() != self.y.shape() {
            return Err(shape_mismatch(
                "source/target patches",
                self.x.shape(),
                self.y.shape(),
            ));
        }
        Ok(())
    }

    /// Source patches
    pub const fn x(&self) -> &Array4<f32> {
        &self.x
    }

    /// Target patches
    pub const fn y(&self) -> &Array4<f32> {
        &self.y
    }

    /// Axis layout label
    pub const fn axes(&self) -> &Axes {
        &self.axes
    }

    /// Number of patch pairs
    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    /// Whether the dataset holds no patches
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into `(x, y, axes)`
    pub fn into_parts(self) -> (Array4<f32>, Array4<f32>, Axes) {
        (self.x, self.y, self.axes)
    }
}

/// Reorder a raw image into `(C, Y, X)`, inserting a unit channel axis when absent
///
/// # Errors
///
/// Returns an error if the image rank does not match `axes`
pub fn to_cyx(image: ArrayD<f32>, axes: &Axes) -> Result<Array3<f32>> {
    axes.check_rank(image.shape(), "raw image")?;

    let mut order = Vec::with_capacity(3);
    order.extend(axes.index_of('C'));
    order.extend(axes.index_of('Y'));
    order.extend(axes.index_of('X'));

    let mut permuted = image.permuted_axes(IxDyn(&order));
    if !axes.has_channel() {
        permuted.insert_axis_inplace(Axis(0));
    }

    let cyx = permuted.into_dimensionality::<Ix3>()?;
    Ok(cyx.as_standard_layout().into_owned())
}

/// Top-left corners of every patch position that passes the background filter
pub fn valid_patch_corners(
    target: &Array3<f32>,
    patch_size: (usize, usize),
    filter: Option<&BackgroundFilter>,
) -> Vec<(usize, usize)> {
    let (_, height, width) = target.dim();
    let (patch_h, patch_w) = patch_size;
    if patch_h > height || patch_w > width {
        return Vec::new();
    }

    let rows = 0..=height - patch_h;
    let cols = 0..=width - patch_w;

    let Some(filter) = filter else {
        return rows
            .flat_map(|r| cols.clone().map(move |c| (r, c)))
            .collect();
    };

    let reference = SortedSamples::new(target.iter().copied()).percentile(filter.percentile);
    let threshold = filter.threshold * reference;

    let channel_max = target.fold_axis(Axis(0), f32::NEG_INFINITY, |&acc, &v| acc.max(v));
    let neighbourhood = max_filter(&channel_max, ((patch_h / 2).max(1), (patch_w / 2).max(1)));

    rows.flat_map(|r| cols.clone().map(move |c| (r, c)))
        .filter(|&(r, c)| {
            neighbourhood
                .get((r + patch_h / 2, c + patch_w / 2))
                .is_some_and(|&v| v > threshold)
        })
        .collect()
}

// Separable sliding maximum over a centred `window` neighbourhood
fn max_filter(plane: &Array2<f32>, window: (usize, usize)) -> Array2<f32> {
    let along_rows = sliding_max(plane, Axis(0), window.0);
    sliding_max(&along_rows, Axis(1), window.1)
}

fn sliding_max(plane: &Array2<f32>, axis: Axis, window: usize) -> Array2<f32> {
    let extent = plane.len_of(axis);
    let before = window / 2;
    let after = window - 1 - before;

    let mut out = Array2::from_elem(plane.raw_dim(), f32::NEG_INFINITY);
    for (mut out_lane, lane) in out.lanes_mut(axis).into_iter().zip(plane.lanes(axis)) {
        for i in 0..extent {
            let start = i.saturating_sub(before);
            let end = (i + after + 1).min(extent);
            let peak = lane
                .slice(s![start..end])
                .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            if let Some(slot) = out_lane.get_mut(i) {
                *slot = peak;
            }
        }
    }
    out
}

/// Sample `n_patches_per_image` normalized patch pairs from one `(C, Y, X)` image pair
///
/// Positions are drawn without replacement when enough valid positions exist
/// and with replacement otherwise.
///
/// # Errors
///
/// Returns an error if:
/// - Source and target differ in shape
/// - The patch is larger than the image
/// - The background filter admits no position
pub fn sample_patch_pairs(
    source: &Array3<f32>,
    target: &Array3<f32>,
    config: &PatchConfig,
    rng: &mut StdRng,
) -> Result<(Array4<f32>, Array4<f32>)> {
    if source.shape() != target.shape() {
        return Err(shape_mismatch(
            "source/target pair",
            target.shape(),
            source.shape(),
        ));
    }

    let (channels, height, width) = source.dim();
    let (patch_h, patch_w) = config.patch_size;
    if patch_h > height || patch_w > width {
        return Err(invalid_parameter(
            "patch_size",
            &format!("{patch_h}x{patch_w}"),
            &format!("larger than image of {height}x{width} pixels"),
        ));
    }

    let corners = valid_patch_corners(target, config.patch_size, config.patch_filter.as_ref());
    if corners.is_empty() {
        return Err(invalid_source(
            &"background filter left no region to sample patches from",
        ));
    }

    let n = config.n_patches_per_image;
    let chosen: Vec<(usize, usize)> = if corners.len() >= n {
        rand::seq::index::sample(rng, corners.len(), n)
            .into_iter()
            .filter_map(|i| corners.get(i).copied())
            .collect()
    } else {
        log::debug!(
            "Only {} valid positions for {n} patches, sampling with replacement",
            corners.len()
        );
        (0..n)
            .filter_map(|_| corners.get(rng.random_range(0..corners.len())).copied())
            .collect()
    };

    let source_samples = channel_samples(source);
    let target_samples = channel_samples(target);

    let mut x = Array4::zeros((n, channels, patch_h, patch_w));
    let mut y = Array4::zeros((n, channels, patch_h, patch_w));

    for (i, &(row, col)) in chosen.iter().enumerate() {
        x.slice_mut(s![i, .., .., ..])
            .assign(&source.slice(s![.., row..row + patch_h, col..col + patch_w]));
        y.slice_mut(s![i, .., .., ..])
            .assign(&target.slice(s![.., row..row + patch_h, col..col + patch_w]));

        let (low_lo, low_hi) = config.normalization.low;
        let (high_lo, high_hi) = config.normalization.high;
        let p_low = rng.random_range(low_lo..=low_hi);
        let p_high = rng.random_range(high_lo..=high_hi);

        for c in 0..channels {
            if let (Some(src), Some(tgt)) = (source_samples.get(c), target_samples.get(c)) {
                normalize_min_max(
                    x.slice_mut(s![i, c, .., ..]),
                    src.percentile(p_low),
                    src.percentile(p_high),
                );
                normalize_min_max(
                    y.slice_mut(s![i, c, .., ..]),
                    tgt.percentile(p_low),
                    tgt.percentile(p_high),
                );
            }
        }
    }

    Ok((x, y))
}

/// Extract patches from every raw pair and shuffle them into one dataset
///
/// The result holds exactly `n_patches_per_image × raw.len()` patch pairs in
/// `SCYX` layout.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, any pair cannot be
/// loaded, pairs differ in channel count, or sampling fails
pub fn create_patches(
    raw: &RawData,
    config: &PatchConfig,
    progress: &mut ProgressManager,
) -> Result<PatchDataset> {
    config.validate()?;
    if raw.is_empty() {
        return Err(invalid_source(&"no raw image pairs to extract patches from"));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut source_blocks = Vec::with_capacity(raw.len());
    let mut target_blocks = Vec::with_capacity(raw.len());

    progress.initialize("Extracting patches", raw.len());
    for pair in raw.pairs() {
        let name = pair.source.file_name().unwrap_or_default().to_string_lossy();
        progress.start_unit(&name, config.n_patches_per_image);

        let (source, target) = raw.load_pair(pair)?;
        let source = to_cyx(source, raw.axes())?;
        let target = to_cyx(target, raw.axes())?;

        let (x, y) = sample_patch_pairs(&source, &target, config, &mut rng)?;
        progress.update_step(config.n_patches_per_image);
        source_blocks.push(x);
        target_blocks.push(y);

        progress.complete_unit();
    }
    progress.finish();

    let x = concatenate_blocks(&source_blocks)?;
    let y = concatenate_blocks(&target_blocks)?;

    let mut order: Vec<usize> = (0..x.len_of(Axis(0))).collect();
    order.shuffle(&mut rng);
    let x = x.select(Axis(0), &order);
    let y = y.select(Axis(0), &order);

    let dataset = PatchDataset::new(x, y, Axes::parse(DATASET_AXES)?)?;
    log::info!(
        "Extracted {} patch pairs of shape {:?} from {} image pair(s)",
        dataset.len(),
        dataset.x().shape().get(1..).unwrap_or_default(),
        raw.len()
    );
    Ok(dataset)
}

fn concatenate_blocks(blocks: &[Array4<f32>]) -> Result<Array4<f32>> {
    let views: Vec<_> = blocks.iter().map(Array4::view).collect();
    ndarray::concatenate(Axis(0), &views).map_err(|shape_error| {
        let shapes: Vec<&[usize]> = blocks.iter().map(Array4::shape).collect();
        invalid_source(&format!(
            "raw image pairs with patch blocks {shapes:?} cannot share a dataset: {shape_error}"
        ))
    })
}

/// Extract patches and persist them to `save_file`
///
/// # Errors
///
/// Returns an error if extraction or saving fails
pub fn create_patches_to_file(
    raw: &RawData,
    config: &PatchConfig,
    save_file: &Path,
    progress: &mut ProgressManager,
) -> Result<PatchDataset> {
    let dataset = create_patches(raw, config, progress)?;
    save_training_data(save_file, &dataset)?;
    log::info!("Saved patch dataset to {}", save_file.display());
    Ok(dataset)
}
