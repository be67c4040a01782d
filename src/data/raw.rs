//! Discovery of matching source/target image pairs in a folder layout

use crate::data::axes::Axes;
use crate::io::configuration::RAW_IMAGE_EXTENSIONS;
use crate::io::error::{PipelineError, Result, WithPath, invalid_parameter, invalid_source, shape_mismatch};
use crate::io::tiff::read_image_f32;
use ndarray::ArrayD;
use std::path::{Path, PathBuf};

/// Noisy source image and its ground-truth target, matched by file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    /// Noisy input image
    pub source: PathBuf,
    /// Ground-truth image
    pub target: PathBuf,
}

/// Handle to all raw image pairs of a dataset folder
#[derive(Debug, Clone)]
pub struct RawData {
    pairs: Vec<ImagePair>,
    axes: Axes,
    description: String,
}

impl RawData {
    /// Pair every image in `<basepath>/<target_dir>` with the file of the same
    /// name in each `<basepath>/<source_dir>`
    ///
    /// Pairs are ordered by source directory, then by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `axes` contains a sample axis or `source_dirs` is empty
    /// - The target directory cannot be read or holds no images
    /// - Any target image lacks a source counterpart
    pub fn from_folder(
        basepath: &Path,
        source_dirs: &[PathBuf],
        target_dir: &Path,
        axes: &Axes,
    ) -> Result<Self> {
        if axes.has_samples() {
            return Err(invalid_parameter(
                "axes",
                &axes,
                &"raw images cannot carry a sample axis",
            ));
        }
        if source_dirs.is_empty() {
            return Err(invalid_parameter(
                "source_dirs",
                &"[]",
                &"at least one source directory is required",
            ));
        }

        let target_path = basepath.join(target_dir);
        let target_names = list_images(&target_path)?;
        if target_names.is_empty() {
            return Err(invalid_source(&format!(
                "no images found in '{}'",
                target_path.display()
            )));
        }

        let mut pairs = Vec::with_capacity(source_dirs.len() * target_names.len());
        for source_dir in source_dirs {
            let source_path = basepath.join(source_dir);
            for name in &target_names {
                let target = target_path.join(name);
                let source = source_path.join(name);
                if !source.is_file() {
                    return Err(PipelineError::MissingPair {
                        present: target,
                        missing: source,
                    });
                }
                pairs.push(ImagePair { source, target });
            }
        }

        let source_list = source_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let description = format!(
            "{} pair(s) from '{}': source dirs [{source_list}] -> target dir '{}', axes {axes}",
            pairs.len(),
            basepath.display(),
            target_dir.display()
        );
        log::info!("Raw data: {description}");

        Ok(Self {
            pairs,
            axes: axes.clone(),
            description,
        })
    }

    /// All discovered pairs
    pub fn pairs(&self) -> &[ImagePair] {
        &self.pairs
    }

    /// Number of discovered pairs
    pub const fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no pair was discovered
    pub const fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Axis layout shared by every raw image
    pub const fn axes(&self) -> &Axes {
        &self.axes
    }

    /// Human-readable summary of the folder layout
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Read both images of a pair
    ///
    /// # Errors
    ///
    /// Returns an error if either image cannot be read, its rank does not
    /// match the axes, or source and target differ in shape
    pub fn load_pair(&self, pair: &ImagePair) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
        let source = read_image_f32(&pair.source)?;
        let target = read_image_f32(&pair.target)?;

        self.axes.check_rank(source.shape(), "source image")?;
        self.axes.check_rank(target.shape(), "target image")?;
        if source.shape() != target.shape() {
            return Err(shape_mismatch(
                "source/target pair",
                target.shape(),
                source.shape(),
            ));
        }

        Ok((source, target))
    }
}

// Sorted file names of every raw image directly inside `dir`
fn list_images(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).with_path(dir, "read directory")? {
        let path = entry.with_path(dir, "read directory entry")?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| RAW_IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

        if is_image
            && path.is_file()
            && let Some(name) = path.file_name().and_then(|name| name.to_str())
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
