//! Splitting a multi-page TIFF stack into one single-page file per frame

use crate::io::configuration::FRAME_EXTENSION;
use crate::io::error::{Result, WithPath, invalid_source, shape_mismatch};
use crate::io::progress::ProgressManager;
use crate::io::tiff::{Frame, read_pages, write_frame};
use std::path::{Path, PathBuf};

/// Ordered frames that all share one shape and sample type
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStack {
    frames: Vec<Frame>,
}

impl ImageStack {
    /// Build a stack from decoded frames
    ///
    /// # Errors
    ///
    /// Returns an error if there are no frames or they differ in shape or sample type
    pub fn from_frames(frames: Vec<Frame>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(invalid_source(&"image stack holds no frames"));
        };

        let (height, width) = first.dim();
        for (index, frame) in frames.iter().enumerate() {
            let (h, w) = frame.dim();
            if (h, w) != (height, width) {
                return Err(shape_mismatch("stack frame", &[height, width], &[h, w]));
            }
            if frame.sample_format() != first.sample_format() {
                return Err(invalid_source(&format!(
                    "frame {index} stores {} samples, frame 0 stores {}",
                    frame.sample_format(),
                    first.sample_format()
                )));
            }
        }

        Ok(Self { frames })
    }

    /// Decode every page of a TIFF file as one frame
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be decoded or its pages do not form a stack
    pub fn read(path: &Path) -> Result<Self> {
        Self::from_frames(read_pages(path)?)
    }

    /// Number of frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frame height in pixels
    pub fn height(&self) -> usize {
        self.frames.first().map_or(0, |frame| frame.dim().0)
    }

    /// Frame width in pixels
    pub fn width(&self) -> usize {
        self.frames.first().map_or(0, |frame| frame.dim().1)
    }

    /// Frames in stack order
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

/// Behaviour of [`split_frames`] towards existing output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitOptions {
    /// Remove numbered frame files left by an earlier, longer stack
    pub prune_stale: bool,
}

/// Files touched by one split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Frame files written, in frame order
    pub written: Vec<PathBuf>,
    /// Stale frame files removed
    pub pruned: Vec<PathBuf>,
}

/// Output path of frame `index`: `<dir>/<index>.tif`
pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{index}.{FRAME_EXTENSION}"))
}

/// Write every frame of a stack to `<output_dir>/<i>.tif`
///
/// Existing files are overwritten. A failure part-way leaves the frames
/// written so far in place.
///
/// # Errors
///
/// Returns an error if the output directory cannot be created, a frame
/// cannot be written, or a stale file cannot be removed
pub fn write_frames(
    stack: &ImageStack,
    output_dir: &Path,
    options: SplitOptions,
    progress: &mut ProgressManager,
) -> Result<SplitReport> {
    std::fs::create_dir_all(output_dir).with_path(output_dir, "create directory")?;

    let mut report = SplitReport::default();
    progress.initialize("Writing frames", stack.frame_count());
    for (index, frame) in stack.frames().iter().enumerate() {
        let path = frame_path(output_dir, index);
        progress.start_unit(&path.to_string_lossy(), 1);
        write_frame(&path, frame)?;
        progress.update_step(1);
        progress.complete_unit();
        report.written.push(path);
    }
    progress.finish();

    if options.prune_stale {
        report.pruned = prune_stale_frames(output_dir, stack.frame_count())?;
    }

    log::info!(
        "Wrote {} frame(s) of {}x{} to {}",
        report.written.len(),
        stack.height(),
        stack.width(),
        output_dir.display()
    );
    Ok(report)
}

/// Read a multi-page TIFF and write each page as its own file
///
/// # Errors
///
/// Returns an error if the stack cannot be read or any frame cannot be written
pub fn split_frames(
    input: &Path,
    output_dir: &Path,
    options: SplitOptions,
    progress: &mut ProgressManager,
) -> Result<SplitReport> {
    let stack = ImageStack::read(input)?;
    log::info!(
        "Read {} frame(s) of {}x{} ({}) from {}",
        stack.frame_count(),
        stack.height(),
        stack.width(),
        stack.frames().first().map_or("?", Frame::sample_format),
        input.display()
    );
    write_frames(&stack, output_dir, options, progress)
}

// Numbered frame files whose index is past the end of the current stack
fn prune_stale_frames(output_dir: &Path, frame_count: usize) -> Result<Vec<PathBuf>> {
    let mut pruned = Vec::new();
    for entry in std::fs::read_dir(output_dir).with_path(output_dir, "read directory")? {
        let path = entry.with_path(output_dir, "read directory entry")?.path();
        let is_frame = path
            .extension()
            .is_some_and(|ext| ext == FRAME_EXTENSION);
        // Only names frame_path produces: no sign, no leading zeros
        let index = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<usize>().ok().filter(|index| index.to_string() == stem));

        if let Some(index) = index
            && is_frame
            && index >= frame_count
            && path.is_file()
        {
            std::fs::remove_file(&path).with_path(&path, "remove stale frame")?;
            log::debug!("Removed stale frame {}", path.display());
            pruned.push(path);
        }
    }
    pruned.sort();
    Ok(pruned)
}
