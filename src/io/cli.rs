//! Command-line interface dispatching the dataset, training, plotting, prediction and frame stages

use crate::data::axes::Axes;
use crate::data::normalize::normalize_percentile;
use crate::data::patches::{BackgroundFilter, PatchConfig, PercentileRange, create_patches_to_file, to_cyx};
use crate::data::raw::RawData;
use crate::data::split::load_training_data;
use crate::io::configuration::{
    DEFAULT_BASEPATH, DEFAULT_BATCH_SIZE, DEFAULT_DATASET_PATH, DEFAULT_FRAMES_DIR,
    DEFAULT_KERNEL_SIZE, DEFAULT_LEARNING_RATE, DEFAULT_MODEL_BASEDIR, DEFAULT_MODEL_NAME,
    DEFAULT_PATCHES_PER_IMAGE, DEFAULT_PATCH_SIZE, DEFAULT_PLOT_GROUPS, DEFAULT_PLOT_PATH,
    DEFAULT_RAW_AXES, DEFAULT_SEED, DEFAULT_SOURCE_DIR, DEFAULT_STACK_PATH,
    DEFAULT_STEPS_PER_EPOCH, DEFAULT_TARGET_DIR, DEFAULT_TRAIN_EPOCHS, DEFAULT_VALIDATION_SPLIT,
    HISTORY_FILE, PREDICT_PERCENTILES,
};
use crate::io::error::{Result, WithPath};
use crate::io::plot::{RenderTarget, parse_metric_groups, plot_history};
use crate::io::progress::ProgressManager;
use crate::io::tiff::{Frame, read_image_f32, write_pages};
use crate::model::care::RestorationModel;
use crate::model::config::ModelConfig;
use crate::model::history::History;
use crate::stack::frames::{SplitOptions, split_frames};
use clap::{Args, Parser, Subcommand};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "carekit")]
#[command(
    author,
    version,
    about = "Build patch datasets, train restoration models and split TIFF stacks"
)]
/// Command-line arguments shared by every stage
pub struct Cli {
    /// Suppress progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Pipeline stage to run
    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stages
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract normalized patch pairs from raw images into an .npz dataset
    Patches(PatchesArgs),
    /// Train a restoration model on a patch dataset
    Train(TrainArgs),
    /// Plot the metric history of a trained model
    Plot(PlotArgs),
    /// Restore an image with a trained model
    Predict(PredictArgs),
    /// Write every frame of a multi-page TIFF to its own file
    SplitFrames(SplitFramesArgs),
}

/// Patch edge lengths given as `N` or `HxW`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSize {
    /// Patch height in pixels
    pub height: usize,
    /// Patch width in pixels
    pub width: usize,
}

impl PatchSize {
    /// Square patch of edge `size`
    pub const fn square(size: usize) -> Self {
        Self {
            height: size,
            width: size,
        }
    }
}

impl fmt::Display for PatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.height == self.width {
            write!(f, "{}", self.height)
        } else {
            write!(f, "{}x{}", self.height, self.width)
        }
    }
}

impl FromStr for PatchSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse_extent = |text: &str| -> std::result::Result<usize, String> {
            match text.trim().parse::<usize>() {
                Ok(0) => Err("patch extents must be positive".to_string()),
                Ok(extent) => Ok(extent),
                Err(error) => Err(format!("invalid patch extent '{text}': {error}")),
            }
        };

        match s.to_ascii_lowercase().split_once('x') {
            Some((height, width)) => Ok(Self {
                height: parse_extent(height)?,
                width: parse_extent(width)?,
            }),
            None => parse_extent(s).map(Self::square),
        }
    }
}

fn parse_axes(label: &str) -> std::result::Result<Axes, String> {
    Axes::parse(label).map_err(|error| error.to_string())
}

/// Arguments of the `patches` stage
#[derive(Args, Debug)]
pub struct PatchesArgs {
    /// Dataset folder holding the source and target directories
    #[arg(long, default_value = DEFAULT_BASEPATH)]
    pub basepath: PathBuf,

    /// Directory of noisy source images below the base path (repeatable)
    #[arg(long = "source-dir", default_value = DEFAULT_SOURCE_DIR)]
    pub source_dirs: Vec<PathBuf>,

    /// Directory of ground-truth images below the base path
    #[arg(long, default_value = DEFAULT_TARGET_DIR)]
    pub target_dir: PathBuf,

    /// Axis layout of the raw images
    #[arg(long, default_value = DEFAULT_RAW_AXES, value_parser = parse_axes)]
    pub axes: Axes,

    /// Patch size as `N` or `HxW`
    #[arg(long, default_value_t = PatchSize::square(DEFAULT_PATCH_SIZE))]
    pub patch_size: PatchSize,

    /// Patches sampled from every image pair
    #[arg(short = 'n', long, default_value_t = DEFAULT_PATCHES_PER_IMAGE)]
    pub patches_per_image: usize,

    /// Output archive
    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    pub output: PathBuf,

    /// Random seed for reproducible sampling
    #[arg(short, long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Sample patches from background regions too
    #[arg(long)]
    pub no_background_filter: bool,
}

/// Arguments of the `train` stage
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Patch dataset archive
    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    pub data: PathBuf,

    /// Fraction of samples held out for validation
    #[arg(long, default_value_t = DEFAULT_VALIDATION_SPLIT)]
    pub validation_split: f64,

    /// Use only the first N samples of the dataset
    #[arg(long)]
    pub n_images: Option<usize>,

    /// Training epochs
    #[arg(short, long, default_value_t = DEFAULT_TRAIN_EPOCHS)]
    pub epochs: usize,

    /// Mini-batches per epoch
    #[arg(long, default_value_t = DEFAULT_STEPS_PER_EPOCH)]
    pub steps_per_epoch: usize,

    /// Mini-batch size
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Initial learning rate
    #[arg(long, default_value_t = DEFAULT_LEARNING_RATE)]
    pub learning_rate: f64,

    /// Convolution kernel edge length (odd)
    #[arg(long, default_value_t = DEFAULT_KERNEL_SIZE)]
    pub kernel_size: usize,

    /// Train for the mean only instead of a Laplace distribution
    #[arg(long)]
    pub no_probabilistic: bool,

    /// Model name, used as directory name
    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    pub name: String,

    /// Directory holding model directories
    #[arg(long, default_value = DEFAULT_MODEL_BASEDIR)]
    pub basedir: PathBuf,

    /// Random seed for batch order
    #[arg(short, long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Plot the history after training, optionally to the given path
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_PLOT_PATH)]
    pub plot: Option<PathBuf>,
}

impl TrainArgs {
    /// Whether the model predicts a Laplace scale
    pub const fn probabilistic(&self) -> bool {
        !self.no_probabilistic
    }
}

/// Arguments of the `plot` stage
#[derive(Args, Debug)]
pub struct PlotArgs {
    /// Model whose history is plotted
    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    pub name: String,

    /// Directory holding model directories
    #[arg(long, default_value = DEFAULT_MODEL_BASEDIR)]
    pub basedir: PathBuf,

    /// History file to plot instead of the model's
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Output PNG
    #[arg(short, long, default_value = DEFAULT_PLOT_PATH)]
    pub output: PathBuf,

    /// Log a summary instead of writing an image
    #[arg(long)]
    pub log: bool,

    /// Comma-separated metrics per panel (repeatable)
    #[arg(short, long = "metrics", default_values_t = DEFAULT_PLOT_GROUPS.map(String::from))]
    pub metrics: Vec<String>,
}

impl PlotArgs {
    /// History file named by `--history`, or the one inside the model directory
    pub fn history_path(&self) -> PathBuf {
        self.history
            .clone()
            .unwrap_or_else(|| self.basedir.join(&self.name).join(HISTORY_FILE))
    }

    /// Render target selected by `--log` and `--output`
    pub fn render_target(&self) -> RenderTarget {
        if self.log {
            RenderTarget::Log
        } else {
            RenderTarget::File(self.output.clone())
        }
    }
}

/// Arguments of the `predict` stage
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Image to restore: a PNG, a single-page TIFF or a multi-page TIFF with one page per channel
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output TIFF with one `f32` page per channel
    #[arg(short, long)]
    pub output: PathBuf,

    /// Model name
    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    pub name: String,

    /// Directory holding model directories
    #[arg(long, default_value = DEFAULT_MODEL_BASEDIR)]
    pub basedir: PathBuf,
}

/// Arguments of the `split-frames` stage
#[derive(Args, Debug)]
pub struct SplitFramesArgs {
    /// Multi-page TIFF stack
    #[arg(value_name = "INPUT", default_value = DEFAULT_STACK_PATH)]
    pub input: PathBuf,

    /// Directory receiving `0.tif`, `1.tif`, ...
    #[arg(short, long, default_value = DEFAULT_FRAMES_DIR)]
    pub output_dir: PathBuf,

    /// Remove numbered frames left over from a longer stack
    #[arg(long)]
    pub prune: bool,
}

/// Runs the stage selected on the command line
pub struct Pipeline {
    cli: Cli,
}

impl Pipeline {
    /// Create a pipeline for parsed arguments
    pub const fn new(cli: Cli) -> Self {
        Self { cli }
    }

    fn progress(&self) -> ProgressManager {
        if self.cli.quiet {
            ProgressManager::hidden()
        } else {
            ProgressManager::new()
        }
    }

    /// Run the selected stage
    ///
    /// # Errors
    ///
    /// Returns the first error of the stage; files written before it remain
    pub fn process(&self) -> Result<()> {
        let mut progress = self.progress();
        match &self.cli.command {
            Command::Patches(args) => run_patches(args, &mut progress),
            Command::Train(args) => run_train(args, &mut progress),
            Command::Plot(args) => run_plot(args),
            Command::Predict(args) => run_predict(args),
            Command::SplitFrames(args) => {
                let options = SplitOptions {
                    prune_stale: args.prune,
                };
                let report = split_frames(&args.input, &args.output_dir, options, &mut progress)?;
                if !report.pruned.is_empty() {
                    log::info!("Removed {} stale frame(s)", report.pruned.len());
                }
                Ok(())
            }
        }
    }
}

fn run_patches(args: &PatchesArgs, progress: &mut ProgressManager) -> Result<()> {
    let raw = RawData::from_folder(&args.basepath, &args.source_dirs, &args.target_dir, &args.axes)?;
    let config = PatchConfig {
        patch_size: (args.patch_size.height, args.patch_size.width),
        n_patches_per_image: args.patches_per_image,
        seed: args.seed,
        patch_filter: (!args.no_background_filter).then(BackgroundFilter::default),
        normalization: PercentileRange::default(),
    };

    let dataset = create_patches_to_file(&raw, &config, &args.output, progress)?;
    log::info!(
        "shape of X,Y = {:?}, axes = {}",
        dataset.x().shape(),
        dataset.axes()
    );
    Ok(())
}

fn run_train(args: &TrainArgs, progress: &mut ProgressManager) -> Result<()> {
    let data = load_training_data(&args.data, args.validation_split, args.n_images)?;
    data.log_summary()?;

    let (n_channel_in, n_channel_out) = data.channels()?;
    let config = ModelConfig::new(data.axes(), n_channel_in, n_channel_out)
        .with_probabilistic(args.probabilistic())
        .with_kernel_size(args.kernel_size)
        .with_train_epochs(args.epochs)
        .with_train_steps_per_epoch(args.steps_per_epoch)
        .with_train_batch_size(args.batch_size)
        .with_train_learning_rate(args.learning_rate)
        .with_seed(args.seed);

    let mut model = RestorationModel::new(config, &args.name, &args.basedir)?;
    let (x, y) = data.train();
    let history = model.train(x, y, data.validation(), progress)?;
    log::info!("Recorded metrics: {}", history.metric_names().join(", "));

    if let Some(ref path) = args.plot {
        let groups = parse_metric_groups(&DEFAULT_PLOT_GROUPS.map(String::from));
        plot_history(&history, &groups, &RenderTarget::File(path.clone()))?;
    }
    Ok(())
}

fn run_plot(args: &PlotArgs) -> Result<()> {
    let history = History::load_json(&args.history_path())?;
    let groups = parse_metric_groups(&args.metrics);
    plot_history(&history, &groups, &args.render_target())
}

fn run_predict(args: &PredictArgs) -> Result<()> {
    let model = RestorationModel::load(&args.name, &args.basedir)?;

    let raw = read_image_f32(&args.input)?;
    let axes = Axes::parse(if raw.ndim() == 2 { "YX" } else { "CYX" })?;
    let image = to_cyx(raw, &axes)?;

    let (low, high) = PREDICT_PERCENTILES;
    let restored = model.predict(normalize_percentile(&image, low, high).view())?;

    let frames: Vec<Frame> = restored
        .outer_iter()
        .map(|plane| Frame::F32(plane.to_owned()))
        .collect();
    create_parent(&args.output)?;
    write_pages(&args.output, &frames)?;

    log::info!(
        "Restored {} channel(s) of {} into {}",
        frames.len(),
        args.input.display(),
        args.output.display()
    );
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_path(parent, "create directory")?;
    }
    Ok(())
}
