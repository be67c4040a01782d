//! Pipeline constants and runtime configuration defaults

// Raw dataset layout
/// Base directory holding the raw source and target folders
pub const DEFAULT_BASEPATH: &str = "data/nucleo";
/// Folder of noisy source images below the base directory
pub const DEFAULT_SOURCE_DIR: &str = "in";
/// Folder of ground-truth target images below the base directory
pub const DEFAULT_TARGET_DIR: &str = "gt";
/// Axis layout of the raw images
pub const DEFAULT_RAW_AXES: &str = "CYX";
/// File extensions accepted as raw images
pub const RAW_IMAGE_EXTENSIONS: [&str; 3] = ["tif", "tiff", "png"];

// Patch extraction
/// Edge length of extracted square patches
pub const DEFAULT_PATCH_SIZE: usize = 128;
/// Number of patches sampled from every raw image pair
pub const DEFAULT_PATCHES_PER_IMAGE: usize = 200;
/// Location of the persisted patch dataset
pub const DEFAULT_DATASET_PATH: &str = "data/my_training_data.npz";
/// Axis layout of every persisted patch dataset
pub const DATASET_AXES: &str = "SCYX";
/// Fraction of the target's high percentile a patch must reach to count as foreground
pub const BACKGROUND_THRESHOLD: f32 = 0.4;
/// Percentile of the target used as the foreground reference intensity
pub const BACKGROUND_PERCENTILE: f64 = 99.9;
/// Range from which the per-patch low normalization percentile is drawn
pub const NORM_LOW_PERCENTILES: (f64, f64) = (1.0, 3.0);
/// Range from which the per-patch high normalization percentile is drawn
pub const NORM_HIGH_PERCENTILES: (f64, f64) = (99.5, 99.9);
/// Fixed percentiles used to normalize images before prediction
pub const PREDICT_PERCENTILES: (f64, f64) = (1.0, 99.8);
/// Guards percentile normalization against flat images
pub const NORM_EPSILON: f32 = 1e-20;

// Archive layout
/// Archive member holding the source patches
pub const ARCHIVE_SOURCE_MEMBER: &str = "X";
/// Archive member holding the target patches
pub const ARCHIVE_TARGET_MEMBER: &str = "Y";
/// Archive member holding the axis label bytes
pub const ARCHIVE_AXES_MEMBER: &str = "axes";

// Training
/// Fraction of the patch dataset held out for validation
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.1;
/// Model directory name below the model base directory
pub const DEFAULT_MODEL_NAME: &str = "my_model";
/// Base directory holding trained models
pub const DEFAULT_MODEL_BASEDIR: &str = "models";
/// Number of passes over the training data
pub const DEFAULT_TRAIN_EPOCHS: usize = 100;
/// Mini-batches drawn per epoch
pub const DEFAULT_STEPS_PER_EPOCH: usize = 400;
/// Patches per mini-batch
pub const DEFAULT_BATCH_SIZE: usize = 16;
/// Initial optimizer step size
pub const DEFAULT_LEARNING_RATE: f64 = 0.0004;
/// Edge length of the restoration filter kernel (must be odd)
pub const DEFAULT_KERNEL_SIZE: usize = 5;
/// Learning rate multiplier applied when validation loss plateaus
pub const REDUCE_LR_FACTOR: f64 = 0.5;
/// Epochs without improvement before the learning rate is reduced
pub const REDUCE_LR_PATIENCE: usize = 10;
/// Fixed seed for reproducible sampling and batching
pub const DEFAULT_SEED: u64 = 42;

// Model directory layout
/// Serialized model configuration
pub const CONFIG_FILE: &str = "config.json";
/// Serialized training history
pub const HISTORY_FILE: &str = "history.json";
/// Weights from the epoch with the lowest validation loss
pub const WEIGHTS_BEST_FILE: &str = "weights_best.npz";
/// Weights from the most recent epoch
pub const WEIGHTS_LAST_FILE: &str = "weights_last.npz";

// Plotting
/// Default plot location for training curves
pub const DEFAULT_PLOT_PATH: &str = "graph.png";
/// Metric groups drawn side by side, one panel per group
pub const DEFAULT_PLOT_GROUPS: [&str; 2] = ["loss,val_loss", "mse,val_mse,mae,val_mae"];
/// Width of one plot panel in pixels
pub const PLOT_PANEL_WIDTH: u32 = 640;
/// Height of one plot panel in pixels
pub const PLOT_PANEL_HEIGHT: u32 = 400;
/// Blank border around each chart in pixels
pub const PLOT_MARGIN: u32 = 10;

// Frame extraction
/// Default multi-frame input stack
pub const DEFAULT_STACK_PATH: &str = "input/190924_50NcLiving_B1-HT.tif";
/// Directory receiving one file per extracted frame
pub const DEFAULT_FRAMES_DIR: &str = "frames";
/// Extension of extracted frame files
pub const FRAME_EXTENSION: &str = "tif";

// Progress bar display settings
/// Width of progress bars in characters
pub const PROGRESS_BAR_WIDTH: u16 = 40;

/// Log filter applied when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info";
