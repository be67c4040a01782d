//! Content-aware restoration toolkit for fluorescence microscopy
//!
//! Pairs of noisy and ground-truth images are cut into normalized patches,
//! stored as `.npz` archives, split into training and validation sets and
//! used to train a small convolutional restoration model. A separate stage
//! splits multi-page TIFF stacks into one file per frame.

/// Raw pair discovery, patch extraction, normalization and dataset splitting
pub mod data;
/// Input/output operations, configuration and error handling
pub mod io;
/// Restoration model, its configuration, losses, optimizer and training history
pub mod model;
/// Frame extraction from image stacks
pub mod stack;

pub use io::error::{PipelineError, Result};
