//! Error types and path context for dataset, training and frame operations

use std::fmt;
use std::path::{Path, PathBuf};

/// Main error type for all pipeline operations
#[derive(Debug)]
pub enum PipelineError {
    /// Failed to load an image through the generic image decoder
    ImageLoad {
        /// Path to the image file
        path: PathBuf,
        /// Underlying image loading error
        source: image::ImageError,
    },

    /// Failed to draw or save a chart
    PlotRender {
        /// Path where the chart was being written
        path: PathBuf,
        /// Message from the drawing backend
        reason: String,
    },

    /// Failed to decode a TIFF file or one of its pages
    TiffDecode {
        /// Path to the TIFF file
        path: PathBuf,
        /// Underlying TIFF error
        source: tiff::TiffError,
    },

    /// Failed to encode a TIFF file
    TiffEncode {
        /// Path where the TIFF was being written
        path: PathBuf,
        /// Underlying TIFF error
        source: tiff::TiffError,
    },

    /// Failed to read an array archive
    ArchiveRead {
        /// Path to the archive
        path: PathBuf,
        /// Underlying archive error
        source: ndarray_npy::ReadNpzError,
    },

    /// Failed to write an array archive
    ArchiveWrite {
        /// Path to the archive
        path: PathBuf,
        /// Underlying archive error
        source: ndarray_npy::WriteNpzError,
    },

    /// General file system operation failure
    FileSystem {
        /// Path involved in the operation
        path: PathBuf,
        /// Description of the operation that failed
        operation: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// JSON encoding or decoding of a persisted record failed
    Serialization {
        /// Path of the JSON document
        path: PathBuf,
        /// Underlying serde error
        source: serde_json::Error,
    },

    /// Parameter validation failed
    InvalidParameter {
        /// Name of the invalid parameter
        parameter: &'static str,
        /// Provided value that failed validation
        value: String,
        /// Explanation of why the value is invalid
        reason: String,
    },

    /// Input data doesn't meet pipeline requirements
    InvalidSourceData {
        /// Description of what's wrong with the data
        reason: String,
    },

    /// Two arrays that must agree in shape do not
    ShapeMismatch {
        /// What was being compared
        context: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Shape actually found
        found: Vec<usize>,
    },

    /// A raw image has no counterpart with the same name in the paired directory
    MissingPair {
        /// The file that was found
        present: PathBuf,
        /// The counterpart that does not exist
        missing: PathBuf,
    },

    /// Requested metric is not recorded in a training history
    UnknownMetric {
        /// Requested metric name
        metric: String,
        /// Metrics present in the history
        available: Vec<String>,
    },

    /// Numerical computation produced invalid result
    Computation {
        /// Name of the computation that failed
        operation: &'static str,
        /// Description of the failure
        reason: String,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageLoad { path, source } => {
                write!(f, "Failed to load image '{}': {source}", path.display())
            }
            Self::PlotRender { path, reason } => {
                write!(f, "Failed to render plot '{}': {reason}", path.display())
            }
            Self::TiffDecode { path, source } => {
                write!(f, "Failed to decode TIFF '{}': {source}", path.display())
            }
            Self::TiffEncode { path, source } => {
                write!(f, "Failed to encode TIFF '{}': {source}", path.display())
            }
            Self::ArchiveRead { path, source } => {
                write!(f, "Failed to read archive '{}': {source}", path.display())
            }
            Self::ArchiveWrite { path, source } => {
                write!(f, "Failed to write archive '{}': {source}", path.display())
            }
            Self::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "File system error during {operation} on '{}': {source}",
                    path.display()
                )
            }
            Self::Serialization { path, source } => {
                write!(f, "Invalid JSON in '{}': {source}", path.display())
            }
            Self::InvalidParameter {
                parameter,
                value,
                reason,
            } => {
                write!(f, "Invalid parameter '{parameter}' = '{value}': {reason}")
            }
            Self::InvalidSourceData { reason } => {
                write!(f, "Invalid source data: {reason}")
            }
            Self::ShapeMismatch {
                context,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Shape mismatch in {context}: expected {expected:?}, found {found:?}"
                )
            }
            Self::MissingPair { present, missing } => {
                write!(
                    f,
                    "'{}' has no counterpart: '{}' does not exist",
                    present.display(),
                    missing.display()
                )
            }
            Self::UnknownMetric { metric, available } => {
                write!(
                    f,
                    "Metric '{metric}' not recorded (available: {})",
                    available.join(", ")
                )
            }
            Self::Computation { operation, reason } => {
                write!(f, "Computation error in {operation}: {reason}")
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ImageLoad { source, .. } => Some(source),
            Self::TiffDecode { source, .. } | Self::TiffEncode { source, .. } => Some(source),
            Self::ArchiveRead { source, .. } => Some(source),
            Self::ArchiveWrite { source, .. } => Some(source),
            Self::FileSystem { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for pipeline results
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Attaches the path and operation to raw I/O failures
pub trait WithPath<T> {
    /// Convert an I/O error into [`PipelineError::FileSystem`] naming the path involved
    ///
    /// # Errors
    ///
    /// Propagates the original error with the path and operation applied
    fn with_path(self, path: &Path, operation: &'static str) -> Result<T>;
}

impl<T> WithPath<T> for std::result::Result<T, std::io::Error> {
    fn with_path(self, path: &Path, operation: &'static str) -> Result<T> {
        self.map_err(|source| PipelineError::FileSystem {
            path: path.to_path_buf(),
            operation,
            source,
        })
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("<unknown>"),
            operation: "unknown",
            source: err,
        }
    }
}

impl From<ndarray::ShapeError> for PipelineError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Computation {
            operation: "array reshape",
            reason: err.to_string(),
        }
    }
}

/// Create an invalid parameter error
pub fn invalid_parameter(
    parameter: &'static str,
    value: &impl ToString,
    reason: &impl ToString,
) -> PipelineError {
    PipelineError::InvalidParameter {
        parameter,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Create an invalid source data error
pub fn invalid_source(reason: &impl ToString) -> PipelineError {
    PipelineError::InvalidSourceData {
        reason: reason.to_string(),
    }
}

/// Create a computation error
pub fn computation_error(operation: &'static str, reason: &impl ToString) -> PipelineError {
    PipelineError::Computation {
        operation,
        reason: reason.to_string(),
    }
}

/// Create a shape mismatch error
pub fn shape_mismatch(context: &'static str, expected: &[usize], found: &[usize]) -> PipelineError {
    PipelineError::ShapeMismatch {
        context,
        expected: expected.to_vec(),
        found: found.to_vec(),
    }
}
