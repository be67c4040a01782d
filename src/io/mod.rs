/// NumPy archive persistence for datasets and weights
pub mod archive;
/// Command-line parsing and stage dispatch
pub mod cli;
/// Default paths, file names and numeric parameters
pub mod configuration;
/// Error types with path and operation context
pub mod error;
/// History plotting
pub mod plot;
/// Terminal progress bars
pub mod progress;
/// TIFF and PNG image reading and TIFF writing
pub mod tiff;
