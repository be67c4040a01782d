//! Dataset construction from raw image pairs

/// Axis layout labels
pub mod axes;
/// Percentile statistics and intensity normalization
pub mod normalize;
/// Patch sampling and the paired patch dataset
pub mod patches;
/// Discovery and loading of raw source/target pairs
pub mod raw;
/// Train/validation partition of a patch dataset
pub mod split;
