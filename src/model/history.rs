//! Per-epoch metric history recorded during training

use crate::io::error::{PipelineError, Result, WithPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Mapping from metric name to its value after every epoch
///
/// Serializes to a flat JSON object such as `{"loss": [..], "val_loss": [..]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    metrics: BTreeMap<String, Vec<f64>>,
}

impl History {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value to a metric's sequence
    pub fn push(&mut self, metric: &str, value: f64) {
        self.metrics
            .entry(metric.to_string())
            .or_default()
            .push(value);
    }

    /// Append the values of one finished epoch
    pub fn record_epoch(&mut self, values: &[(&str, f64)]) {
        for &(metric, value) in values {
            self.push(metric, value);
        }
    }

    /// Values of one metric, oldest first
    pub fn get(&self, metric: &str) -> Option<&[f64]> {
        self.metrics.get(metric).map(Vec::as_slice)
    }

    /// Recorded metric names in sorted order
    pub fn metric_names(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }

    /// Length of the longest metric sequence
    pub fn epochs(&self) -> usize {
        self.metrics.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Write as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| {
            PipelineError::Serialization {
                path: path.to_path_buf(),
                source,
            }
        })?;
        std::fs::write(path, text).with_path(path, "write history")
    }

    /// Read a history written by [`History::save_json`]
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path, "read history")?;
        serde_json::from_str(&text).map_err(|source| PipelineError::Serialization {
            path: path.to_path_buf(),
            source,
        })
    }
}
