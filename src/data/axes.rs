//! Axis layout labels such as `CYX` or `SCYX`

use crate::io::error::{PipelineError, Result, invalid_parameter, shape_mismatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Letters an axis label may contain
///
/// `S` enumerates samples, `C` channels, `Y` and `X` the spatial rows and columns
pub const AXIS_LETTERS: [char; 4] = ['S', 'C', 'Y', 'X'];

/// Validated axis layout label
///
/// Every letter appears at most once and both spatial axes are present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Axes(String);

impl Axes {
    /// Parse and validate an axis label, case-insensitively
    ///
    /// # Errors
    ///
    /// Returns an error if the label contains an unknown or repeated letter,
    /// or lacks `Y` or `X`
    pub fn parse(label: &str) -> Result<Self> {
        let normalized = label.trim().to_ascii_uppercase();

        let mut seen = Vec::with_capacity(normalized.len());
        for letter in normalized.chars() {
            if !AXIS_LETTERS.contains(&letter) {
                return Err(invalid_parameter(
                    "axes",
                    &label,
                    &format!("unknown axis '{letter}', expected letters from SCYX"),
                ));
            }
            if seen.contains(&letter) {
                return Err(invalid_parameter(
                    "axes",
                    &label,
                    &format!("axis '{letter}' appears more than once"),
                ));
            }
            seen.push(letter);
        }

        for required in ['Y', 'X'] {
            if !seen.contains(&required) {
                return Err(invalid_parameter(
                    "axes",
                    &label,
                    &format!("spatial axis '{required}' is required"),
                ));
            }
        }

        Ok(Self(normalized))
    }

    /// The label as upper-case text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of axes in the label
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a validated label
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of an axis letter within the label
    pub fn index_of(&self, axis: char) -> Option<usize> {
        self.0.find(axis.to_ascii_uppercase())
    }

    /// Mapping from every axis letter to its position
    pub fn positions(&self) -> BTreeMap<char, usize> {
        self.0.chars().enumerate().map(|(i, c)| (c, i)).collect()
    }

    /// Whether the label has a channel axis
    pub fn has_channel(&self) -> bool {
        self.index_of('C').is_some()
    }

    /// Whether the label has a sample axis
    pub fn has_samples(&self) -> bool {
        self.index_of('S').is_some()
    }

    /// Label without the sample axis
    pub fn without_samples(&self) -> Self {
        Self(self.0.chars().filter(|&c| c != 'S').collect())
    }

    /// Number of spatial dimensions
    pub fn spatial_dims(&self) -> usize {
        self.0.chars().filter(|c| matches!(c, 'Y' | 'X')).count()
    }

    /// Verify that an array shape has one extent per axis
    ///
    /// # Errors
    ///
    /// Returns an error if the rank of `shape` differs from the label length
    pub fn check_rank(&self, shape: &[usize], context: &'static str) -> Result<()> {
        if shape.len() == self.len() {
            Ok(())
        } else {
            Err(PipelineError::InvalidSourceData {
                reason: format!(
                    "{context} has {} dimensions {shape:?} but axes '{}' describe {}",
                    shape.len(),
                    self.0,
                    self.len()
                ),
            })
        }
    }

    /// Extent along the channel axis, or 1 when the label has none
    ///
    /// # Errors
    ///
    /// Returns an error if the rank of `shape` differs from the label length
    pub fn channel_count(&self, shape: &[usize]) -> Result<usize> {
        self.check_rank(shape, "array")?;
        match self.index_of('C') {
            Some(c) => shape
                .get(c)
                .copied()
                .ok_or_else(|| shape_mismatch("channel axis", &[self.len()], shape)),
            None => Ok(1),
        }
    }
}

impl fmt::Display for Axes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Axes {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Axes {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Axes> for String {
    fn from(axes: Axes) -> Self {
        axes.0
    }
}
