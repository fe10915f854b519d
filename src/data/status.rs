//! Sensor status classification.
//!
//! Maps a parameter name and a numeric value to a [`StatusLabel`] using a
//! data-driven [`RangeTable`]. Each parameter is evaluated in one of two
//! modes:
//!
//! - [`RangeMode::Centered`]: both very low and very high values are
//!   harmful. Bands are closed intervals nested around a healthy center.
//! - [`RangeMode::Monotonic`]: higher is uniformly worse. Bands are
//!   half-open `[low, high)` intervals laid end to end.
//!
//! Anything not matched by the excellent, good or warning band is danger.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Qualitative status of a sensor value.
///
/// Variants are ordered by severity, with `Unknown` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    Excellent,
    Good,
    Warning,
    Danger,
    Unknown,
}

impl StatusLabel {
    /// Returns the lowercase name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLabel::Excellent => "excellent",
            StatusLabel::Good => "good",
            StatusLabel::Warning => "warning",
            StatusLabel::Danger => "danger",
            StatusLabel::Unknown => "unknown",
        }
    }

    /// Returns a short symbol for display.
    pub fn symbol(&self) -> &'static str {
        match self {
            StatusLabel::Excellent => "++",
            StatusLabel::Good => "OK",
            StatusLabel::Warning => "WARN",
            StatusLabel::Danger => "CRIT",
            StatusLabel::Unknown => "?",
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a parameter's bands are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    Centered,
    Monotonic,
}

/// A numeric interval. Whether `high` is inclusive depends on the mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    fn contains_closed(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    fn contains_half_open(&self, value: f64) -> bool {
        value >= self.low && value < self.high
    }

    /// Midpoint of the band.
    pub fn center(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

/// Band definition for a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub mode: RangeMode,
    pub excellent: Band,
    pub good: Band,
    pub warning: Band,
}

impl ParameterRange {
    pub const fn centered(excellent: Band, good: Band, warning: Band) -> Self {
        Self {
            mode: RangeMode::Centered,
            excellent,
            good,
            warning,
        }
    }

    pub const fn monotonic(excellent: Band, good: Band, warning: Band) -> Self {
        Self {
            mode: RangeMode::Monotonic,
            excellent,
            good,
            warning,
        }
    }

    /// Classify a value against this range.
    pub fn classify(&self, value: f64) -> StatusLabel {
        if value.is_nan() {
            return StatusLabel::Unknown;
        }

        let contains = match self.mode {
            RangeMode::Centered => Band::contains_closed,
            RangeMode::Monotonic => Band::contains_half_open,
        };

        if contains(&self.excellent, value) {
            StatusLabel::Excellent
        } else if contains(&self.good, value) {
            StatusLabel::Good
        } else if contains(&self.warning, value) {
            StatusLabel::Warning
        } else {
            StatusLabel::Danger
        }
    }

    fn bands(&self) -> [(&'static str, &Band); 3] {
        [
            ("excellent", &self.excellent),
            ("good", &self.good),
            ("warning", &self.warning),
        ]
    }

    /// Check that the bands are well-formed for the mode.
    ///
    /// Monotonic bands must be contiguous; centered bands must be nested.
    pub fn validate(&self, parameter: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidRange {
            parameter: parameter.to_string(),
            reason,
        };

        for (name, band) in self.bands() {
            if !band.low.is_finite() || !band.high.is_finite() {
                return Err(invalid(format!("{} band has a non-finite bound", name)));
            }
            if band.low > band.high {
                return Err(invalid(format!(
                    "{} band low {} exceeds high {}",
                    name, band.low, band.high
                )));
            }
        }

        match self.mode {
            RangeMode::Monotonic => {
                for pair in self.bands().windows(2) {
                    let (lower_name, lower) = pair[0];
                    let (upper_name, upper) = pair[1];
                    if lower.high != upper.low {
                        return Err(invalid(format!(
                            "{} band ends at {} but {} band starts at {}",
                            lower_name, lower.high, upper_name, upper.low
                        )));
                    }
                }
            }
            RangeMode::Centered => {
                for pair in self.bands().windows(2) {
                    let (inner_name, inner) = pair[0];
                    let (outer_name, outer) = pair[1];
                    if outer.low > inner.low || outer.high < inner.high {
                        return Err(invalid(format!(
                            "{} band does not enclose {} band",
                            outer_name, inner_name
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Per-parameter range definitions, keyed by parameter name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeTable {
    parameters: BTreeMap<String, ParameterRange>,
}

impl RangeTable {
    /// An empty table. Every parameter classifies as `Unknown`.
    pub fn empty() -> Self {
        Self {
            parameters: BTreeMap::new(),
        }
    }

    /// Add or replace a parameter's range.
    pub fn with(mut self, parameter: impl Into<String>, range: ParameterRange) -> Self {
        self.insert(parameter, range);
        self
    }

    pub fn insert(&mut self, parameter: impl Into<String>, range: ParameterRange) {
        self.parameters.insert(parameter.into(), range);
    }

    pub fn get(&self, parameter: &str) -> Option<&ParameterRange> {
        self.parameters.get(parameter)
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &ParameterRange)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Classify `value` for `parameter`.
    ///
    /// Returns [`StatusLabel::Unknown`] if the parameter has no range.
    pub fn classify(&self, parameter: &str, value: f64) -> StatusLabel {
        self.get(parameter)
            .map_or(StatusLabel::Unknown, |range| range.classify(value))
    }

    /// Validate every parameter's range.
    pub fn validate(&self) -> Result<()> {
        self.parameters
            .iter()
            .try_for_each(|(name, range)| range.validate(name))
    }
}

impl Default for RangeTable {
    fn default() -> Self {
        Self::empty()
            .with(
                "TDS",
                ParameterRange::monotonic(
                    Band::new(0.0, 300.0),
                    Band::new(300.0, 600.0),
                    Band::new(600.0, 900.0),
                ),
            )
            .with(
                "Temperature",
                ParameterRange::centered(
                    Band::new(20.0, 25.0),
                    Band::new(15.0, 30.0),
                    Band::new(10.0, 35.0),
                ),
            )
            .with(
                "Turbidity",
                ParameterRange::monotonic(
                    Band::new(0.0, 1.0),
                    Band::new(1.0, 4.0),
                    Band::new(4.0, 10.0),
                ),
            )
            .with(
                "pH",
                ParameterRange::centered(
                    Band::new(6.5, 8.5),
                    Band::new(6.0, 9.0),
                    Band::new(5.5, 9.5),
                ),
            )
    }
}

static BUILTIN: LazyLock<RangeTable> = LazyLock::new(RangeTable::default);

/// Classify against the built-in range table.
pub fn classify(parameter: &str, value: f64) -> StatusLabel {
    BUILTIN.classify(parameter, value)
}
