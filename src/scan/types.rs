//! Core data types for the scan engine
//!
//! - `Trace`: per-field (x, y) output of a scan
//! - `TimeAxis`: what the x axis of a range scan holds
//! - `Reduction` / `ArraySelector`: how array values collapse to one number
//! - `Comparison` / `Direction`: trigger condition and search direction
//! - `ScanReport` / `ScanOutcome`: what a finished scan reports back

use crate::scan::error::{ScanError, ScanResult};
use crate::store::Samples;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Time series produced for one field: `x` and `y` always have equal length
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Trace {
    /// Zero-filled trace of the given length
    pub fn with_len(len: usize) -> Self {
        Self {
            x: vec![0.0; len],
            y: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Write one point; out-of-range positions are ignored
    pub fn set(&mut self, index: usize, x: f64, y: f64) {
        if let (Some(px), Some(py)) = (self.x.get_mut(index), self.y.get_mut(index)) {
            *px = x;
            *py = y;
        }
    }

    /// Shorten both axes to `len` points
    pub fn truncate(&mut self, len: usize) {
        self.x.truncate(len);
        self.y.truncate(len);
    }

    /// Iterate over (x, y) pairs
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }
}

/// Content of the x axis of a range scan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeAxis {
    /// Event index
    Off,
    /// Event timestamp in seconds
    #[default]
    On,
    /// Timestamp for scalar fields, event index for arrays
    Auto,
}

impl FromStr for TimeAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "false" | "index" => Ok(TimeAxis::Off),
            "on" | "true" | "time" => Ok(TimeAxis::On),
            "auto" => Ok(TimeAxis::Auto),
            other => Err(format!("unknown time axis mode: {}", other)),
        }
    }
}

/// Reduction of a field's value(s) to a single number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Array element at a position, clamped to the last element
    Element(usize),
    Mean,
    Max,
    Min,
}

impl TryFrom<i32> for Reduction {
    type Error = ScanError;

    fn try_from(position: i32) -> ScanResult<Self> {
        match position {
            p if p >= 0 => Ok(Reduction::Element(p as usize)),
            -1 => Ok(Reduction::Mean),
            -2 => Ok(Reduction::Max),
            -3 => Ok(Reduction::Min),
            p => Err(ScanError::InvalidSelector(p, "")),
        }
    }
}

impl Reduction {
    /// Numeric selector as used on the command line and in configs
    pub fn position(&self) -> i32 {
        match self {
            Reduction::Element(p) => *p as i32,
            Reduction::Mean => -1,
            Reduction::Max => -2,
            Reduction::Min => -3,
        }
    }

    /// Reduce the decoded values of `field`.
    ///
    /// Scalar fields ignore the selector. Positions past the end of an array
    /// are clamped to the last element with a warning, since short arrays are
    /// routine in recorded data. Returns `None` for empty arrays.
    pub fn apply(&self, field: &str, samples: &Samples, is_array: bool) -> Option<f64> {
        if !is_array {
            return samples.get(0);
        }

        match self {
            Reduction::Element(p) => samples.get(*p).or_else(|| {
                let last = samples.last()?;
                tracing::warn!(
                    field,
                    position = p,
                    max = samples.len() - 1,
                    "Requested array position is too large. Using the last element instead"
                );
                Some(last)
            }),
            Reduction::Mean => samples.mean(),
            Reduction::Max => samples.max(),
            Reduction::Min => samples.min(),
        }
    }
}

/// Array selector of a trigger condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySelector {
    Reduce(Reduction),
    /// Every element is tested on its own
    AnyElement,
}

impl TryFrom<i32> for ArraySelector {
    type Error = ScanError;

    fn try_from(position: i32) -> ScanResult<Self> {
        match position {
            -4 => Ok(ArraySelector::AnyElement),
            p if p < -4 => Err(ScanError::InvalidSelector(p, ", -4 (any)")),
            p => Reduction::try_from(p).map(ArraySelector::Reduce),
        }
    }
}

impl ArraySelector {
    pub fn position(&self) -> i32 {
        match self {
            ArraySelector::Reduce(r) => r.position(),
            ArraySelector::AnyElement => -4,
        }
    }
}

/// Trigger comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Greater,
    Less,
    Equal,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => value > threshold,
            Comparison::Less => value < threshold,
            Comparison::Equal => value == threshold,
        }
    }
}

impl FromStr for Comparison {
    type Err = ScanError;

    fn from_str(s: &str) -> ScanResult<Self> {
        match s.trim() {
            ">" => Ok(Comparison::Greater),
            "<" => Ok(Comparison::Less),
            "=" | "==" => Ok(Comparison::Equal),
            other => Err(ScanError::InvalidComparison(other.to_string())),
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparison::Greater => write!(f, ">"),
            Comparison::Less => write!(f, "<"),
            Comparison::Equal => write!(f, "="),
        }
    }
}

/// Direction of a single-hit trigger search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    /// Move a (signed) cursor one event in this direction
    pub fn advance(&self, cursor: i64) -> i64 {
        match self {
            Direction::Forward => cursor + 1,
            Direction::Backward => cursor - 1,
        }
    }
}

/// How a background scan ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScanOutcome {
    /// All requested events were visited, or a single-hit search ended
    Completed,
    /// An equivalent exhaustive search was cached; no events were visited
    Cached,
    /// Stopped on request; partial results are kept
    Interrupted,
    /// Refused before any event was processed
    Aborted(String),
    /// The engine hit a fatal error
    Failed(String),
}

impl ScanOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ScanOutcome::Failed(_))
    }
}

/// Summary handed back when a background scan is joined
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    /// Events fully processed
    pub processed: u64,
    /// Events skipped because their segment could not be loaded
    pub skipped: u64,
    /// Single-field decode failures
    pub field_errors: u64,
}

impl ScanReport {
    pub fn new(outcome: ScanOutcome) -> Self {
        Self {
            outcome,
            processed: 0,
            skipped: 0,
            field_errors: 0,
        }
    }
}

/// Progress snapshot returned by a poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStatus {
    pub done: bool,
    pub percentage: f64,
    /// Present once the finished scan has been joined
    pub report: Option<ScanReport>,
}
