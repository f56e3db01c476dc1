//! AMH reference chart engine: percentile curve interpolation and chart data synthesis.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod age;
pub mod config;
pub mod interp;
pub mod patient;
pub mod session;
pub mod source;
pub mod table;

pub use age::{elapsed_years, resolve_age, validate_age, AgeInput, MAX_AGE, MIN_AGE};
pub use config::{ChartConfig, ChartParams};
pub use interp::{InterpolatedCurve, InterpolationPolicy};
pub use patient::{parse_value, AmhUnit, PatientObservation, PatientPointManager, RowSnap};
pub use session::{ChartRenderer, ChartSession, NullRenderer};
pub use source::{DirSource, SampleSource, SampleStore};
pub use table::{ChartRow, ChartTable, Resolution};

#[cfg(feature = "http")]
pub use source::HttpSource;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("failed to load percentile data: {}", join_failures(.0))]
    DataLoad(Vec<LoadFailure>),
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("invalid age: {0}")]
    InvalidAge(String),
    #[error("invalid AMH value: {0}")]
    InvalidValue(String),
    #[error("chart is not yet initialized")]
    NotInitialized,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("render failed: {0}")]
    Render(String),
}

impl ChartError {
    /// User-input errors that abort only the current submission.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChartError::MissingInput(_) | ChartError::InvalidAge(_) | ChartError::InvalidValue(_)
        )
    }
}

/// One band that could not be fetched or parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadFailure {
    pub band: Band,
    pub location: String,
    pub reason: String,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.band, self.location, self.reason)
    }
}

fn join_failures(failures: &[LoadFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Population percentile bands drawn on the chart.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Band {
    P10,
    P25,
    P50,
    P75,
    P90,
}

impl Band {
    pub const ALL: [Band; 5] = [Band::P10, Band::P25, Band::P50, Band::P75, Band::P90];

    pub fn percentile(self) -> u8 {
        match self {
            Band::P10 => 10,
            Band::P25 => 25,
            Band::P50 => 50,
            Band::P75 => 75,
            Band::P90 => 90,
        }
    }

    /// Position of the band's column in a chart row.
    pub fn index(self) -> usize {
        match self {
            Band::P10 => 0,
            Band::P25 => 1,
            Band::P50 => 2,
            Band::P75 => 3,
            Band::P90 => 4,
        }
    }

    pub fn label(self) -> String {
        format!("{}%", self.percentile())
    }

    pub fn column_label(self) -> String {
        format!("{}% Percentile", self.percentile())
    }

    /// File name under the data root, e.g. `10th-percentile.json`.
    pub fn file_name(self) -> String {
        format!("{}th-percentile.json", self.percentile())
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percentile())
    }
}

/// A single reference measurement: `x` is age in years, `y` is AMH in pmol/L.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
}

impl Sample {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Parse a percentile file body (`[{"x": .., "y": ..}, ..]`).
pub fn parse_samples(input: &[u8]) -> Result<Vec<Sample>, String> {
    let samples: Vec<Sample> = serde_json::from_slice(input).map_err(|e| e.to_string())?;
    if let Some(bad) = samples
        .iter()
        .find(|s| !s.x.is_finite() || !s.y.is_finite() || s.x < 0.0)
    {
        return Err(format!("invalid sample x={} y={}", bad.x, bad.y));
    }
    Ok(samples)
}
