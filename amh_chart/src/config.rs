//! Table-building parameters and the rendering configuration handed to a
//! [`ChartRenderer`](crate::ChartRenderer).

use serde::{Deserialize, Serialize};

use crate::{Band, ChartError, InterpolationPolicy, Resolution, RowSnap, MAX_AGE};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChartParams {
    pub resolution: Resolution,
    /// Inclusive upper age bound of the table.
    pub max_age: f64,
    pub policy: InterpolationPolicy,
    pub snap: RowSnap,
}

impl Default for ChartParams {
    fn default() -> Self {
        Self {
            resolution: Resolution::Coarse,
            max_age: MAX_AGE,
            policy: InterpolationPolicy::Continuous,
            snap: RowSnap::Nearest,
        }
    }
}

impl ChartParams {
    pub fn validate(&self) -> Result<(), ChartError> {
        if !self.max_age.is_finite() || self.max_age <= 0.0 || self.max_age > MAX_AGE {
            return Err(ChartError::InvalidParameter(format!(
                "max age must be in (0, {}], got {}",
                MAX_AGE, self.max_age
            )));
        }
        Ok(())
    }

    /// Last whole age covered by the table; bounds the dense grid.
    pub fn grid_max_age(&self) -> u32 {
        self.max_age.ceil() as u32
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LegendPosition {
    Top,
    Bottom,
    Left,
    Right,
    None,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkerShape {
    Cross,
    Circle,
    Triangle,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendlineKind {
    Linear,
    Polynomial,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Trendline {
    pub kind: TrendlineKind,
    pub degree: u32,
    pub color: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BandSeries {
    pub band: Band,
    pub color: String,
    pub opacity: f64,
    pub visible: bool,
    pub trendline: Option<Trendline>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PatientMarker {
    pub shape: MarkerShape,
    pub size: u32,
    pub color: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisConfig {
    pub title: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Number of gridlines; `None` lets the renderer decide.
    pub gridlines: Option<u32>,
    /// Gridline spacing in axis units.
    pub interval: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChartConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub smooth_curves: bool,
    pub h_axis: AxisConfig,
    pub v_axis: AxisConfig,
    pub bands: Vec<BandSeries>,
    pub patient: PatientMarker,
    pub legend: LegendPosition,
}

impl Default for ChartConfig {
    fn default() -> Self {
        let colors = ["red", "orange", "black", "green", "darkgreen"];
        let bands = Band::ALL
            .iter()
            .zip(colors)
            .map(|(&band, color)| BandSeries {
                band,
                color: color.to_string(),
                opacity: 0.5,
                visible: true,
                trendline: Some(Trendline {
                    kind: TrendlineKind::Polynomial,
                    degree: 5,
                    color: color.to_string(),
                }),
            })
            .collect();
        Self {
            title: "AMH Levels by Age".to_string(),
            width: 1280,
            height: 500,
            smooth_curves: true,
            h_axis: AxisConfig {
                title: "Age".to_string(),
                min: Some(0.0),
                max: None,
                gridlines: None,
                interval: Some(1.0),
            },
            v_axis: AxisConfig {
                title: "AMH Level (pmol/L)".to_string(),
                min: Some(0.0),
                max: None,
                gridlines: None,
                interval: Some(5.0),
            },
            bands,
            patient: PatientMarker {
                shape: MarkerShape::Cross,
                size: 15,
                color: "blue".to_string(),
            },
            legend: LegendPosition::Bottom,
        }
    }
}

impl ChartConfig {
    pub fn band_series(&self, band: Band) -> Option<&BandSeries> {
        self.bands.iter().find(|series| series.band == band)
    }

    /// Parse a JSON override; fields left out keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ChartError> {
        serde_json::from_str(text)
            .map_err(|e| ChartError::InvalidParameter(format!("chart config: {}", e)))
    }
}
