use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::age::validate_age;
use crate::{ChartError, ChartTable};

/// ng/mL to pmol/L for AMH.
pub const NG_PER_ML_TO_PMOL_PER_L: f64 = 7.14;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AmhUnit {
    #[serde(rename = "pmol/L")]
    PmolPerL,
    #[serde(rename = "ng/ml")]
    NgPerMl,
}

impl Default for AmhUnit {
    fn default() -> Self {
        AmhUnit::PmolPerL
    }
}

impl AmhUnit {
    pub fn to_pmol_per_l(self, value: f64) -> f64 {
        match self {
            AmhUnit::PmolPerL => value,
            AmhUnit::NgPerMl => value * NG_PER_ML_TO_PMOL_PER_L,
        }
    }
}

impl fmt::Display for AmhUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmhUnit::PmolPerL => f.write_str("pmol/L"),
            AmhUnit::NgPerMl => f.write_str("ng/ml"),
        }
    }
}

impl FromStr for AmhUnit {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pmol/l" | "pmol" => Ok(AmhUnit::PmolPerL),
            "ng/ml" | "ng" => Ok(AmhUnit::NgPerMl),
            other => Err(ChartError::InvalidParameter(format!(
                "unknown AMH unit '{}' (expected pmol/L or ng/ml)",
                other
            ))),
        }
    }
}

/// How a patient age is mapped onto a table row.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RowSnap {
    /// Round to the nearest row age.
    Nearest,
    /// Use the row at or below the age.
    Floor,
}

impl Default for RowSnap {
    fn default() -> Self {
        RowSnap::Nearest
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PatientObservation {
    /// Age as resolved from the input, before snapping.
    pub age: f64,
    pub value_pmol_l: f64,
    pub row: usize,
    pub row_age: f64,
}

/// Parse the raw AMH field.
pub fn parse_value(raw: &str) -> Result<f64, ChartError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ChartError::MissingInput("AMH value".into()));
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| ChartError::InvalidValue(format!("'{}' is not a number", raw)))?;
    validate_value(value)
}

pub fn validate_value(value: f64) -> Result<f64, ChartError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ChartError::InvalidValue(format!(
            "AMH level must be a number greater than 0, got {}",
            value
        )));
    }
    Ok(value)
}

/// Keeps at most one patient value in the table.
#[derive(Clone, Debug, Default)]
pub struct PatientPointManager {
    snap: RowSnap,
    last: Option<PatientObservation>,
}

impl PatientPointManager {
    pub fn new(snap: RowSnap) -> Self {
        Self { snap, last: None }
    }

    pub fn last(&self) -> Option<&PatientObservation> {
        self.last.as_ref()
    }

    /// Validate, convert to pmol/L and replace the previous patient point.
    /// On error the table is left untouched.
    pub fn submit(
        &mut self,
        table: &mut ChartTable,
        raw_value: f64,
        unit: AmhUnit,
        age: f64,
    ) -> Result<PatientObservation, ChartError> {
        let raw_value = validate_value(raw_value)?;
        let value = unit.to_pmol_per_l(raw_value);
        let age = validate_age(age)?;
        let row = self.locate_row(table, age)?;

        self.clear(table)?;
        table.set_patient_value(row, value)?;
        let observation = PatientObservation {
            age,
            value_pmol_l: value,
            row,
            row_age: table.rows()[row].age,
        };
        self.last = Some(observation);
        info!(
            age = observation.age,
            row_age = observation.row_age,
            pmol_l = value,
            "patient point updated"
        );
        Ok(observation)
    }

    /// Remove the current patient point, if any.
    pub fn clear(&mut self, table: &mut ChartTable) -> Result<(), ChartError> {
        let Some(previous) = self.last else {
            return Ok(());
        };
        let still_there = table
            .rows()
            .get(previous.row)
            .map(|row| row.age == previous.row_age && row.patient.is_some())
            .unwrap_or(false);
        if still_there {
            table.clear_patient_value(previous.row)?;
        } else {
            // Rows shifted since the last write.
            debug!(row = previous.row, "stale patient row, scanning table");
            for idx in table.patient_rows() {
                table.clear_patient_value(idx)?;
            }
        }
        self.last = None;
        Ok(())
    }

    fn locate_row(&self, table: &ChartTable, age: f64) -> Result<usize, ChartError> {
        let target = match self.snap {
            RowSnap::Nearest => (age / table.step()).round() * table.step(),
            RowSnap::Floor => age,
        };
        table.row_index_for_age(target).ok_or_else(|| {
            ChartError::InvalidAge(format!(
                "age {:.2} is outside the chart range 0-{}",
                age,
                table.max_age().unwrap_or(0.0)
            ))
        })
    }
}
