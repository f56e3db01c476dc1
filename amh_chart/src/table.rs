use std::collections::BTreeMap;
use std::fmt::Write as _;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Band, ChartError, InterpolatedCurve};

/// Style annotation written next to the patient value.
pub const PATIENT_POINT_STYLE: &str =
    "point {shape-type: cross; size: 15; fill-color: blue; stroke-color: blue;}";

const AGE_DECIMALS: f64 = 1000.0;
const AGE_EPS: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Resolution {
    /// One row per year.
    Coarse,
    /// One row per half year.
    Fine,
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Coarse
    }
}

impl Resolution {
    pub fn step(self) -> f64 {
        match self {
            Resolution::Coarse => 1.0,
            Resolution::Fine => 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartRow {
    pub age: f64,
    pub bands: [Option<f64>; 5],
    pub patient: Option<f64>,
    pub style: Option<String>,
}

impl ChartRow {
    pub fn new(age: f64) -> Self {
        Self {
            age: fix_age(age),
            bands: [None; 5],
            patient: None,
            style: None,
        }
    }

    pub fn band(&self, band: Band) -> Option<f64> {
        self.bands[band.index()]
    }
}

/// Age-indexed rows: one column per percentile band plus the patient column.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartTable {
    step: f64,
    rows: Vec<ChartRow>,
}

impl ChartTable {
    /// Materialise rows at `0, step, 2*step, ..` up to and including `max_age`.
    /// Bands without a curve produce null columns.
    pub fn build(
        curves: &BTreeMap<Band, InterpolatedCurve>,
        resolution: Resolution,
        max_age: f64,
    ) -> Result<Self, ChartError> {
        if !max_age.is_finite() || max_age <= 0.0 {
            return Err(ChartError::InvalidParameter(format!(
                "chart upper age bound must be positive, got {}",
                max_age
            )));
        }
        let step = resolution.step();
        let count = (max_age / step + AGE_EPS).floor() as usize;
        let mut rows = Vec::with_capacity(count + 1);
        for i in 0..=count {
            let mut row = ChartRow::new(i as f64 * step);
            for (band, curve) in curves {
                row.bands[band.index()] = curve.evaluate(row.age);
            }
            rows.push(row);
        }
        debug!(rows = rows.len(), step, "built chart table");
        Ok(Self { step, rows })
    }

    pub fn column_labels() -> Vec<String> {
        let mut labels = vec!["Age".to_string()];
        labels.extend(Band::ALL.iter().map(|b| b.column_label()));
        labels.push("Patient".to_string());
        labels
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn rows(&self) -> &[ChartRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Highest age held by the table.
    pub fn max_age(&self) -> Option<f64> {
        self.rows.last().map(|row| row.age)
    }

    /// Index of the last row at or below `age`. `None` when `age` lies before the
    /// first row or a full step past the last one.
    pub fn row_index_for_age(&self, age: f64) -> Option<usize> {
        if !age.is_finite() {
            return None;
        }
        let last = self.rows.last()?;
        if age >= last.age + self.step - AGE_EPS {
            return None;
        }
        let split = self.rows.partition_point(|row| row.age <= age + AGE_EPS);
        split.checked_sub(1)
    }

    pub fn set_patient_value(&mut self, index: usize, value: f64) -> Result<(), ChartError> {
        let row = self.row_mut(index)?;
        row.patient = Some(value);
        row.style = Some(PATIENT_POINT_STYLE.to_string());
        Ok(())
    }

    pub fn clear_patient_value(&mut self, index: usize) -> Result<(), ChartError> {
        let row = self.row_mut(index)?;
        row.patient = None;
        row.style = None;
        Ok(())
    }

    /// Indices of rows currently carrying a patient value.
    pub fn patient_rows(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.patient.is_some())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Insert a row keeping ages ascending; returns its index. A row for an age
    /// already present is placed after it.
    pub fn insert_row(&mut self, mut row: ChartRow) -> Result<usize, ChartError> {
        if !row.age.is_finite() {
            return Err(ChartError::InvalidParameter(format!(
                "row age must be finite, got {}",
                row.age
            )));
        }
        row.age = fix_age(row.age);
        let key = OrderedFloat(row.age);
        let index = self
            .rows
            .partition_point(|existing| OrderedFloat(existing.age) <= key);
        self.rows.insert(index, row);
        Ok(index)
    }

    pub fn remove_row(&mut self, index: usize) -> Result<ChartRow, ChartError> {
        if index >= self.rows.len() {
            return Err(out_of_range(index, self.rows.len()));
        }
        Ok(self.rows.remove(index))
    }

    /// SHA-256 over the serialized rows, stable for identical tables.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.rows).unwrap_or_default();
        sha256_hex(&bytes)
    }

    fn row_mut(&mut self, index: usize) -> Result<&mut ChartRow, ChartError> {
        let len = self.rows.len();
        self.rows.get_mut(index).ok_or_else(|| out_of_range(index, len))
    }
}

fn out_of_range(index: usize, len: usize) -> ChartError {
    ChartError::InvalidParameter(format!("row {} out of range (table has {} rows)", index, len))
}

fn fix_age(age: f64) -> f64 {
    (age * AGE_DECIMALS).round() / AGE_DECIMALS
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
