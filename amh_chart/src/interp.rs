// Turns sparse, irregularly sampled percentile tables into a queryable function of age.
// Two edge policies are supported; a chart applies one of them to every band.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Sample;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InterpolationPolicy {
    /// Evaluate anywhere; flat beyond the first/last sample.
    Continuous,
    /// Precomputed at whole ages; undefined outside the sampled range.
    DenseGrid,
}

impl Default for InterpolationPolicy {
    fn default() -> Self {
        InterpolationPolicy::Continuous
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum InterpolatedCurve {
    Continuous { knots: Vec<Sample> },
    DenseGrid { values: Vec<Option<f64>> },
}

impl InterpolatedCurve {
    /// Build a curve from raw samples. `max_age` bounds the precomputed grid and is
    /// ignored by the continuous policy.
    pub fn build(samples: &[Sample], policy: InterpolationPolicy, max_age: u32) -> Self {
        let sorted = sort_samples(samples);
        match policy {
            InterpolationPolicy::Continuous => InterpolatedCurve::Continuous {
                knots: merge_duplicates(&sorted),
            },
            InterpolationPolicy::DenseGrid => InterpolatedCurve::DenseGrid {
                values: (0..=max_age).map(|age| grid_value(&sorted, age)).collect(),
            },
        }
    }

    pub fn policy(&self) -> InterpolationPolicy {
        match self {
            InterpolatedCurve::Continuous { .. } => InterpolationPolicy::Continuous,
            InterpolatedCurve::DenseGrid { .. } => InterpolationPolicy::DenseGrid,
        }
    }

    pub fn evaluate(&self, age: f64) -> Option<f64> {
        if !age.is_finite() {
            return None;
        }
        match self {
            InterpolatedCurve::Continuous { knots } => evaluate_knots(knots, age),
            InterpolatedCurve::DenseGrid { values } => evaluate_grid(values, age),
        }
    }

    /// Age range covered by defined values, if any.
    pub fn domain(&self) -> Option<(f64, f64)> {
        match self {
            InterpolatedCurve::Continuous { knots } => Some((knots.first()?.x, knots.last()?.x)),
            InterpolatedCurve::DenseGrid { values } => {
                let first = values.iter().position(Option::is_some)?;
                let last = values.iter().rposition(Option::is_some)?;
                Some((first as f64, last as f64))
            }
        }
    }
}

/// Stable ascending sort by age; equal ages keep their input order.
fn sort_samples(samples: &[Sample]) -> Vec<Sample> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| OrderedFloat(s.x));
    sorted
}

/// Collapse samples sharing an age into one knot carrying their mean value.
fn merge_duplicates(sorted: &[Sample]) -> Vec<Sample> {
    let mut knots: Vec<Sample> = Vec::with_capacity(sorted.len());
    let mut run = 0usize;
    for sample in sorted {
        match knots.last_mut() {
            Some(last) if last.x == sample.x => {
                run += 1;
                last.y += (sample.y - last.y) / run as f64;
            }
            _ => {
                knots.push(*sample);
                run = 1;
            }
        }
    }
    knots
}

fn lerp(lower: &Sample, upper: &Sample, age: f64) -> f64 {
    let t = (age - lower.x) / (upper.x - lower.x);
    lower.y + t * (upper.y - lower.y)
}

fn evaluate_knots(knots: &[Sample], age: f64) -> Option<f64> {
    let split = knots.partition_point(|s| s.x <= age);
    let lower = split.checked_sub(1).map(|i| &knots[i]);
    let upper = knots.get(split);
    match (lower, upper) {
        (Some(lower), Some(upper)) => Some(lerp(lower, upper, age)),
        (Some(lower), None) => Some(lower.y),
        (None, Some(upper)) => Some(upper.y),
        (None, None) => None,
    }
}

fn grid_value(sorted: &[Sample], age: u32) -> Option<f64> {
    let target = age as f64;
    let start = sorted.partition_point(|s| s.x < target);
    let end = sorted.partition_point(|s| s.x < target + 1.0);
    let bucket = &sorted[start..end];
    if !bucket.is_empty() {
        let sum: f64 = bucket.iter().map(|s| s.y).sum();
        return Some(sum / bucket.len() as f64);
    }
    // Nothing in [age, age + 1): bracket with the neighbours strictly below and above.
    let lower = start.checked_sub(1).map(|i| &sorted[i])?;
    let upper = sorted.get(end)?;
    Some(lerp(lower, upper, target))
}

fn evaluate_grid(values: &[Option<f64>], age: f64) -> Option<f64> {
    if age < 0.0 {
        return None;
    }
    let lo = age.floor();
    let frac = age - lo;
    let lo_value = (*values.get(lo as usize)?)?;
    if frac == 0.0 {
        return Some(lo_value);
    }
    let hi_value = (*values.get(lo as usize + 1)?)?;
    Some(lo_value + frac * (hi_value - lo_value))
}
