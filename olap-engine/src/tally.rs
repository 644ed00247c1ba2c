//! FILENAME: olap-engine/src/tally.rs
//! Tally - running accumulator for one pivot cell.
//!
//! A tally keeps the minimal state needed to answer every supported
//! aggregate: counts, weighted sum, sum of squares, min and max.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::definition::AggregateKind;
use crate::value::Value;

/// Tallies keyed by row-key string, then column-key string.
pub type TallyMap = FxHashMap<Arc<str>, FxHashMap<Arc<str>, Tally>>;

/// Accumulator for one (row key, column key) cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    /// All non-null observations.
    pub count: u64,
    /// Observations that contributed to the numeric statistics.
    pub count_numeric: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Tally {
    pub fn new() -> Self {
        Tally::default()
    }

    /// Adds an observation, optionally weighted.
    ///
    /// Numbers update every statistic (multiplied by the weight when the
    /// weight is numeric). Booleans count as 1/0 towards the counts and sums
    /// but leave min/max alone. Other non-null values only increment `count`.
    pub fn add(&mut self, value: &Value, weight: Option<&Value>) {
        match value {
            Value::Null => {}
            Value::Number(n) if n.is_nan() => self.count += 1,
            Value::Number(n) => {
                let weighted = match weight.and_then(Value::as_number) {
                    Some(w) => n * w,
                    None => *n,
                };
                self.add_number(weighted);
            }
            Value::Boolean(b) => {
                let v = if *b { 1.0 } else { 0.0 };
                self.count += 1;
                self.count_numeric += 1;
                self.sum += v;
                self.sum_of_squares += v * v;
            }
            Value::Text(_) | Value::Date(_) => self.count += 1,
        }
    }

    /// Adds a plain numeric observation.
    pub fn add_number(&mut self, value: f64) {
        self.count += 1;
        self.count_numeric += 1;
        self.sum += value;
        self.sum_of_squares += value * value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Merges another tally into this one.
    pub fn merge(&mut self, other: &Tally) {
        self.count += other.count;
        self.count_numeric += other.count_numeric;
        self.sum += other.sum;
        self.sum_of_squares += other.sum_of_squares;
        if let Some(other_min) = other.min {
            self.min = Some(self.min.map_or(other_min, |m| m.min(other_min)));
        }
        if let Some(other_max) = other.max {
            self.max = Some(self.max.map_or(other_max, |m| m.max(other_max)));
        }
    }

    /// Computes an aggregate. Returns `None` when nothing was observed.
    pub fn aggregate(&self, kind: AggregateKind) -> Option<f64> {
        if self.count == 0 {
            return None;
        }

        let n = self.count_numeric as f64;
        let value = match kind {
            AggregateKind::Sum => self.sum,
            AggregateKind::Count => self.count as f64,
            AggregateKind::Average => {
                if self.count_numeric > 0 {
                    self.sum / n
                } else {
                    0.0
                }
            }
            AggregateKind::Min => return self.min,
            AggregateKind::Max => return self.max,
            AggregateKind::Range => match (self.min, self.max) {
                (Some(min), Some(max)) => max - min,
                _ => return None,
            },
            AggregateKind::VarPop => self.population_variance(),
            AggregateKind::Var => self.sample_variance(),
            AggregateKind::StdDevPop => self.population_variance().sqrt(),
            AggregateKind::StdDev => self.sample_variance().sqrt(),
        };
        Some(value)
    }

    fn population_variance(&self) -> f64 {
        if self.count_numeric <= 1 {
            return 0.0;
        }
        let n = self.count_numeric as f64;
        let avg = self.sum / n;
        // rounding can push this a hair below zero for constant inputs
        (self.sum_of_squares / n - avg * avg).max(0.0)
    }

    fn sample_variance(&self) -> f64 {
        if self.count_numeric <= 1 {
            return 0.0;
        }
        let n = self.count_numeric as f64;
        self.population_variance() * n / (n - 1.0)
    }
}
