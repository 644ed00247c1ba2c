//! FILENAME: olap-engine/src/filter.rs
//! Per-field filters.
//!
//! A field filter combines up to three parts: a value filter (the set of
//! formatted values to keep), a condition filter (one or two comparisons)
//! and an optional custom predicate supplied by the host. The serializable
//! parts travel with the view definition; the predicate does not.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition::FilterType;
use crate::value::{compare_values, Value};

/// Custom record-level predicate over one field value.
///
/// Errors are reported back to the caller of the rebuild that evaluated it.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Value) -> Result<bool, String>>);

impl Predicate {
    pub fn new(f: impl Fn(&Value) -> Result<bool, String> + 'static) -> Self {
        Predicate(Arc::new(f))
    }

    pub fn call(&self, value: &Value) -> Result<bool, String> {
        (self.0)(value)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// ============================================================================
// VALUE FILTER
// ============================================================================

/// Keeps records whose formatted value is in `show_values` and/or contains
/// `filter_text` (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFilter {
    #[serde(default)]
    pub show_values: Option<BTreeSet<String>>,
    #[serde(default)]
    pub filter_text: Option<String>,
}

impl ValueFilter {
    pub fn showing<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueFilter {
            show_values: Some(values.into_iter().map(Into::into).collect()),
            filter_text: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.show_values.is_some() || self.filter_text.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn apply(&self, formatted: &str) -> bool {
        if let Some(show) = &self.show_values {
            if !show.contains(formatted) {
                return false;
            }
        }
        match self.filter_text.as_deref() {
            Some(text) if !text.is_empty() => {
                formatted.to_lowercase().contains(&text.to_lowercase())
            }
            _ => true,
        }
    }
}

// ============================================================================
// CONDITION FILTER
// ============================================================================

/// Comparison operators for condition filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    BeginsWith,
    EndsWith,
    Contains,
    NotContains,
}

/// One comparison. A condition without an operator accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub operator: Option<Operator>,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(operator: Operator, value: impl Into<Value>) -> Self {
        Condition {
            operator: Some(operator),
            value: value.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.operator.is_some()
    }

    /// Evaluates the condition. Text is compared case-insensitively, using
    /// the formatted value of the record when the operand is text.
    pub fn apply(&self, value: &Value, formatted: &str) -> bool {
        let op = match self.operator {
            Some(op) => op,
            None => return true,
        };

        if let Value::Text(operand) = &self.value {
            let lhs = formatted.to_lowercase();
            let rhs = operand.to_lowercase();
            return match op {
                Operator::Equals => lhs == rhs,
                Operator::NotEquals => lhs != rhs,
                Operator::Greater => lhs > rhs,
                Operator::GreaterOrEqual => lhs >= rhs,
                Operator::Less => lhs < rhs,
                Operator::LessOrEqual => lhs <= rhs,
                Operator::BeginsWith => lhs.starts_with(&rhs),
                Operator::EndsWith => lhs.ends_with(&rhs),
                Operator::Contains => lhs.contains(&rhs),
                Operator::NotContains => !lhs.contains(&rhs),
            };
        }

        let comparable = !value.is_null()
            && value.data_type() == self.value.data_type();
        let ordering = if comparable {
            Some(compare_values(value, &self.value))
        } else {
            None
        };

        match op {
            Operator::Equals => ordering == Some(Ordering::Equal),
            Operator::NotEquals => ordering != Some(Ordering::Equal),
            Operator::Greater => ordering == Some(Ordering::Greater),
            Operator::GreaterOrEqual => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Operator::Less => ordering == Some(Ordering::Less),
            Operator::LessOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Operator::BeginsWith | Operator::EndsWith | Operator::Contains => false,
            Operator::NotContains => true,
        }
    }
}

/// Up to two conditions joined by and/or.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionFilter {
    pub condition1: Condition,
    #[serde(default)]
    pub condition2: Condition,
    #[serde(default = "default_and")]
    pub and: bool,
}

fn default_and() -> bool {
    true
}

impl Default for ConditionFilter {
    fn default() -> Self {
        ConditionFilter {
            condition1: Condition::default(),
            condition2: Condition::default(),
            and: true,
        }
    }
}

impl ConditionFilter {
    pub fn single(condition: Condition) -> Self {
        ConditionFilter {
            condition1: condition,
            ..ConditionFilter::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.condition1.is_active() || self.condition2.is_active()
    }

    pub fn apply(&self, value: &Value, formatted: &str) -> bool {
        let c1 = &self.condition1;
        let c2 = &self.condition2;
        match (c1.is_active(), c2.is_active()) {
            (true, true) => {
                if self.and {
                    c1.apply(value, formatted) && c2.apply(value, formatted)
                } else {
                    c1.apply(value, formatted) || c2.apply(value, formatted)
                }
            }
            (true, false) => c1.apply(value, formatted),
            (false, true) => c2.apply(value, formatted),
            (false, false) => true,
        }
    }
}

// ============================================================================
// FIELD FILTER
// ============================================================================

/// The complete filter attached to one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_filter: Option<ValueFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_filter: Option<ConditionFilter>,
    #[serde(skip)]
    pub predicate: Option<Predicate>,
}

impl FieldFilter {
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldFilter {
            value_filter: Some(ValueFilter::showing(values)),
            ..FieldFilter::default()
        }
    }

    pub fn condition(condition: Condition) -> Self {
        FieldFilter {
            condition_filter: Some(ConditionFilter::single(condition)),
            ..FieldFilter::default()
        }
    }

    pub fn predicate(f: impl Fn(&Value) -> Result<bool, String> + 'static) -> Self {
        FieldFilter {
            predicate: Some(Predicate::new(f)),
            ..FieldFilter::default()
        }
    }

    pub fn is_active(&self, filter_type: FilterType) -> bool {
        self.predicate.is_some()
            || (filter_type.allows_values()
                && self.value_filter.as_ref().is_some_and(ValueFilter::is_active))
            || (filter_type.allows_conditions()
                && self.condition_filter.as_ref().is_some_and(ConditionFilter::is_active))
    }

    /// Clears the serializable parts and the predicate.
    pub fn clear(&mut self) {
        *self = FieldFilter::default();
    }

    /// Evaluates every active part of the filter.
    pub fn apply(&self, value: &Value, formatted: &str, filter_type: FilterType) -> Result<bool, String> {
        if filter_type.allows_conditions() {
            if let Some(cf) = &self.condition_filter {
                if cf.is_active() && !cf.apply(value, formatted) {
                    return Ok(false);
                }
            }
        }
        if filter_type.allows_values() {
            if let Some(vf) = &self.value_filter {
                if vf.is_active() && !vf.apply(formatted) {
                    return Ok(false);
                }
            }
        }
        match &self.predicate {
            Some(p) => p.call(value),
            None => Ok(true),
        }
    }
}
