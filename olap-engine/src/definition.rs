//! FILENAME: olap-engine/src/definition.rs
//! Pivot Definition - The field configuration.
//!
//! This module contains all the types needed to DESCRIBE a pivot view:
//! the master field list entries, the aggregate and show-as kinds, the
//! totals options and the serializable view definition blob that hosts
//! save and restore.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PivotError;
use crate::filter::FieldFilter;
use crate::value::DataType;

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions for value fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregateKind {
    #[default]
    Sum,
    Count,
    Average,
    Min,
    Max,
    Range,
    /// Sample variance.
    Var,
    /// Population variance.
    VarPop,
    /// Sample standard deviation.
    StdDev,
    /// Population standard deviation.
    StdDevPop,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Sum => "Sum",
            AggregateKind::Count => "Count",
            AggregateKind::Average => "Average",
            AggregateKind::Min => "Min",
            AggregateKind::Max => "Max",
            AggregateKind::Range => "Range",
            AggregateKind::Var => "Var",
            AggregateKind::VarPop => "VarPop",
            AggregateKind::StdDev => "StdDev",
            AggregateKind::StdDevPop => "StdDevPop",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateKind {
    type Err = PivotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "Sum" => AggregateKind::Sum,
            "Count" | "Cnt" => AggregateKind::Count,
            "Average" | "Avg" => AggregateKind::Average,
            "Min" => AggregateKind::Min,
            "Max" => AggregateKind::Max,
            "Range" | "Rng" => AggregateKind::Range,
            "Var" => AggregateKind::Var,
            "VarPop" => AggregateKind::VarPop,
            "StdDev" | "Std" => AggregateKind::StdDev,
            "StdDevPop" | "StdPop" => AggregateKind::StdDevPop,
            other => return Err(PivotError::InvalidAggregateKind(other.to_string())),
        };
        Ok(kind)
    }
}

impl TryFrom<String> for AggregateKind {
    type Error = PivotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AggregateKind> for String {
    fn from(kind: AggregateKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Post-aggregation calculations applied to value fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShowAs {
    #[default]
    NoCalculation,
    /// Difference from the previous row in the same group.
    DiffRow,
    /// Percentage difference from the previous row in the same group.
    DiffRowPct,
    /// Difference from the previous column in the same group.
    DiffCol,
    /// Percentage difference from the previous column in the same group.
    DiffColPct,
    /// Fraction of the grand total.
    PctGrand,
    /// Fraction of the row total.
    PctRow,
    /// Fraction of the column total.
    PctCol,
    /// Running total down the rows of a group.
    RunTot,
    /// Running total as a fraction of the group total.
    RunTotPct,
}

impl ShowAs {
    /// Whether this calculation reads grand-total cells from the tallies.
    pub fn needs_totals(&self) -> bool {
        matches!(self, ShowAs::PctGrand | ShowAs::PctRow | ShowAs::PctCol)
    }
}

// ============================================================================
// TOTALS AND FILTERS
// ============================================================================

/// Which subtotal depths are emitted along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShowTotals {
    None,
    #[default]
    GrandTotals,
    Subtotals,
}

impl ShowTotals {
    /// Key depths to aggregate for an axis with `full_depth` fields.
    ///
    /// Depth 0 is the grand total and `full_depth` the detail level.
    pub fn depths(&self, full_depth: usize) -> Vec<usize> {
        let (start, step) = match self {
            ShowTotals::None => (full_depth, 1),
            ShowTotals::GrandTotals => (0, full_depth.max(1)),
            ShowTotals::Subtotals => (0, 1),
        };
        (start..=full_depth).step_by(step).collect()
    }
}

/// Which filter parts are honored for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    Condition,
    Value,
    #[default]
    Both,
}

impl FilterType {
    pub fn allows_conditions(&self) -> bool {
        matches!(self, FilterType::Condition | FilterType::Both)
    }

    pub fn allows_values(&self) -> bool {
        matches!(self, FilterType::Value | FilterType::Both)
    }
}

/// The four role lists a field can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldRole {
    Row,
    Column,
    Value,
    Filter,
}

// ============================================================================
// FIELD DEFINITIONS
// ============================================================================

/// A field on the master field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotField {
    /// Display name; unique within the master field list.
    pub header: String,

    /// Name of the record field this field reads.
    pub binding: String,

    #[serde(default)]
    pub data_type: Option<DataType>,

    /// Aggregate used when this field is a value field.
    #[serde(default)]
    pub aggregate: AggregateKind,

    #[serde(default)]
    pub show_as: ShowAs,

    /// Header of another master field whose value weights this one.
    #[serde(default)]
    pub weight_field: Option<String>,

    /// Sort this field's values in descending order.
    #[serde(default)]
    pub descending: bool,

    /// Display format (`n0`, `f2`, `MMMM yyyy`, ...).
    #[serde(default)]
    pub format: String,

    /// Overrides the engine's default filter type.
    #[serde(default)]
    pub filter_type: Option<FilterType>,

    /// Travels in the role-list section of the view definition instead.
    #[serde(skip)]
    pub filter: FieldFilter,

    /// Header of the field this one was duplicated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<String>,
}

impl PivotField {
    pub fn new(header: impl Into<String>, binding: impl Into<String>) -> Self {
        PivotField {
            header: header.into(),
            binding: binding.into(),
            data_type: None,
            aggregate: AggregateKind::Sum,
            show_as: ShowAs::NoCalculation,
            weight_field: None,
            descending: false,
            format: String::new(),
            filter_type: None,
            filter: FieldFilter::default(),
            parent_field: None,
        }
    }

    pub fn with_aggregate(mut self, aggregate: AggregateKind) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn effective_filter_type(&self, default: FilterType) -> FilterType {
        self.filter_type.unwrap_or(default)
    }

    pub fn has_active_filter(&self, default: FilterType) -> bool {
        self.filter.is_active(self.effective_filter_type(default))
    }
}

// ============================================================================
// VIEW DEFINITION
// ============================================================================

/// An active filter stored alongside a role list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub header: String,
    pub filter: FieldFilter,
}

/// Membership of one role list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterDefinition>,
}

/// The complete, serializable view configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    #[serde(default = "default_true")]
    pub show_zeros: bool,
    #[serde(default)]
    pub show_row_totals: ShowTotals,
    #[serde(default)]
    pub show_column_totals: ShowTotals,
    #[serde(default)]
    pub totals_before_data: bool,
    #[serde(default)]
    pub default_filter_type: FilterType,
    pub fields: Vec<PivotField>,
    #[serde(default)]
    pub row_fields: RoleDefinition,
    #[serde(default)]
    pub column_fields: RoleDefinition,
    #[serde(default)]
    pub value_fields: RoleDefinition,
    #[serde(default)]
    pub filter_fields: RoleDefinition,
}

fn default_true() -> bool {
    true
}

impl ViewDefinition {
    pub fn role(&self, role: FieldRole) -> &RoleDefinition {
        match role {
            FieldRole::Row => &self.row_fields,
            FieldRole::Column => &self.column_fields,
            FieldRole::Value => &self.value_fields,
            FieldRole::Filter => &self.filter_fields,
        }
    }

    pub fn to_json(&self) -> Result<String, PivotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PivotError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_kind_parsing() {
        assert_eq!("Sum".parse::<AggregateKind>().unwrap(), AggregateKind::Sum);
        assert_eq!("Cnt".parse::<AggregateKind>().unwrap(), AggregateKind::Count);
        assert_eq!("StdPop".parse::<AggregateKind>().unwrap(), AggregateKind::StdDevPop);
        assert!(matches!(
            "Median".parse::<AggregateKind>(),
            Err(PivotError::InvalidAggregateKind(name)) if name == "Median"
        ));
    }

    #[test]
    fn test_aggregate_kind_serde() {
        let json = serde_json::to_string(&AggregateKind::Average).unwrap();
        assert_eq!(json, "\"Average\"");
        let err = serde_json::from_str::<AggregateKind>("\"Mode\"").unwrap_err();
        assert!(err.to_string().contains("Invalid aggregate kind"));
    }

    #[test]
    fn test_total_depths() {
        assert_eq!(ShowTotals::None.depths(2), vec![2]);
        assert_eq!(ShowTotals::GrandTotals.depths(2), vec![0, 2]);
        assert_eq!(ShowTotals::Subtotals.depths(2), vec![0, 1, 2]);
        assert_eq!(ShowTotals::GrandTotals.depths(0), vec![0]);
        assert_eq!(ShowTotals::Subtotals.depths(0), vec![0]);
        assert_eq!(ShowTotals::None.depths(0), vec![0]);
    }

    #[test]
    fn test_field_defaults_from_json() {
        let field: PivotField =
            serde_json::from_str(r#"{"header":"Sales","binding":"S"}"#).unwrap();
        assert_eq!(field, PivotField::new("Sales", "S"));
    }
}
