//! FILENAME: olap-engine/src/view.rs
//! Output Table - the flattened result of a rebuild.
//!
//! One row per row key, one column per column key, both already sorted by
//! [`GroupKey::compare_to`]. Cells hold the aggregated (or show-as derived)
//! number, or `None` when the group has no data. Columns are addressed by
//! binding, which is the column key's string form.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value as JsonValue};

use crate::key::GroupKey;

/// Field name carrying the row key when rows are exported as records.
pub const ROW_KEY_FIELD: &str = "$rowKey";

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub key: Arc<GroupKey>,
    /// One entry per output column, in column order.
    pub values: Vec<Option<f64>>,
}

impl OutputRow {
    pub fn is_total(&self) -> bool {
        self.key.is_total()
    }
}

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct OutputTable {
    columns: Vec<Arc<GroupKey>>,
    column_index: FxHashMap<Arc<str>, usize>,
    rows: Vec<OutputRow>,
}

impl OutputTable {
    pub fn new(columns: Vec<Arc<GroupKey>>, rows: Vec<OutputRow>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, k)| (Arc::clone(k.key_string()), i))
            .collect();
        OutputTable {
            columns,
            column_index,
            rows,
        }
    }

    pub fn empty() -> Self {
        OutputTable::default()
    }

    pub fn columns(&self) -> &[Arc<GroupKey>] {
        &self.columns
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [OutputRow] {
        &mut self.rows
    }

    pub fn row(&self, index: usize) -> Option<&OutputRow> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the column bound to `binding`.
    pub fn column_index(&self, binding: &str) -> Option<usize> {
        self.column_index.get(binding).copied()
    }

    /// The column key bound to `binding`.
    pub fn column_key(&self, binding: &str) -> Option<&Arc<GroupKey>> {
        self.column_index(binding).map(|i| &self.columns[i])
    }

    /// Cell value at `row` for the column bound to `binding`.
    pub fn get(&self, row: usize, binding: &str) -> Option<f64> {
        let col = self.column_index(binding)?;
        self.rows.get(row).and_then(|r| r.values[col])
    }

    /// Finds the row whose key string equals `key`.
    pub fn find_row(&self, key: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.key.as_str() == key)
    }

    /// Exports the rows as JSON records: the row key under [`ROW_KEY_FIELD`],
    /// each row field's display value under its header, and one entry per
    /// column binding.
    pub fn to_json(&self) -> JsonValue {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                obj.insert(ROW_KEY_FIELD.to_string(), JsonValue::from(row.key.as_str()));
                for (i, field) in row.key.fields().iter().enumerate() {
                    if i < row.key.field_count() {
                        obj.insert(field.header.clone(), JsonValue::from(row.key.display_value(i)));
                    }
                }
                for (col, value) in self.columns.iter().zip(&row.values) {
                    let cell = match value {
                        Some(v) => serde_json::Number::from_f64(*v)
                            .map(JsonValue::Number)
                            .unwrap_or(JsonValue::Null),
                        None => JsonValue::Null,
                    };
                    obj.insert(col.as_str().to_string(), cell);
                }
                JsonValue::Object(obj)
            })
            .collect();
        JsonValue::Array(rows)
    }
}

impl PartialEq for OutputTable {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.rows == other.rows
    }
}
