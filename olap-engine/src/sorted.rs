//! FILENAME: olap-engine/src/sorted.rs
//! Sorted Output View - user sorting over the published output table.
//!
//! Sorting only reorders contiguous runs of detail rows. Subtotal and grand
//! total rows stay where the engine placed them, so a sort never moves a
//! total away from the group it summarizes.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::compare_values;
use crate::view::{OutputRow, OutputTable};

/// One sort criterion: a column binding or a row field header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescription {
    pub binding: String,
    pub ascending: bool,
}

impl SortDescription {
    pub fn new(binding: impl Into<String>, ascending: bool) -> Self {
        SortDescription {
            binding: binding.into(),
            ascending,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SortedOutputView {
    source: Arc<OutputTable>,
    sort: Vec<SortDescription>,
    /// Source row index for each view position.
    order: Vec<usize>,
}

impl SortedOutputView {
    pub fn new(source: Arc<OutputTable>) -> Self {
        let mut view = SortedOutputView {
            source,
            sort: Vec::new(),
            order: Vec::new(),
        };
        view.apply();
        view
    }

    /// Replaces the underlying table and re-applies the current sort.
    pub fn set_source(&mut self, source: Arc<OutputTable>) {
        self.source = source;
        self.apply();
    }

    pub fn source(&self) -> &Arc<OutputTable> {
        &self.source
    }

    pub fn sort_descriptions(&self) -> &[SortDescription] {
        &self.sort
    }

    pub fn set_sort(&mut self, sort: Vec<SortDescription>) {
        self.sort = sort;
        self.apply();
    }

    pub fn clear_sort(&mut self) {
        self.set_sort(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&OutputRow> {
        self.order.get(index).and_then(|&i| self.source.row(i))
    }

    pub fn rows(&self) -> impl Iterator<Item = &OutputRow> {
        self.order.iter().filter_map(|&i| self.source.row(i))
    }

    pub fn get(&self, index: usize, binding: &str) -> Option<f64> {
        let source_row = *self.order.get(index)?;
        self.source.get(source_row, binding)
    }

    fn apply(&mut self) {
        let rows = self.source.rows();
        self.order = (0..rows.len()).collect();
        if self.sort.is_empty() {
            return;
        }

        let mut start = 0;
        while start < rows.len() {
            if rows[start].is_total() {
                start += 1;
                continue;
            }
            let mut end = start;
            while end < rows.len() && !rows[end].is_total() {
                end += 1;
            }
            let source = &self.source;
            let sort = &self.sort;
            self.order[start..end].sort_by(|&a, &b| compare_rows(source, sort, a, b));
            start = end;
        }
    }
}

fn compare_rows(table: &OutputTable, sort: &[SortDescription], a: usize, b: usize) -> Ordering {
    for sd in sort {
        let cmp = match table.column_index(&sd.binding) {
            Some(col) => {
                let (va, vb) = (table.rows()[a].values[col], table.rows()[b].values[col]);
                match (va, vb) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => return Ordering::Greater,
                    (Some(_), None) => return Ordering::Less,
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                }
            }
            None => {
                let (ka, kb) = (&table.rows()[a].key, &table.rows()[b].key);
                let index = ka
                    .fields()
                    .iter()
                    .position(|f| f.header == sd.binding || f.binding == sd.binding);
                let (va, vb) = match index {
                    Some(i) => (ka.raw_value(i), kb.raw_value(i)),
                    None => continue,
                };
                match (va, vb) {
                    (Some(x), Some(y)) => match (x.is_null(), y.is_null()) {
                        (true, true) => Ordering::Equal,
                        (true, false) => return Ordering::Greater,
                        (false, true) => return Ordering::Less,
                        (false, false) => compare_values(x, y),
                    },
                    _ => Ordering::Equal,
                }
            }
        };
        if cmp != Ordering::Equal {
            return if sd.ascending { cmp } else { cmp.reverse() };
        }
    }
    Ordering::Equal
}
