//! FILENAME: olap-engine/src/show_as.rs
//! Show-as post pass over a freshly flattened output table.
//!
//! Differences look at the previous row (or column) at the same depth and
//! under the same parent group; anything else, including grand totals,
//! yields `None`. Percent-of-total kinds read the depth-0 tallies, which the
//! scan collects whenever such a kind is configured.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::definition::{AggregateKind, ShowAs};
use crate::key::GroupKey;
use crate::tally::TallyMap;
use crate::view::OutputTable;

/// Rewrites every cell whose value field has a show-as calculation.
pub(crate) fn apply(table: &mut OutputTable, tallies: &TallyMap) {
    let kinds: Vec<ShowAs> = table
        .columns()
        .iter()
        .map(|c| c.value_field().map(|f| f.show_as).unwrap_or_default())
        .collect();
    if kinds.iter().all(|k| *k == ShowAs::NoCalculation) {
        return;
    }

    let columns: Vec<Arc<GroupKey>> = table.columns().to_vec();
    let rows: Vec<Arc<GroupKey>> = table.rows().iter().map(|r| Arc::clone(&r.key)).collect();
    let raw: Vec<Vec<Option<f64>>> = table.rows().iter().map(|r| r.values.clone()).collect();

    let row_prev = predecessors(&rows);
    let col_prev = predecessors(&columns);

    for (j, kind) in kinds.iter().enumerate() {
        let column = &columns[j];
        let derived: Vec<Option<f64>> = match kind {
            ShowAs::NoCalculation => continue,
            ShowAs::DiffRow | ShowAs::DiffRowPct => {
                let pct = *kind == ShowAs::DiffRowPct;
                (0..rows.len())
                    .map(|i| difference(raw[i][j], row_prev[i].and_then(|p| raw[p][j]), pct))
                    .collect()
            }
            ShowAs::DiffCol | ShowAs::DiffColPct => {
                let pct = *kind == ShowAs::DiffColPct;
                (0..rows.len())
                    .map(|i| difference(raw[i][j], col_prev[j].and_then(|p| raw[i][p]), pct))
                    .collect()
            }
            ShowAs::PctGrand => {
                let base = grand_column(column)
                    .and_then(|gc| total(tallies, "", &gc, column.aggregate()));
                (0..rows.len()).map(|i| ratio(raw[i][j], base)).collect()
            }
            ShowAs::PctRow => {
                let gc = grand_column(column);
                (0..rows.len())
                    .map(|i| {
                        let base = gc
                            .as_deref()
                            .and_then(|gc| total(tallies, rows[i].as_str(), gc, column.aggregate()));
                        ratio(raw[i][j], base)
                    })
                    .collect()
            }
            ShowAs::PctCol => {
                let base = total(tallies, "", column.as_str(), column.aggregate());
                (0..rows.len()).map(|i| ratio(raw[i][j], base)).collect()
            }
            ShowAs::RunTot | ShowAs::RunTotPct => {
                running_totals(&rows, &row_prev, raw.iter().map(|r| r[j]), *kind == ShowAs::RunTotPct)
            }
        };

        for (row, value) in table.rows_mut().iter_mut().zip(derived) {
            row.values[j] = value;
        }
    }
}

/// For each key, the index of the previous key at the same depth under the
/// same parent, if the closest such key shares that parent.
fn predecessors(keys: &[Arc<GroupKey>]) -> Vec<Option<usize>> {
    let mut last: FxHashMap<(usize, Option<usize>), usize> = FxHashMap::default();
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            let prev = last.insert((key.field_count(), key.value_field_index()), i);
            if key.is_grand_total() {
                return None;
            }
            prev.filter(|&p| keys[p].same_parent(key))
        })
        .collect()
}

fn difference(value: Option<f64>, prev: Option<f64>, pct: bool) -> Option<f64> {
    let (v, p) = (value?, prev?);
    if pct {
        ratio(Some(v - p), Some(p))
    } else {
        Some(v - p)
    }
}

/// `value / base`; a zero or missing base gives `None`.
fn ratio(value: Option<f64>, base: Option<f64>) -> Option<f64> {
    match (value, base) {
        (Some(v), Some(b)) if b != 0.0 => Some(v / b),
        _ => None,
    }
}

fn running_totals(
    rows: &[Arc<GroupKey>],
    prev: &[Option<usize>],
    values: impl Iterator<Item = Option<f64>>,
    pct: bool,
) -> Vec<Option<f64>> {
    let values: Vec<Option<f64>> = values.collect();
    let mut acc = vec![0.0; rows.len()];
    let mut run_of = vec![0usize; rows.len()];
    let mut run_totals: Vec<f64> = Vec::new();

    for i in 0..rows.len() {
        if rows[i].is_grand_total() {
            continue;
        }
        let v = values[i].unwrap_or(0.0);
        match prev[i] {
            Some(p) => {
                acc[i] = acc[p] + v;
                run_of[i] = run_of[p];
            }
            None => {
                acc[i] = v;
                run_of[i] = run_totals.len();
                run_totals.push(0.0);
            }
        }
        run_totals[run_of[i]] = acc[i];
    }

    (0..rows.len())
        .map(|i| {
            if rows[i].is_grand_total() {
                return None;
            }
            values[i]?;
            if pct {
                ratio(Some(acc[i]), Some(run_totals[run_of[i]]))
            } else {
                Some(acc[i])
            }
        })
        .collect()
}

/// Key string of the grand-total column for `column`'s value field.
fn grand_column(column: &GroupKey) -> Option<String> {
    column.value_field().map(|f| format!("{}:", f.header))
}

fn total(tallies: &TallyMap, row: &str, column: &str, kind: AggregateKind) -> Option<f64> {
    tallies.get(row)?.get(column)?.aggregate(kind)
}
