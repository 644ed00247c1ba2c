//! FILENAME: tests/test_output.rs
//! Integration tests for the sorted output view and drill-through.

mod common;

use common::{column, row_keys, sales_engine};
use olap_engine::{
    FieldFilter, FieldRole, PivotEngine, ShowTotals, SortDescription, Value, ROW_KEY_FIELD,
};

fn nested_engine() -> PivotEngine {
    let (mut engine, _) = sales_engine();
    engine.add_to(FieldRole::Row, "Country");
    engine.add_to(FieldRole::Row, "City");
    engine.add_to(FieldRole::Value, "Sales");
    engine.set_show_row_totals(ShowTotals::Subtotals);
    engine.refresh(false).unwrap();
    engine
}

// ============================================================================
// SORTED VIEW
// ============================================================================

#[test]
fn test_user_sort_keeps_totals_pinned() {
    let mut engine = nested_engine();
    engine
        .output_mut()
        .set_sort(vec![SortDescription::new("Sales:", false)]);

    assert_eq!(
        row_keys(&engine),
        vec![
            "Country:UK;City:London;",
            "Country:UK;City:Leeds;",
            "Country:UK;",
            // equal sales keep their source order
            "Country:US;City:LA;",
            "Country:US;City:NYC;",
            "Country:US;",
            "",
        ]
    );
    assert_eq!(
        column(&engine, "Sales:"),
        vec![
            Some(200.0),
            Some(40.0),
            Some(240.0),
            Some(250.0),
            Some(250.0),
            Some(500.0),
            Some(740.0),
        ]
    );
}

#[test]
fn test_user_sort_survives_rebuild() {
    let mut engine = nested_engine();
    engine
        .output_mut()
        .set_sort(vec![SortDescription::new("City", false)]);
    engine.refresh(false).unwrap();

    assert_eq!(engine.output().sort_descriptions().len(), 1);
    assert_eq!(row_keys(&engine)[0], "Country:UK;City:London;");
    assert_eq!(row_keys(&engine)[3], "Country:US;City:NYC;");
}

#[test]
fn test_table_exports_rows_as_json() {
    let engine = nested_engine();
    let json = engine.table().to_json();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0][ROW_KEY_FIELD], "Country:UK;City:Leeds;");
    assert_eq!(rows[0]["City"], "Leeds");
    assert_eq!(rows[6]["Sales:"], 740.0);
}

// ============================================================================
// DRILL-THROUGH
// ============================================================================

#[test]
fn test_detail_for_row_key() {
    let engine = nested_engine();
    let table = engine.table();
    let us = table.rows()[table.find_row("Country:US;").unwrap()].key.clone();

    let detail = engine.get_detail(Some(&*us), "Sales:").unwrap();
    assert_eq!(detail.len(), 4);
    assert!(detail.iter().all(|r| r.get("Country") == &Value::from("US")));

    let all = engine.get_detail(None, "Sales:").unwrap();
    assert_eq!(all.len(), 7);
}

#[test]
fn test_detail_respects_column_key_and_filters() {
    let (mut engine, _) = sales_engine();
    engine.add_to(FieldRole::Row, "Country");
    engine.add_to(FieldRole::Column, "Year");
    engine.add_to(FieldRole::Value, "Sales");
    engine
        .set_field_filter("Country", FieldFilter::values(["UK"]))
        .unwrap();
    engine.refresh(false).unwrap();

    let detail = engine.get_detail(None, "Year:2024;Sales:").unwrap();
    assert_eq!(detail.len(), 2);
    assert!(detail
        .iter()
        .all(|r| r.get("Country") == &Value::from("UK") && r.get("Year") == &Value::from(2024)));
}

#[test]
fn test_detail_for_sorted_row_index() {
    let mut engine = nested_engine();
    engine
        .output_mut()
        .set_sort(vec![SortDescription::new("Sales:", false)]);

    // London sorts first in the UK group
    let detail = engine.get_detail_for_row(0, "Sales:").unwrap();
    assert_eq!(detail.len(), 2);
    assert!(detail.iter().all(|r| r.get("City") == &Value::from("London")));
    assert!(engine.get_detail_for_row(99, "Sales:").unwrap().is_empty());
}
