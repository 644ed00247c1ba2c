//! FILENAME: tests/test_view_definition.rs
//! Integration tests for saving and restoring the view definition.

mod common;

use common::{cell, record_events, sales_engine};
use olap_engine::{
    AggregateKind, Condition, ConditionFilter, FieldFilter, FieldRole, FilterType, ManualClock,
    Operator, PivotEngine, PivotError, PivotEvent, ShowAs, ShowTotals, ValueFilter,
    ViewDefinition,
};

fn configured_engine() -> PivotEngine {
    let (mut engine, _) = sales_engine();
    engine.begin_update();
    engine.add_to(FieldRole::Row, "Country");
    engine.add_to(FieldRole::Row, "City");
    engine.add_to(FieldRole::Column, "Year");
    engine.add_to(FieldRole::Value, "Sales");
    engine.duplicate_value_field("Sales");
    engine
        .update_field("Sales2", |f| {
            f.aggregate = AggregateKind::Average;
            f.show_as = ShowAs::DiffRow;
        })
        .unwrap();
    engine
        .set_field_filter("City", FieldFilter::values(["NYC", "London", "Leeds"]))
        .unwrap();
    engine
        .set_field_filter(
            "Sales",
            FieldFilter {
                condition_filter: Some(ConditionFilter {
                    condition1: Condition::new(Operator::Greater, 45),
                    condition2: Condition::new(Operator::Less, 1000),
                    and: true,
                }),
                ..FieldFilter::default()
            },
        )
        .unwrap();
    engine.set_show_row_totals(ShowTotals::Subtotals);
    engine.set_totals_before_data(true);
    engine.set_show_zeros(false);
    engine.set_default_filter_type(FilterType::Value);
    engine.end_update().unwrap();
    engine
}

#[test]
fn test_round_trip_through_json() {
    let source = configured_engine();
    let json = source.view_definition().unwrap();

    let (mut target, _) = sales_engine();
    target.set_view_definition(&json).unwrap();

    assert_eq!(target.definition(), source.definition());
    assert_eq!(target.view_definition().unwrap(), json);
    assert_eq!(target.role_fields(FieldRole::Value), ["Sales", "Sales2"]);
    assert_eq!(**target.table(), **source.table());
}

#[test]
fn test_typed_round_trip() {
    let definition = configured_engine().definition();
    let parsed = ViewDefinition::from_json(&definition.to_json().unwrap()).unwrap();
    assert_eq!(parsed, definition);
}

#[test]
fn test_definition_json_shape() {
    let json: serde_json::Value =
        serde_json::from_str(&configured_engine().view_definition().unwrap()).unwrap();

    assert_eq!(json["showZeros"], false);
    assert_eq!(json["showRowTotals"], "Subtotals");
    assert_eq!(json["totalsBeforeData"], true);
    assert_eq!(json["defaultFilterType"], "Value");
    assert_eq!(json["rowFields"]["items"], serde_json::json!(["Country", "City"]));
    assert_eq!(json["rowFields"]["filters"][0]["header"], "City");
    assert_eq!(json["valueFields"]["items"][1], "Sales2");

    let sales2 = json["fields"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["header"] == "Sales2")
        .unwrap();
    assert_eq!(sales2["aggregate"], "Average");
    assert_eq!(sales2["showAs"], "DiffRow");
    assert_eq!(sales2["parentField"], "Sales");
}

#[test]
fn test_restored_filters_apply() {
    let json = configured_engine().view_definition().unwrap();
    let (mut engine, _) = sales_engine();
    engine.set_view_definition(&json).unwrap();

    let city = engine.field("City").unwrap();
    assert_eq!(city.filter.value_filter, Some(ValueFilter::showing(["NYC", "London", "Leeds"])));
    // the default filter type is Value, so the Sales condition is not applied
    assert_eq!(cell(&engine, "Country:US;City:NYC;", "Year:2023;Sales:"), Some(100.0));
    assert_eq!(engine.table().find_row("Country:US;City:LA;"), None);
}

#[test]
fn test_set_view_definition_rebuilds_and_notifies() {
    let json = configured_engine().view_definition().unwrap();
    let mut engine = PivotEngine::with_clock(ManualClock::new());
    engine.set_items_source(common::SalesFixture::records());
    let events = record_events(&mut engine);

    engine.set_view_definition(&json).unwrap();
    assert!(events.borrow().contains(&PivotEvent::ViewDefinitionChanged));
    assert_eq!(events.borrow().last(), Some(&PivotEvent::Updated));
    assert!(!engine.table().is_empty());
}

#[test]
fn test_unknown_aggregate_is_rejected() {
    let json = r#"{"fields":[{"header":"Sales","binding":"S","aggregate":"Median"}]}"#;
    let mut engine = PivotEngine::with_clock(ManualClock::new());
    let err = engine.set_view_definition(json).unwrap_err();
    assert!(matches!(err, PivotError::Json(_)));
    assert!(err.to_string().contains("Median"));
}

#[test]
fn test_duplicate_headers_are_rejected() {
    let json = r#"{"fields":[{"header":"A","binding":"x"},{"header":"A","binding":"y"}]}"#;
    let mut engine = PivotEngine::with_clock(ManualClock::new());
    assert!(matches!(
        engine.set_view_definition(json),
        Err(PivotError::DuplicateField(h)) if h == "A"
    ));
}

#[test]
fn test_unknown_role_headers_are_skipped() {
    let json = r#"{
        "fields":[{"header":"Country","binding":"Country"},{"header":"Sales","binding":"Sales"}],
        "rowFields":{"items":["Country","Ghost"]},
        "valueFields":{"items":["Sales"]}
    }"#;
    let (mut engine, _) = sales_engine();
    engine.set_view_definition(json).unwrap();
    assert_eq!(engine.role_fields(FieldRole::Row), ["Country"]);
    assert!(engine.show_zeros());
    assert_eq!(cell(&engine, "", "Sales:"), Some(740.0));
}
