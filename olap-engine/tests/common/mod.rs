//! FILENAME: tests/common/mod.rs
//! Fixtures shared by the olap-engine integration tests.

#![allow(dead_code)]

use olap_engine::{
    AggregateKind, FieldRole, ManualClock, PivotEngine, PivotEvent, PivotField, Record,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Installs a test logger once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small sales dataset used across tests.
pub struct SalesFixture;

impl SalesFixture {
    /// (country, city, year, sales, quantity)
    pub fn data() -> Vec<(&'static str, &'static str, i32, f64, f64)> {
        vec![
            ("US", "NYC", 2023, 100.0, 1.0),
            ("US", "NYC", 2024, 150.0, 2.0),
            ("US", "LA", 2023, 200.0, 3.0),
            ("US", "LA", 2024, 50.0, 1.0),
            ("UK", "London", 2023, 80.0, 2.0),
            ("UK", "London", 2024, 120.0, 4.0),
            ("UK", "Leeds", 2024, 40.0, 1.0),
        ]
    }

    pub fn records() -> Vec<Record> {
        Self::data()
            .into_iter()
            .map(|(country, city, year, sales, qty)| {
                Record::new()
                    .with("Country", country)
                    .with("City", city)
                    .with("Year", year)
                    .with("Sales", sales)
                    .with("Qty", qty)
            })
            .collect()
    }

    pub fn fields() -> Vec<PivotField> {
        vec![
            PivotField::new("Country", "Country"),
            PivotField::new("City", "City"),
            PivotField::new("Year", "Year"),
            PivotField::new("Sales", "Sales").with_format("n0"),
            PivotField::new("Qty", "Qty").with_aggregate(AggregateKind::Sum),
        ]
    }

    /// The three-record dataset `C`/`S` used by the basic scenarios.
    pub fn scenario_records() -> Vec<Record> {
        vec![
            Record::new().with("C", "US").with("S", 10),
            Record::new().with("C", "US").with("S", 20),
            Record::new().with("C", "UK").with("S", 5),
        ]
    }
}

/// Engine on a manual clock, loaded with the sales fixture.
pub fn sales_engine() -> (PivotEngine, ManualClock) {
    let clock = ManualClock::new();
    let mut engine = PivotEngine::with_clock(clock.clone());
    for field in SalesFixture::fields() {
        engine.add_field(field).unwrap();
    }
    engine.set_items_source(SalesFixture::records());
    (engine, clock)
}

/// Engine with `Country`(C) rows and `Sales`(S) values over the scenario data.
pub fn scenario_engine(aggregate: AggregateKind) -> PivotEngine {
    let mut engine = PivotEngine::with_clock(ManualClock::new());
    engine.add_field(PivotField::new("Country", "C")).unwrap();
    engine
        .add_field(PivotField::new("Sales", "S").with_aggregate(aggregate))
        .unwrap();
    engine.set_items_source(SalesFixture::scenario_records());
    engine.add_to(FieldRole::Row, "Country");
    engine.add_to(FieldRole::Value, "Sales");
    engine
}

/// Row key strings of the published view, in display order.
pub fn row_keys(engine: &PivotEngine) -> Vec<String> {
    engine
        .output()
        .rows()
        .map(|r| r.key.as_str().to_string())
        .collect()
}

/// One column of the published view, in display order.
pub fn column(engine: &PivotEngine, binding: &str) -> Vec<Option<f64>> {
    (0..engine.output().len())
        .map(|i| engine.output().get(i, binding))
        .collect()
}

/// Cell by row key string and column binding.
pub fn cell(engine: &PivotEngine, row_key: &str, binding: &str) -> Option<f64> {
    let table = engine.table();
    let row = table.find_row(row_key)?;
    table.get(row, binding)
}

/// Records every event the engine raises.
pub fn record_events(engine: &mut PivotEngine) -> Rc<RefCell<Vec<PivotEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    engine.subscribe(move |e| sink.borrow_mut().push(*e));
    events
}
