//! FILENAME: olap-engine/src/lib.rs
//! OLAP pivot aggregation core.
//!
//! Groups flat records by ordered row and column fields, aggregates value
//! fields per group with grand totals and nested subtotals, and publishes a
//! sorted output table. Rebuilds are single threaded and cooperatively
//! scheduled: the host drives them through `run_pending`.
//!
//! Layers:
//! - `value`, `format`: raw records and their display form
//! - `definition`, `filter`: serializable configuration (what the pivot IS)
//! - `tally`, `key`, `node`: aggregation structures (HOW we compute)
//! - `view`, `sorted`, `show_as`: the flattened output (WHAT we display)
//! - `engine`, `scheduler`, `events`: the rebuild driver

pub mod definition;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod format;
pub mod key;
pub mod node;
pub mod scheduler;
mod show_as;
pub mod sorted;
pub mod tally;
pub mod value;
pub mod view;

pub use definition::*;
pub use engine::{EngineState, PivotEngine};
pub use error::{PivotError, Result};
pub use events::{ListenerId, PivotEvent};
pub use filter::{Condition, ConditionFilter, FieldFilter, Operator, Predicate, ValueFilter};
pub use key::{AxisFields, GroupKey};
pub use scheduler::{run_until_idle, Clock, ManualClock, ScanBudget, SystemClock};
pub use sorted::{SortDescription, SortedOutputView};
pub use tally::Tally;
pub use value::{DataType, Record, Value};
pub use view::{OutputRow, OutputTable, ROW_KEY_FIELD};
