//! FILENAME: olap-engine/src/engine.rs
//! Pivot Engine - turns field configuration and records into an output table.
//!
//! Algorithm (one rebuild):
//! 1. Snapshot the role lists into row/column axes and value fields, and
//!    collect the fields that carry an active filter
//! 2. Scan the records: every record that passes the filters is walked down
//!    the key tree at each emitted row depth, then down that row's column
//!    sub-tree at each emitted column depth, once per value field, feeding
//!    the value into the tally of that (row key, column key) cell
//! 3. Flatten: sort the distinct row and column keys and read one aggregate
//!    per cell
//! 4. Apply show-as calculations and publish the table
//!
//! Scheduled rebuilds can scan in slices, yielding between batches once the
//! time budget is spent and resuming from a continuation task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, trace, warn};
use rustc_hash::FxHashSet;

use crate::definition::{
    AggregateKind, FieldRole, FilterDefinition, FilterType, PivotField, RoleDefinition,
    ShowTotals, ViewDefinition,
};
use crate::error::{PivotError, Result};
use crate::events::{ListenerId, Listeners, PivotEvent};
use crate::filter::FieldFilter;
use crate::format::format_value;
use crate::key::{AxisFields, GroupKey};
use crate::node::KeyTree;
use crate::scheduler::{Clock, ScanBudget, SystemClock, CONTINUATION_DELAY, DEBOUNCE_DELAY};
use crate::show_as;
use crate::sorted::SortedOutputView;
use crate::tally::TallyMap;
use crate::value::{DataType, Record};
use crate::view::{OutputRow, OutputTable};

// ============================================================================
// STATE
// ============================================================================

/// Where the engine is in its rebuild cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// Inside a `begin_update`/`end_update` block.
    Suspended,
    /// A debounced rebuild is waiting to start.
    Scheduled,
    /// A chunked scan has yielded and will resume.
    Scanning { progress: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Refresh,
    Resume,
}

#[derive(Debug, Clone, Copy)]
struct PendingTask {
    due: Duration,
    kind: TaskKind,
}

/// Distinct keys in first-seen order.
#[derive(Default)]
struct KeyRegistry {
    keys: Vec<Arc<GroupKey>>,
    seen: FxHashSet<Arc<str>>,
}

impl KeyRegistry {
    fn register(&mut self, key: &Arc<GroupKey>) {
        if !self.seen.contains(key.as_str()) {
            self.seen.insert(Arc::clone(key.key_string()));
            self.keys.push(Arc::clone(key));
        }
    }

    /// Registered keys at one of `depths`, in output order.
    fn sorted(&self, depths: &[usize]) -> Vec<Arc<GroupKey>> {
        let mut keys: Vec<Arc<GroupKey>> = self
            .keys
            .iter()
            .filter(|k| depths.contains(&k.field_count()))
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.compare_to(b));
        keys
    }
}

/// Everything one rebuild works on. Dropped on cancellation.
struct BuildState {
    col_axis: Arc<AxisFields>,
    value_fields: Arc<Vec<PivotField>>,
    /// Binding of each value field's weight field.
    weights: Vec<Option<String>>,
    filters: Vec<PivotField>,
    default_filter_type: FilterType,
    /// Depths emitted in the output.
    row_depths: Vec<usize>,
    col_depths: Vec<usize>,
    /// Depths aggregated; adds depth 0 when percent-of-total kinds need it.
    scan_row_depths: Vec<usize>,
    scan_col_depths: Vec<usize>,
    defined: bool,
    show_zeros: bool,
    tree: KeyTree,
    tallies: TallyMap,
    row_keys: KeyRegistry,
    col_keys: KeyRegistry,
    position: usize,
}

impl BuildState {
    fn add_record(&mut self, item: &Record) -> Result<()> {
        if !passes_filters(&self.filters, self.default_filter_type, item)? {
            return Ok(());
        }

        let root = self.tree.root();
        for &r in &self.scan_row_depths {
            let row_node = self.tree.get_node(root, r, None, item);
            let row_key = Arc::clone(self.tree.key(row_node));
            self.row_keys.register(&row_key);

            let col_root = self.tree.subtree(row_node, &self.col_axis);
            let cells = self
                .tallies
                .entry(Arc::clone(row_key.key_string()))
                .or_default();

            for &c in &self.scan_col_depths {
                for (vf, field) in self.value_fields.iter().enumerate() {
                    let col_node = self.tree.get_node(col_root, c, Some((&self.value_fields, vf)), item);
                    let col_key = self.tree.key(col_node);
                    self.col_keys.register(col_key);

                    let weight = self.weights[vf].as_deref().map(|b| item.get(b));
                    cells
                        .entry(Arc::clone(col_key.key_string()))
                        .or_default()
                        .add(item.get(&field.binding), weight);
                }
            }
        }
        Ok(())
    }

    fn progress(&self, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        (self.position * 100 / total).min(100) as u8
    }

    fn flatten(self) -> OutputTable {
        let rows = self.row_keys.sorted(&self.row_depths);
        let columns = self.col_keys.sorted(&self.col_depths);

        let output_rows = rows
            .into_iter()
            .map(|row_key| {
                let cells = self.tallies.get(row_key.as_str());
                let values = columns
                    .iter()
                    .map(|col_key| {
                        cells
                            .and_then(|c| c.get(col_key.as_str()))
                            .and_then(|t| t.aggregate(col_key.aggregate()))
                    })
                    .collect();
                OutputRow {
                    key: row_key,
                    values,
                }
            })
            .collect();

        let mut table = OutputTable::new(columns, output_rows);
        show_as::apply(&mut table, &self.tallies);

        // hidden zeros still feed show-as; only displayed cells are cleared
        if !self.show_zeros {
            for row in table.rows_mut() {
                for value in row.values.iter_mut() {
                    if *value == Some(0.0) {
                        *value = None;
                    }
                }
            }
        }
        table
    }
}

fn passes_filters(filters: &[PivotField], default: FilterType, item: &Record) -> Result<bool> {
    for field in filters {
        let value = item.get(&field.binding);
        let formatted = format_value(value, &field.format);
        let keep = field
            .filter
            .apply(value, &formatted, field.effective_filter_type(default))
            .map_err(|message| PivotError::Filter {
                field: field.header.clone(),
                message,
            })?;
        if !keep {
            return Ok(false);
        }
    }
    Ok(true)
}

// ============================================================================
// PIVOT ENGINE
// ============================================================================

pub struct PivotEngine {
    fields: Vec<PivotField>,
    row_fields: Vec<String>,
    column_fields: Vec<String>,
    value_fields: Vec<String>,
    filter_fields: Vec<String>,
    items: Vec<Record>,

    show_row_totals: ShowTotals,
    show_column_totals: ShowTotals,
    totals_before_data: bool,
    show_zeros: bool,
    default_filter_type: FilterType,
    auto_generate_fields: bool,
    async_update: bool,
    scan_budget: ScanBudget,

    update_level: u32,
    /// A rebuild was requested while suspended.
    dirty: bool,
    clock: Box<dyn Clock>,
    pending: Option<PendingTask>,
    build: Option<BuildState>,

    output: SortedOutputView,
    listeners: Listeners,
}

impl Default for PivotEngine {
    fn default() -> Self {
        PivotEngine::new()
    }
}

impl fmt::Debug for PivotEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PivotEngine")
            .field("fields", &self.fields.len())
            .field("row_fields", &self.row_fields)
            .field("column_fields", &self.column_fields)
            .field("value_fields", &self.value_fields)
            .field("filter_fields", &self.filter_fields)
            .field("items", &self.items.len())
            .field("state", &self.state())
            .finish()
    }
}

impl PivotEngine {
    pub fn new() -> Self {
        PivotEngine::with_clock(SystemClock::new())
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        PivotEngine {
            fields: Vec::new(),
            row_fields: Vec::new(),
            column_fields: Vec::new(),
            value_fields: Vec::new(),
            filter_fields: Vec::new(),
            items: Vec::new(),
            show_row_totals: ShowTotals::GrandTotals,
            show_column_totals: ShowTotals::GrandTotals,
            totals_before_data: false,
            show_zeros: true,
            default_filter_type: FilterType::Both,
            auto_generate_fields: false,
            async_update: true,
            scan_budget: ScanBudget::default(),
            update_level: 0,
            dirty: false,
            clock: Box::new(clock),
            pending: None,
            build: None,
            output: SortedOutputView::default(),
            listeners: Listeners::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Master field list
    // ------------------------------------------------------------------------

    pub fn fields(&self) -> &[PivotField] {
        &self.fields
    }

    pub fn field(&self, header: &str) -> Option<&PivotField> {
        self.fields.iter().find(|f| f.header == header)
    }

    fn field_mut(&mut self, header: &str) -> Option<&mut PivotField> {
        self.fields.iter_mut().find(|f| f.header == header)
    }

    pub fn add_field(&mut self, field: PivotField) -> Result<()> {
        if self.field(&field.header).is_some() {
            return Err(PivotError::DuplicateField(field.header));
        }
        self.fields.push(field);
        self.listeners.emit(PivotEvent::ViewDefinitionChanged);
        Ok(())
    }

    /// Edits a field in place. Headers are identities and cannot change here.
    pub fn update_field(&mut self, header: &str, edit: impl FnOnce(&mut PivotField)) -> Result<()> {
        let field = self
            .field_mut(header)
            .ok_or_else(|| PivotError::FieldNotFound(header.to_string()))?;
        edit(field);
        if field.header != header {
            warn!("field '{}' cannot be renamed to '{}'", header, field.header);
            field.header = header.to_string();
        }
        self.view_changed();
        Ok(())
    }

    pub fn set_field_filter(&mut self, header: &str, filter: FieldFilter) -> Result<()> {
        self.update_field(header, |f| f.filter = filter)
    }

    /// Removes a field from the master list and from every role list.
    pub fn remove_field(&mut self, header: &str) -> Result<PivotField> {
        let index = self
            .fields
            .iter()
            .position(|f| f.header == header)
            .ok_or_else(|| PivotError::FieldNotFound(header.to_string()))?;
        let field = self.fields.remove(index);
        for role in [FieldRole::Row, FieldRole::Column, FieldRole::Value, FieldRole::Filter] {
            self.role_list_mut(role).retain(|h| h != header);
        }
        self.view_changed();
        Ok(field)
    }

    // ------------------------------------------------------------------------
    // Role lists
    // ------------------------------------------------------------------------

    pub fn role_fields(&self, role: FieldRole) -> &[String] {
        match role {
            FieldRole::Row => &self.row_fields,
            FieldRole::Column => &self.column_fields,
            FieldRole::Value => &self.value_fields,
            FieldRole::Filter => &self.filter_fields,
        }
    }

    fn role_list_mut(&mut self, role: FieldRole) -> &mut Vec<String> {
        match role {
            FieldRole::Row => &mut self.row_fields,
            FieldRole::Column => &mut self.column_fields,
            FieldRole::Value => &mut self.value_fields,
            FieldRole::Filter => &mut self.filter_fields,
        }
    }

    pub fn add_to(&mut self, role: FieldRole, header: &str) -> bool {
        self.insert_into(role, usize::MAX, header)
    }

    /// Inserts a field into a role list. Returns false (and changes nothing)
    /// when the field is unknown or already in that list.
    pub fn insert_into(&mut self, role: FieldRole, index: usize, header: &str) -> bool {
        let placed = self.place(role, index, header);
        if placed {
            self.view_changed();
        }
        placed
    }

    fn place(&mut self, role: FieldRole, index: usize, header: &str) -> bool {
        if self.field(header).is_none() {
            warn!("cannot add '{}' to {:?} fields: not on the field list", header, role);
            return false;
        }
        if self.role_fields(role).iter().any(|h| h == header) {
            warn!("'{}' is already in the {:?} fields", header, role);
            return false;
        }
        if role != FieldRole::Value {
            for other in [FieldRole::Row, FieldRole::Column, FieldRole::Filter] {
                if other != role {
                    self.role_list_mut(other).retain(|h| h != header);
                }
            }
        }
        let list = self.role_list_mut(role);
        let index = index.min(list.len());
        list.insert(index, header.to_string());
        true
    }

    pub fn remove_from(&mut self, role: FieldRole, header: &str) -> bool {
        let list = self.role_list_mut(role);
        let before = list.len();
        list.retain(|h| h != header);
        let removed = list.len() != before;
        if removed {
            self.view_changed();
        }
        removed
    }

    pub fn clear_role(&mut self, role: FieldRole) {
        if !self.role_fields(role).is_empty() {
            self.role_list_mut(role).clear();
            self.view_changed();
        }
    }

    /// Adds a copy of a value field under a fresh header (`Sales2`, ...)
    /// and appends it to the value list. Returns the new header.
    pub fn duplicate_value_field(&mut self, header: &str) -> Option<String> {
        let mut copy = match self.field(header) {
            Some(f) => f.clone(),
            None => {
                warn!("cannot duplicate '{}': not on the field list", header);
                return None;
            }
        };
        let base = copy.parent_field.clone().unwrap_or_else(|| copy.header.clone());
        let new_header = (2..)
            .map(|n| format!("{}{}", base, n))
            .find(|h| self.field(h).is_none())?;

        copy.header = new_header.clone();
        copy.parent_field = Some(base);
        self.fields.push(copy);
        self.place(FieldRole::Value, usize::MAX, &new_header);
        self.view_changed();
        Some(new_header)
    }

    /// A view needs value fields and at least one row or column field.
    pub fn is_view_defined(&self) -> bool {
        !self.value_fields.is_empty() && (!self.row_fields.is_empty() || !self.column_fields.is_empty())
    }

    // ------------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------------

    pub fn show_row_totals(&self) -> ShowTotals {
        self.show_row_totals
    }

    pub fn set_show_row_totals(&mut self, value: ShowTotals) {
        if self.show_row_totals != value {
            self.show_row_totals = value;
            self.view_changed();
        }
    }

    pub fn show_column_totals(&self) -> ShowTotals {
        self.show_column_totals
    }

    pub fn set_show_column_totals(&mut self, value: ShowTotals) {
        if self.show_column_totals != value {
            self.show_column_totals = value;
            self.view_changed();
        }
    }

    pub fn totals_before_data(&self) -> bool {
        self.totals_before_data
    }

    pub fn set_totals_before_data(&mut self, value: bool) {
        if self.totals_before_data != value {
            self.totals_before_data = value;
            self.view_changed();
        }
    }

    pub fn show_zeros(&self) -> bool {
        self.show_zeros
    }

    pub fn set_show_zeros(&mut self, value: bool) {
        if self.show_zeros != value {
            self.show_zeros = value;
            self.view_changed();
        }
    }

    pub fn default_filter_type(&self) -> FilterType {
        self.default_filter_type
    }

    pub fn set_default_filter_type(&mut self, value: FilterType) {
        if self.default_filter_type != value {
            self.default_filter_type = value;
            self.view_changed();
        }
    }

    pub fn auto_generate_fields(&self) -> bool {
        self.auto_generate_fields
    }

    /// Generate the field list from the records on the next `set_items_source`.
    pub fn set_auto_generate_fields(&mut self, value: bool) {
        self.auto_generate_fields = value;
    }

    pub fn async_update(&self) -> bool {
        self.async_update
    }

    /// Whether scheduled rebuilds scan in time-bounded slices.
    pub fn set_async_update(&mut self, value: bool) {
        self.async_update = value;
    }

    pub fn scan_budget(&self) -> ScanBudget {
        self.scan_budget
    }

    pub fn set_scan_budget(&mut self, budget: ScanBudget) {
        self.scan_budget = budget;
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    pub fn items(&self) -> &[Record] {
        &self.items
    }

    pub fn set_items_source(&mut self, items: Vec<Record>) {
        self.items = items;
        if self.auto_generate_fields {
            self.generate_fields();
        }
        self.listeners.emit(PivotEvent::ItemsSourceChanged);
        self.invalidate();
    }

    pub fn add_item(&mut self, item: Record) {
        self.items.push(item);
        self.invalidate();
    }

    pub fn insert_item(&mut self, index: usize, item: Record) {
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        self.invalidate();
    }

    pub fn remove_item(&mut self, index: usize) -> Option<Record> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);
        self.invalidate();
        Some(item)
    }

    pub fn replace_item(&mut self, index: usize, item: Record) -> Option<Record> {
        let slot = self.items.get_mut(index)?;
        let old = std::mem::replace(slot, item);
        self.invalidate();
        Some(old)
    }

    /// Rebuilds the master field list from the record names. Numbers sum
    /// with `n0`, dates count with `d`, anything else counts.
    fn generate_fields(&mut self) {
        let names: Vec<String> = match self.items.first() {
            Some(first) => first.names().map(str::to_string).collect(),
            None => Vec::new(),
        };

        let fields = names
            .into_iter()
            .map(|name| {
                let data_type = self
                    .items
                    .iter()
                    .map(|item| item.get(&name))
                    .find(|v| !v.is_null())
                    .and_then(|v| v.data_type());

                let mut field = PivotField::new(name.clone(), name);
                field.data_type = data_type;
                match data_type {
                    Some(DataType::Number) => {
                        field.aggregate = AggregateKind::Sum;
                        field.format = "n0".to_string();
                    }
                    Some(DataType::Date) => {
                        field.aggregate = AggregateKind::Count;
                        field.format = "d".to_string();
                    }
                    _ => field.aggregate = AggregateKind::Count,
                }
                field
            })
            .collect::<Vec<_>>();

        debug!("generated {} fields from items", fields.len());
        self.fields = fields;
        for role in [FieldRole::Row, FieldRole::Column, FieldRole::Value, FieldRole::Filter] {
            self.role_list_mut(role).clear();
        }
    }

    // ------------------------------------------------------------------------
    // Update control
    // ------------------------------------------------------------------------

    pub fn begin_update(&mut self) {
        if self.update_level == 0 && (self.pending.is_some() || self.build.is_some()) {
            self.cancel();
            self.dirty = true;
        }
        self.update_level += 1;
    }

    /// Leaves an update block; the outermost call rebuilds if anything changed.
    pub fn end_update(&mut self) -> Result<()> {
        if self.update_level == 0 {
            warn!("end_update called without a matching begin_update");
            return Ok(());
        }
        self.update_level -= 1;
        if self.update_level == 0 && self.dirty {
            self.refresh(false)?;
        }
        Ok(())
    }

    pub fn is_updating(&self) -> bool {
        self.update_level > 0
    }

    /// Schedules a debounced rebuild, replacing any pending or running one.
    pub fn invalidate(&mut self) {
        if self.update_level > 0 {
            self.dirty = true;
            return;
        }
        self.cancel();
        self.pending = Some(PendingTask {
            due: self.clock.now() + DEBOUNCE_DELAY,
            kind: TaskKind::Refresh,
        });
    }

    /// Rebuilds synchronously. Inside an update block this only marks the
    /// engine dirty, unless `force` is set.
    pub fn refresh(&mut self, force: bool) -> Result<()> {
        if self.update_level > 0 && !force {
            self.dirty = true;
            return Ok(());
        }
        self.cancel();

        let mut build = self.start_build();
        if let Err(e) = self.scan(&mut build, None) {
            error!("rebuild failed: {}", e);
            return Err(e);
        }
        self.publish(build);
        Ok(())
    }

    /// Runs the pending task if it is due. Returns whether anything ran.
    pub fn run_pending(&mut self) -> Result<bool> {
        let task = match self.pending {
            Some(task) if task.due <= self.clock.now() => task,
            _ => return Ok(false),
        };
        self.pending = None;

        let mut build = match task.kind {
            TaskKind::Refresh => self.start_build(),
            TaskKind::Resume => match self.build.take() {
                Some(build) => build,
                None => return Ok(false),
            },
        };

        let budget = if self.async_update {
            Some(self.scan_budget)
        } else {
            None
        };

        match self.scan(&mut build, budget) {
            Ok(true) => self.publish(build),
            Ok(false) => {
                let progress = build.progress(self.items.len());
                trace!("scan yielded at {} of {} records", build.position, self.items.len());
                self.build = Some(build);
                self.pending = Some(PendingTask {
                    due: self.clock.now() + CONTINUATION_DELAY,
                    kind: TaskKind::Resume,
                });
                self.listeners.emit(PivotEvent::Updating { progress });
            }
            Err(e) => {
                error!("rebuild failed: {}", e);
                return Err(e);
            }
        }
        Ok(true)
    }

    /// When the pending task becomes due, if there is one.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.map(|t| t.due)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn state(&self) -> EngineState {
        if self.update_level > 0 {
            EngineState::Suspended
        } else if let Some(build) = &self.build {
            EngineState::Scanning {
                progress: build.progress(self.items.len()),
            }
        } else if self.pending.is_some() {
            EngineState::Scheduled
        } else {
            EngineState::Idle
        }
    }

    fn cancel(&mut self) {
        if let Some(build) = self.build.take() {
            debug!("canceled rebuild at {} of {} records", build.position, self.items.len());
        }
        self.pending = None;
    }

    fn view_changed(&mut self) {
        self.listeners.emit(PivotEvent::ViewDefinitionChanged);
        self.invalidate();
    }

    // ------------------------------------------------------------------------
    // Rebuild
    // ------------------------------------------------------------------------

    fn resolve(&self, headers: &[String]) -> Vec<PivotField> {
        headers
            .iter()
            .filter_map(|h| self.field(h).cloned())
            .collect()
    }

    fn active_filters(&self) -> Vec<PivotField> {
        let mut seen = FxHashSet::default();
        self.row_fields
            .iter()
            .chain(&self.column_fields)
            .chain(&self.value_fields)
            .chain(&self.filter_fields)
            .filter(|h| seen.insert(h.as_str()))
            .filter_map(|h| self.field(h))
            .filter(|f| f.has_active_filter(self.default_filter_type))
            .cloned()
            .collect()
    }

    fn start_build(&self) -> BuildState {
        let row_axis = AxisFields::new(self.resolve(&self.row_fields), self.totals_before_data);
        let col_axis = AxisFields::new(self.resolve(&self.column_fields), self.totals_before_data);
        let value_fields = Arc::new(self.resolve(&self.value_fields));

        let weights = value_fields
            .iter()
            .map(|vf| {
                let header = vf.weight_field.as_deref()?;
                match self.field(header) {
                    Some(w) => Some(w.binding.clone()),
                    None => {
                        warn!("weight field '{}' of '{}' not found; ignoring", header, vf.header);
                        None
                    }
                }
            })
            .collect();

        let row_depths = self.show_row_totals.depths(row_axis.len());
        let col_depths = self.show_column_totals.depths(col_axis.len());
        let mut scan_row_depths = row_depths.clone();
        let mut scan_col_depths = col_depths.clone();
        if value_fields.iter().any(|f| f.show_as.needs_totals()) {
            for depths in [&mut scan_row_depths, &mut scan_col_depths] {
                if !depths.contains(&0) {
                    depths.insert(0, 0);
                }
            }
        }

        debug!(
            "rebuild started: {} records, {} row fields, {} column fields, {} value fields",
            self.items.len(),
            row_axis.len(),
            col_axis.len(),
            value_fields.len()
        );

        BuildState {
            tree: KeyTree::new(&row_axis),
            col_axis,
            value_fields,
            weights,
            filters: self.active_filters(),
            default_filter_type: self.default_filter_type,
            row_depths,
            col_depths,
            scan_row_depths,
            scan_col_depths,
            defined: self.is_view_defined(),
            show_zeros: self.show_zeros,
            tallies: TallyMap::default(),
            row_keys: KeyRegistry::default(),
            col_keys: KeyRegistry::default(),
            position: 0,
        }
    }

    /// Scans from the build's position. Returns true when every record has
    /// been seen, false when the slice budget ran out first.
    fn scan(&self, build: &mut BuildState, budget: Option<ScanBudget>) -> Result<bool> {
        let total = self.items.len();
        if !build.defined {
            build.position = total;
            return Ok(true);
        }

        let started = self.clock.now();
        while build.position < total {
            let end = match budget {
                Some(b) => (build.position + b.batch_size.max(1)).min(total),
                None => total,
            };
            for item in &self.items[build.position..end] {
                build.add_record(item)?;
            }
            build.position = end;

            if let Some(b) = budget {
                let elapsed = self.clock.now().saturating_sub(started);
                if build.position < total && elapsed >= b.time_budget {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn publish(&mut self, build: BuildState) {
        let table = build.flatten();
        debug!(
            "rebuild finished: {} rows, {} columns",
            table.len(),
            table.columns().len()
        );
        self.output.set_source(Arc::new(table));
        self.dirty = false;
        self.listeners.emit(PivotEvent::Updating { progress: 100 });
        self.listeners.emit(PivotEvent::Updated);
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    pub fn output(&self) -> &SortedOutputView {
        &self.output
    }

    /// Mutable access for sorting the published rows.
    pub fn output_mut(&mut self) -> &mut SortedOutputView {
        &mut self.output
    }

    pub fn table(&self) -> &Arc<OutputTable> {
        self.output.source()
    }

    /// Records behind a cell: those passing the active filters that match
    /// `row_key` (when given) and the column bound to `column_binding`.
    /// An unknown binding does not restrict the result.
    pub fn get_detail(&self, row_key: Option<&GroupKey>, column_binding: &str) -> Result<Vec<&Record>> {
        let col_key = self.table().column_key(column_binding);
        let filters = self.active_filters();

        let mut detail = Vec::new();
        for item in &self.items {
            if !passes_filters(&filters, self.default_filter_type, item)? {
                continue;
            }
            if row_key.is_some_and(|k| !k.matches_item(item)) {
                continue;
            }
            if col_key.is_some_and(|k| !k.matches_item(item)) {
                continue;
            }
            detail.push(item);
        }
        Ok(detail)
    }

    /// [`get_detail`](Self::get_detail) for the row at `row` in the sorted view.
    pub fn get_detail_for_row(&self, row: usize, column_binding: &str) -> Result<Vec<&Record>> {
        match self.output.row(row) {
            Some(r) => self.get_detail(Some(r.key.as_ref()), column_binding),
            None => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------------
    // View definition
    // ------------------------------------------------------------------------

    pub fn definition(&self) -> ViewDefinition {
        ViewDefinition {
            show_zeros: self.show_zeros,
            show_row_totals: self.show_row_totals,
            show_column_totals: self.show_column_totals,
            totals_before_data: self.totals_before_data,
            default_filter_type: self.default_filter_type,
            fields: self
                .fields
                .iter()
                .cloned()
                .map(|mut f| {
                    // filters travel with the role lists
                    f.filter = FieldFilter::default();
                    f
                })
                .collect(),
            row_fields: self.role_definition(&self.row_fields),
            column_fields: self.role_definition(&self.column_fields),
            value_fields: self.role_definition(&self.value_fields),
            filter_fields: self.role_definition(&self.filter_fields),
        }
    }

    fn role_definition(&self, headers: &[String]) -> RoleDefinition {
        let filters = headers
            .iter()
            .filter_map(|h| self.field(h))
            .filter(|f| f.filter.value_filter.is_some() || f.filter.condition_filter.is_some())
            .map(|f| FilterDefinition {
                header: f.header.clone(),
                filter: FieldFilter {
                    predicate: None,
                    ..f.filter.clone()
                },
            })
            .collect();
        RoleDefinition {
            items: headers.to_vec(),
            filters,
        }
    }

    /// Replaces the whole configuration and rebuilds.
    pub fn apply_definition(&mut self, definition: ViewDefinition) -> Result<()> {
        let ViewDefinition {
            show_zeros,
            show_row_totals,
            show_column_totals,
            totals_before_data,
            default_filter_type,
            fields,
            row_fields,
            column_fields,
            value_fields,
            filter_fields,
        } = definition;

        {
            let mut seen = FxHashSet::default();
            if let Some(dup) = fields.iter().find(|f| !seen.insert(f.header.as_str())) {
                return Err(PivotError::DuplicateField(dup.header.clone()));
            }
        }

        self.begin_update();
        self.show_zeros = show_zeros;
        self.show_row_totals = show_row_totals;
        self.show_column_totals = show_column_totals;
        self.totals_before_data = totals_before_data;
        self.default_filter_type = default_filter_type;
        self.fields = fields;
        for role in [FieldRole::Row, FieldRole::Column, FieldRole::Value, FieldRole::Filter] {
            self.role_list_mut(role).clear();
        }

        for (role, def) in [
            (FieldRole::Row, row_fields),
            (FieldRole::Column, column_fields),
            (FieldRole::Value, value_fields),
            (FieldRole::Filter, filter_fields),
        ] {
            for header in &def.items {
                self.place(role, usize::MAX, header);
            }
            for fd in def.filters {
                match self.field_mut(&fd.header) {
                    Some(field) => field.filter = fd.filter,
                    None => warn!("filter for unknown field '{}' ignored", fd.header),
                }
            }
        }

        self.dirty = true;
        self.listeners.emit(PivotEvent::ViewDefinitionChanged);
        self.end_update()
    }

    /// The view definition as JSON.
    pub fn view_definition(&self) -> Result<String> {
        self.definition().to_json()
    }

    pub fn set_view_definition(&mut self, json: &str) -> Result<()> {
        let definition = ViewDefinition::from_json(json)?;
        self.apply_definition(definition)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    pub fn subscribe(&mut self, listener: impl FnMut(&PivotEvent) + 'static) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}
