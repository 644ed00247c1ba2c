//! FILENAME: olap-engine/src/key.rs
//! Group Key - one combination of field values along a row or column axis.
//!
//! A key holds the first `field_count` values of its axis: zero values is
//! the grand total, all of them is a detail group, anything in between is a
//! subtotal. Column keys also carry the value field their cells aggregate.
//! Keys are immutable once built and are identified by their string form.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::NaiveDateTime;
use smallvec::SmallVec;

use crate::definition::{AggregateKind, PivotField};
use crate::format::{format_date, format_value, is_trivial_date_format, parse_date};
use crate::value::{compare_values, Record, Value};

pub const GRAND_TOTAL_LABEL: &str = "Grand Total";
pub const SUBTOTAL_LABEL: &str = "Total";
/// Key-string token for a null field value, distinct from empty text.
pub const NULL_KEY: &str = "null";

// ============================================================================
// AXIS
// ============================================================================

/// Snapshot of the fields along one axis, shared by every key on that axis.
#[derive(Debug)]
pub struct AxisFields {
    fields: Vec<PivotField>,
    totals_before_data: bool,
}

impl AxisFields {
    pub fn new(fields: Vec<PivotField>, totals_before_data: bool) -> Arc<Self> {
        Arc::new(AxisFields {
            fields,
            totals_before_data,
        })
    }

    pub fn fields(&self) -> &[PivotField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn totals_before_data(&self) -> bool {
        self.totals_before_data
    }
}

/// Reference to one entry of a shared value-field list.
#[derive(Debug, Clone)]
struct ValueFieldRef {
    fields: Arc<Vec<PivotField>>,
    index: usize,
}

// ============================================================================
// GROUP KEY
// ============================================================================

pub struct GroupKey {
    axis: Arc<AxisFields>,
    values: SmallVec<[Value; 4]>,
    value_field: Option<ValueFieldRef>,
    key: Arc<str>,
}

impl GroupKey {
    /// The grand-total key of an axis.
    pub fn grand_total(axis: &Arc<AxisFields>) -> Self {
        GroupKey {
            axis: Arc::clone(axis),
            values: SmallVec::new(),
            value_field: None,
            key: Arc::from(""),
        }
    }

    /// The key one level deeper, extended with the next field's value.
    pub fn child(&self, value: Value) -> Self {
        debug_assert!(self.value_field.is_none(), "value-field keys are terminal");
        debug_assert!(self.values.len() < self.axis.len());

        let field = &self.axis.fields[self.values.len()];
        let key = if value.is_null() {
            format!("{}{}:{};", self.key, field.header, NULL_KEY)
        } else {
            format!("{}{}:{};", self.key, field.header, value)
        };

        let mut values = self.values.clone();
        values.push(value);
        GroupKey {
            axis: Arc::clone(&self.axis),
            values,
            value_field: None,
            key: Arc::from(key),
        }
    }

    /// This key, attached to the value field at `index`.
    pub fn with_value_field(&self, value_fields: &Arc<Vec<PivotField>>, index: usize) -> Self {
        let header = value_fields
            .get(index)
            .map(|f| f.header.as_str())
            .unwrap_or_default();
        GroupKey {
            axis: Arc::clone(&self.axis),
            values: self.values.clone(),
            value_field: Some(ValueFieldRef {
                fields: Arc::clone(value_fields),
                index,
            }),
            key: Arc::from(format!("{}{}:", self.key, header)),
        }
    }

    /// The string identity of this key.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn key_string(&self) -> &Arc<str> {
        &self.key
    }

    pub fn axis(&self) -> &Arc<AxisFields> {
        &self.axis
    }

    pub fn fields(&self) -> &[PivotField] {
        self.axis.fields()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn field_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_grand_total(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_subtotal(&self) -> bool {
        !self.values.is_empty() && self.values.len() < self.axis.len()
    }

    /// Grand total or subtotal.
    pub fn is_total(&self) -> bool {
        self.values.len() < self.axis.len()
    }

    pub fn value_field_index(&self) -> Option<usize> {
        self.value_field.as_ref().map(|r| r.index)
    }

    pub fn value_field(&self) -> Option<&PivotField> {
        self.value_field.as_ref().and_then(|r| r.fields.get(r.index))
    }

    /// The aggregate used by cells under this key.
    pub fn aggregate(&self) -> AggregateKind {
        self.value_field().map(|f| f.aggregate).unwrap_or_default()
    }

    /// Raw value at `index`, or `None` past the key length.
    pub fn raw_value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Formatted value at `index`, with placeholder labels for totals.
    pub fn display_value(&self, index: usize) -> String {
        if self.values.is_empty() {
            return GRAND_TOTAL_LABEL.to_string();
        }
        match self.values.get(index) {
            Some(v) => format_value(v, &self.axis.fields[index].format),
            None => SUBTOTAL_LABEL.to_string(),
        }
    }

    /// Ordering used to sort keys and place totals.
    ///
    /// Keys from different axes are incomparable and compare equal.
    pub fn compare_to(&self, other: &GroupKey) -> Ordering {
        if !Arc::ptr_eq(&self.axis, &other.axis) {
            return Ordering::Equal;
        }

        let shared = self.values.len().min(other.values.len());
        for i in 0..shared {
            let field = &self.axis.fields[i];
            let (a, b) = (&self.values[i], &other.values[i]);

            let cmp = match date_comparison(field, a, b) {
                Some((da, db)) => da.cmp(&db),
                None => match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    // nulls go last whatever the direction
                    (true, false) => return Ordering::Greater,
                    (false, true) => return Ordering::Less,
                    (false, false) => compare_values(a, b),
                },
            };

            if cmp != Ordering::Equal {
                return if field.descending { cmp.reverse() } else { cmp };
            }
        }

        if self.values.len() == other.values.len() {
            return match (self.value_field_index(), other.value_field_index()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            };
        }

        let cmp = other.values.len().cmp(&self.values.len());
        if self.axis.totals_before_data {
            cmp.reverse()
        } else {
            cmp
        }
    }

    /// Whether `item` renders the same as this key in every key field.
    pub fn matches_item(&self, item: &Record) -> bool {
        self.values.iter().enumerate().all(|(i, v)| {
            let field = &self.axis.fields[i];
            let other = item.get(&field.binding);
            v.is_null() == other.is_null()
                && format_value(v, &field.format) == format_value(other, &field.format)
        })
    }

    /// Whether both keys sit at the same depth under the same parent group.
    pub fn same_parent(&self, other: &GroupKey) -> bool {
        if !Arc::ptr_eq(&self.axis, &other.axis)
            || self.values.len() != other.values.len()
            || self.value_field_index() != other.value_field_index()
        {
            return false;
        }
        let depth = self.values.len();
        if depth == 0 {
            return false;
        }
        self.values[..depth - 1]
            .iter()
            .zip(&other.values[..depth - 1])
            .all(|(a, b)| a.is_null() == b.is_null() && compare_values(a, b) == Ordering::Equal)
    }
}

/// Re-derives date comparison values through the field's display format, so
/// dates that render identically compare equal. `None` when not applicable
/// or when either formatted value does not parse back.
fn date_comparison(
    field: &PivotField,
    a: &Value,
    b: &Value,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let (da, db) = (a.as_date()?, b.as_date()?);
    if is_trivial_date_format(&field.format) {
        return None;
    }
    let pa = parse_date(&format_date(&da, &field.format), &field.format)?;
    let pb = parse_date(&format_date(&db, &field.format), &field.format)?;
    Some((pa, pb))
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupKey")
            .field("key", &self.key)
            .field("values", &self.values)
            .field("value_field", &self.value_field_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn axis(descending: bool, totals_before_data: bool) -> Arc<AxisFields> {
        let mut country = PivotField::new("Country", "C");
        country.descending = descending;
        let city = PivotField::new("City", "T");
        AxisFields::new(vec![country, city], totals_before_data)
    }

    fn key(axis: &Arc<AxisFields>, values: &[&str]) -> GroupKey {
        values
            .iter()
            .fold(GroupKey::grand_total(axis), |k, v| k.child(Value::from(*v)))
    }

    #[test]
    fn test_key_strings() {
        let a = axis(false, false);
        let k = key(&a, &["US", "NYC"]);
        assert_eq!(k.as_str(), "Country:US;City:NYC;");
        assert_eq!(GroupKey::grand_total(&a).as_str(), "");

        let vf = Arc::new(vec![PivotField::new("Sales", "S")]);
        assert_eq!(key(&a, &["US"]).with_value_field(&vf, 0).as_str(), "Country:US;Sales:");
    }

    #[test]
    fn test_null_and_empty_text_keys_differ() {
        let a = axis(false, false);
        let root = GroupKey::grand_total(&a);
        let null = root.child(Value::Null);
        let empty = root.child(Value::from(""));
        assert_eq!(null.as_str(), "Country:null;");
        assert_eq!(empty.as_str(), "Country:;");
        assert_ne!(null, empty);
        assert_eq!(null.compare_to(&empty), Ordering::Greater);
    }

    #[test]
    fn test_key_kinds() {
        let a = axis(false, false);
        assert!(GroupKey::grand_total(&a).is_grand_total());
        assert!(key(&a, &["US"]).is_subtotal());
        assert!(!key(&a, &["US", "NYC"]).is_total());
    }

    #[test]
    fn test_display_values() {
        let a = axis(false, false);
        assert_eq!(GroupKey::grand_total(&a).display_value(0), GRAND_TOTAL_LABEL);
        let k = key(&a, &["US"]);
        assert_eq!(k.display_value(0), "US");
        assert_eq!(k.display_value(1), SUBTOTAL_LABEL);
    }

    #[test]
    fn test_compare_values_then_direction() {
        let asc = axis(false, false);
        assert_eq!(key(&asc, &["UK"]).compare_to(&key(&asc, &["US"])), Ordering::Less);

        let desc = axis(true, false);
        assert_eq!(key(&desc, &["UK"]).compare_to(&key(&desc, &["US"])), Ordering::Greater);
    }

    #[test]
    fn test_nulls_sort_last_in_both_directions() {
        for descending in [false, true] {
            let a = axis(descending, false);
            let null = GroupKey::grand_total(&a).child(Value::Null);
            assert_eq!(null.compare_to(&key(&a, &["US"])), Ordering::Greater);
            assert_eq!(key(&a, &["US"]).compare_to(&null), Ordering::Less);
        }
    }

    #[test]
    fn test_subtotal_placement() {
        let after = axis(false, false);
        assert_eq!(key(&after, &["US"]).compare_to(&key(&after, &["US", "NYC"])), Ordering::Greater);
        assert_eq!(GroupKey::grand_total(&after).compare_to(&key(&after, &["US"])), Ordering::Greater);

        let before = axis(false, true);
        assert_eq!(key(&before, &["US"]).compare_to(&key(&before, &["US", "NYC"])), Ordering::Less);
    }

    #[test]
    fn test_value_field_tie_break() {
        let a = axis(false, false);
        let vf = Arc::new(vec![PivotField::new("Sales", "S"), PivotField::new("Count", "S")]);
        let sales = key(&a, &["US"]).with_value_field(&vf, 0);
        let count = key(&a, &["US"]).with_value_field(&vf, 1);
        assert_eq!(sales.compare_to(&count), Ordering::Less);
        assert_eq!(count.compare_to(&sales), Ordering::Greater);
    }

    #[test]
    fn test_different_axes_are_incomparable() {
        let a = axis(false, false);
        let b = axis(false, false);
        assert_eq!(key(&a, &["A"]).compare_to(&key(&b, &["B"])), Ordering::Equal);
    }

    #[test]
    fn test_dates_compare_through_format() {
        let mut month = PivotField::new("Month", "D");
        month.format = "MMMM".to_string();
        let a = AxisFields::new(vec![month], false);

        let d = |y, m, d| Value::from(NaiveDate::from_ymd_opt(y, m, d).unwrap());
        let root = GroupKey::grand_total(&a);
        let march_2023 = root.child(d(2023, 3, 1));
        let march_2024 = root.child(d(2024, 3, 28));
        let april_2020 = root.child(d(2020, 4, 2));

        assert_eq!(march_2023.compare_to(&march_2024), Ordering::Equal);
        assert_eq!(april_2020.compare_to(&march_2024), Ordering::Greater);
    }

    #[test]
    fn test_matches_item_uses_formatted_values() {
        let mut amount = PivotField::new("Amount", "A");
        amount.format = "n0".to_string();
        let a = AxisFields::new(vec![amount], false);
        let k = GroupKey::grand_total(&a).child(Value::from(10.0));

        assert!(k.matches_item(&Record::new().with("A", 10.2)));
        assert!(!k.matches_item(&Record::new().with("A", 11.0)));
        assert!(GroupKey::grand_total(&a).matches_item(&Record::new()));
    }

    #[test]
    fn test_same_parent() {
        let a = axis(false, false);
        assert!(key(&a, &["US", "NYC"]).same_parent(&key(&a, &["US", "LA"])));
        assert!(!key(&a, &["US", "NYC"]).same_parent(&key(&a, &["UK", "London"])));
        assert!(key(&a, &["US"]).same_parent(&key(&a, &["UK"])));
        assert!(!GroupKey::grand_total(&a).same_parent(&GroupKey::grand_total(&a)));
    }
}
