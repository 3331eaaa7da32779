use std::collections::BTreeMap;
use std::ops::Range;

use core_types::{DataType, ItemId, Value, ValueParseError};
use protocol::{GroupingInfo, ItemPayload, ValuePayload};
use tracing::warn;

/// Raw cell of a result row. Values stay in their service string form until
/// asked for typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemValue {
    pub column: String,
    pub value: Option<String>,
    pub object_id: Option<String>,
    pub type_hints: BTreeMap<String, String>,
}

impl From<ValuePayload> for ItemValue {
    fn from(payload: ValuePayload) -> Self {
        Self {
            column: payload.key,
            value: payload.value,
            object_id: payload.object_id,
            type_hints: payload.type_hints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResultItem {
    pub id: ItemId,
    /// Position in the current result set.
    pub index: usize,
    pub values: Vec<ItemValue>,
}

impl QueryResultItem {
    pub(crate) fn from_payload(index: usize, payload: ItemPayload) -> Self {
        Self {
            id: ItemId::new(payload.id),
            index,
            values: payload.values.into_iter().map(ItemValue::from).collect(),
        }
    }

    pub fn value(&self, column: &str) -> Option<&ItemValue> {
        self.values.iter().find(|v| v.column == column)
    }

    pub fn raw(&self, column: &str) -> Option<&str> {
        self.value(column).and_then(|v| v.value.as_deref())
    }

    /// Convert a cell using the column's declared type. Missing cells are
    /// treated like an absent value.
    pub fn typed(&self, column: &str, data_type: DataType) -> Result<Value, ValueParseError> {
        Value::from_service_string(self.raw(column), data_type)
    }
}

/// Contiguous run of rows sharing a group-by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResultItemGroup {
    pub name: String,
    pub count: usize,
    pub start: usize,
    /// Exclusive.
    pub end: usize,
    pub is_collapsed: bool,
}

impl QueryResultItemGroup {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }
}

/// Lay groups over the index space in server order.
///
/// Ranges always partition `0..total_items`: counts that overshoot are
/// clamped, and a short final group is stretched to cover the tail.
/// Collapse state carries over from `previous` by group name.
pub(crate) fn build_groups(
    info: &GroupingInfo,
    total_items: usize,
    previous: &[QueryResultItemGroup],
) -> Vec<QueryResultItemGroup> {
    let mut groups: Vec<QueryResultItemGroup> = Vec::with_capacity(info.groups.len());
    let mut cursor = 0usize;

    for group in &info.groups {
        if cursor >= total_items {
            warn!(
                group = %group.name,
                total_items,
                "grouping info lists more rows than the result holds; dropping group"
            );
            continue;
        }
        let count = usize::try_from(group.count).unwrap_or(usize::MAX);
        let end = cursor.saturating_add(count).min(total_items);
        let is_collapsed = previous
            .iter()
            .any(|p| p.name == group.name && p.is_collapsed);
        groups.push(QueryResultItemGroup {
            name: group.name.clone(),
            count: end - cursor,
            start: cursor,
            end,
            is_collapsed,
        });
        cursor = end;
    }

    if cursor < total_items {
        if let Some(last) = groups.last_mut() {
            warn!(
                covered = cursor,
                total_items, "grouping info covers fewer rows than the result; extending last group"
            );
            last.end = total_items;
            last.count = last.end - last.start;
        }
    }

    groups
}
