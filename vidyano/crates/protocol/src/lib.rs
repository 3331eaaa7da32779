//! Protocol models for the Vidyano query core.
//!
//! These types describe what the client sends to, and receives from, the
//! remote data source. They carry no transport: HTTP/JSON (or anything else)
//! lives behind the `RemoteDataSource` seam in the `query` crate.

use core_types::{ColumnCaps, DataType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
pub use uuid::Uuid;

pub mod distinct;
pub mod sort;

pub use distinct::{
    DistinctValue, TEXT_SEARCH_PREFIX, build_filter_value, is_text_search_value,
    parse_distinct_value, text_search_fragment,
};
pub use sort::{SortDirection, SortOption};

/// Serialize durations as milliseconds on the wire.
mod duration_ms {
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dur) => {
                    let ms: u64 = dur.as_millis().try_into().map_err(|_| {
                        serde::ser::Error::custom("duration too large for u64 millis")
                    })?;
                    serializer.serialize_some(&ms)
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

/// How a filter value is compared against a cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchModifier {
    /// Equality with the decoded distinct value.
    Exact,
    /// Free-text fragment; contains/starts-with semantics belong to the server.
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchExpr {
    pub column: String,
    /// Wire-encoded distinct value, passed through untouched.
    pub value: String,
    pub modifier: MatchModifier,
}

impl MatchExpr {
    /// Build a leaf from an encoded distinct, detecting `1|@` text fragments.
    pub fn from_encoded(column: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        let modifier = if is_text_search_value(&value) {
            MatchModifier::Text
        } else {
            MatchModifier::Exact
        };
        Self {
            column: column.into(),
            value,
            modifier,
        }
    }
}

/// Filter predicate sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterExpr {
    Match(MatchExpr),
    Not(Box<FilterExpr>),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl Default for FilterExpr {
    fn default() -> Self {
        FilterExpr::And(Vec::new())
    }
}

impl FilterExpr {
    /// True for the empty conjunction, which matches every row.
    pub fn is_match_all(&self) -> bool {
        matches!(self, FilterExpr::And(items) if items.is_empty())
    }

    /// Columns referenced anywhere in the expression.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::Match(m) => out.push(&m.column),
            FilterExpr::Not(inner) => inner.collect_columns(out),
            FilterExpr::And(items) | FilterExpr::Or(items) => {
                for item in items {
                    item.collect_columns(out);
                }
            }
        }
    }
}

/// Snapshot of everything that shapes a result set, taken when a request is issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuerySnapshot {
    pub query_id: String,
    #[serde(default)]
    pub text_search: String,
    #[serde(default)]
    pub filter: FilterExpr,
    #[serde(default)]
    pub sort_options: Vec<SortOption>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_top")]
    pub top: u32,
    #[serde(default)]
    pub continuation: Option<String>,
}

fn default_top() -> u32 {
    100
}

impl QuerySnapshot {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            text_search: String::new(),
            filter: FilterExpr::default(),
            sort_options: Vec::new(),
            group_by: None,
            skip: 0,
            top: default_top(),
            continuation: None,
        }
    }

    pub fn with_text_search(mut self, text: impl Into<String>) -> Self {
        self.text_search = text.into();
        self
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort_options: Vec<SortOption>) -> Self {
        self.sort_options = sort_options;
        self
    }

    pub fn with_group_by(mut self, column: Option<String>) -> Self {
        self.group_by = column;
        self
    }

    /// Set the requested window.
    pub fn with_window(mut self, skip: u32, top: u32) -> Self {
        self.skip = skip;
        self.top = top;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteQueryRequest {
    pub id: Uuid,
    pub snapshot: QuerySnapshot,
    #[serde(default, with = "duration_ms::option")]
    pub timeout: Option<Duration>,
}

impl ExecuteQueryRequest {
    pub fn new(snapshot: QuerySnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One cell of a result row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValuePayload {
    /// Column name.
    pub key: String,
    /// Service string; `None` is a null cell.
    pub value: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub type_hints: BTreeMap<String, String>,
}

impl ValuePayload {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
            object_id: None,
            type_hints: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemPayload {
    pub id: String,
    pub values: Vec<ValuePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupPayload {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupingInfo {
    pub group_by: String,
    pub groups: Vec<GroupPayload>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NotificationKind {
    #[default]
    Notice,
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NotificationKind::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteQueryResponse {
    pub id: Uuid,
    pub items: Vec<ItemPayload>,
    pub total_items: u64,
    #[serde(default)]
    pub grouping_info: Option<GroupingInfo>,
    #[serde(default)]
    pub continuation: Option<String>,
    #[serde(default)]
    pub has_more: Option<bool>,
    #[serde(default)]
    pub notification: Option<Notification>,
}

impl ExecuteQueryResponse {
    pub fn new(id: Uuid, items: Vec<ItemPayload>, total_items: u64) -> Self {
        Self {
            id,
            items,
            total_items,
            grouping_info: None,
            continuation: None,
            has_more: None,
            notification: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistinctsRequest {
    pub id: Uuid,
    pub column: String,
    /// Snapshot carrying the other columns' filters only.
    pub snapshot: QuerySnapshot,
    #[serde(default)]
    pub search_text: Option<String>,
    pub cap: u32,
}

impl DistinctsRequest {
    pub fn new(column: impl Into<String>, snapshot: QuerySnapshot, cap: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            column: column.into(),
            snapshot,
            search_text: None,
            cap,
        }
    }

    /// Blank search text is the same as none.
    pub fn with_search_text(mut self, text: Option<&str>) -> Self {
        self.search_text = text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistinctsResponse {
    pub id: Uuid,
    pub matching: Vec<String>,
    pub remaining: Vec<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderRequest {
    pub id: Uuid,
    pub snapshot: QuerySnapshot,
    /// Item that will precede the moved item, if any.
    pub before: Option<String>,
    pub item: String,
    /// Item that will follow the moved item, if any.
    pub after: Option<String>,
}

impl ReorderRequest {
    pub fn new(
        snapshot: QuerySnapshot,
        before: Option<String>,
        item: impl Into<String>,
        after: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot,
            before,
            item: item.into(),
            after,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderResponse {
    pub id: Uuid,
    pub accepted: bool,
    #[serde(default)]
    pub notification: Option<Notification>,
}

/// Server description of a column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub caps: ColumnCaps,
    #[serde(default)]
    pub is_hidden: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType, caps: ColumnCaps) -> Self {
        Self {
            name: name.into(),
            label: None,
            data_type,
            offset: 0,
            caps,
            is_hidden: false,
        }
    }

    pub fn with_offset(mut self, offset: i32) -> Self {
        self.offset = offset;
        self
    }
}

/// Server payload a client query is constructed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Initial sort in service form, e.g. `"Name ASC; Age DESC"`.
    #[serde(default)]
    pub sort_options: String,
    #[serde(default)]
    pub text_search: String,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub can_reorder: bool,
    #[serde(default = "default_true")]
    pub enable_select_all: bool,
    #[serde(default)]
    pub max_selected_items: Option<u32>,
    /// Result shipped with the definition, applied without a round trip.
    #[serde(default)]
    pub result: Option<ExecuteQueryResponse>,
}

fn default_true() -> bool {
    true
}

impl QueryDefinition {
    pub fn new(id: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            columns,
            page_size: None,
            sort_options: String::new(),
            text_search: String::new(),
            group_by: None,
            can_reorder: false,
            enable_select_all: true,
            max_selected_items: None,
            result: None,
        }
    }
}
