use core_types::{ColumnCaps, DataType};
use indexmap::IndexSet;
use protocol::{ColumnDefinition, DistinctsResponse, SortDirection};

/// Last known distinct values for a column.
///
/// `matching` holds the values that match the search text of the last
/// refresh (all values when there was none), `remaining` the other values
/// offered behind "show more". Both are scoped by the other columns' filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinctsCache {
    pub matching: Vec<String>,
    pub remaining: Vec<String>,
    /// `None` until the first refresh completes.
    pub has_more: Option<bool>,
    /// Set when another column's filter changed since the last refresh.
    pub is_dirty: bool,
    pub search_text: Option<String>,
    pub(crate) request_seq: u64,
}

impl DistinctsCache {
    pub fn is_loaded(&self) -> bool {
        self.has_more.is_some()
    }

    /// Store a response. `current` is false when sibling filters changed
    /// after the request was sent; the values are shown but stay dirty.
    pub(crate) fn apply(
        &mut self,
        response: DistinctsResponse,
        search_text: Option<String>,
        current: bool,
    ) {
        self.matching = response.matching;
        self.remaining = response.remaining;
        self.has_more = Some(response.has_more);
        self.search_text = search_text;
        self.is_dirty = !current;
    }
}

/// Client-side state of one query column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    pub offset: i32,
    pub caps: ColumnCaps,
    pub is_hidden: bool,
    pub sort_direction: SortDirection,
    /// Wire-encoded distinct values making up this column's filter.
    pub selected_distincts: IndexSet<String>,
    pub selected_distincts_inversed: bool,
    pub distincts: DistinctsCache,
}

impl Column {
    pub fn from_definition(def: &ColumnDefinition) -> Self {
        Self {
            name: def.name.clone(),
            label: def.label.clone().unwrap_or_else(|| def.name.clone()),
            data_type: def.data_type,
            offset: def.offset,
            caps: def.caps,
            is_hidden: def.is_hidden,
            sort_direction: SortDirection::None,
            selected_distincts: IndexSet::new(),
            selected_distincts_inversed: false,
            distincts: DistinctsCache::default(),
        }
    }

    /// Only filterable columns with at least one selected distinct
    /// contribute to the request filter.
    pub fn has_active_filter(&self) -> bool {
        self.caps.can_filter() && !self.selected_distincts.is_empty()
    }

    pub fn can_sort(&self) -> bool {
        self.caps.can_sort()
    }

    pub fn can_filter(&self) -> bool {
        self.caps.can_filter()
    }

    pub fn can_group_by(&self) -> bool {
        self.caps.can_group_by()
    }

    pub fn can_list_distincts(&self) -> bool {
        self.caps.can_list_distincts()
    }
}
