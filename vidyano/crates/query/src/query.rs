//! The query handle: owns client-side state and orchestrates searches, lazy
//! row loading, distinct refreshes, selection and reordering against a
//! [`RemoteDataSource`].
//!
//! All state sits behind one mutex that is never held across an await.
//! Requests capture a snapshot when they are issued; responses are applied
//! only if they still belong to the current generation.

use std::collections::HashSet;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use core_types::{ItemId, Value};
use futures::FutureExt;
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use protocol::{
    DistinctsRequest, ExecuteQueryRequest, ExecuteQueryResponse, Notification, QueryDefinition,
    QuerySnapshot, ReorderRequest, SortDirection, SortOption,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::column::{Column, DistinctsCache};
use crate::error::{QueryError, Result, ValidationError};
use crate::events::{EventBus, QueryEvent};
use crate::filter;
use crate::item::{QueryResultItem, QueryResultItemGroup, build_groups};
use crate::options::QueryOptions;
use crate::selection::{SelectAllState, SelectionTracker};
use crate::source::RemoteDataSource;
use crate::store::{Completion, FetchFuture, WindowedItemStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Idle,
    Searching,
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Keep select-all state and overrides across the new result.
    ///
    /// Without it select-all resets and only selections whose rows come
    /// back in the new first page survive. A selected row that is still
    /// in the result but beyond that page is deselected.
    pub keep_selection: bool,
    /// Search even when nothing changed since the last one.
    pub force: bool,
    /// Overrides [`QueryOptions::throw_exceptions`] for this call.
    pub throw_exceptions: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Applied { generation: u64, total_items: u64 },
    /// The query was clean; no request was sent.
    Unchanged,
    /// A newer search was issued before this one returned.
    Superseded { current: u64 },
    /// The search failed and was reported as a notification instead.
    Reported(Notification),
}

struct State {
    id: String,
    name: String,
    columns: IndexMap<String, Column>,
    sort_options: Vec<SortOption>,
    text_search: String,
    group_by: Option<String>,
    can_reorder: bool,
    enable_select_all: bool,
    page_size: u32,
    status: QueryStatus,
    dirty: bool,
    has_searched: bool,
    /// Latest issued search; the store holds the latest applied one.
    generation: u64,
    store: WindowedItemStore,
    selection: SelectionTracker,
    groups: Vec<QueryResultItemGroup>,
    has_more: bool,
    continuation: Option<String>,
    last_error: Option<String>,
    notification: Option<Notification>,
}

impl State {
    fn column(&self, name: &str) -> Result<&Column, ValidationError> {
        self.columns
            .get(name)
            .ok_or_else(|| ValidationError::UnknownColumn(name.to_string()))
    }

    fn column_mut(&mut self, name: &str) -> Result<&mut Column, ValidationError> {
        self.columns
            .get_mut(name)
            .ok_or_else(|| ValidationError::UnknownColumn(name.to_string()))
    }

    fn snapshot(&self) -> QuerySnapshot {
        QuerySnapshot::new(&self.id)
            .with_text_search(&self.text_search)
            .with_filter(filter::compose(self.columns.values()))
            .with_sort(self.sort_options.clone())
            .with_group_by(self.group_by.clone())
            .with_window(0, self.page_size)
    }

    /// Distincts of a column are listed under every filter but its own.
    fn distincts_snapshot(&self, column: &str) -> QuerySnapshot {
        QuerySnapshot::new(&self.id)
            .with_text_search(&self.text_search)
            .with_filter(filter::compose_excluding(self.columns.values(), column))
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        if self.status == QueryStatus::Error {
            self.status = QueryStatus::Idle;
        }
    }

    /// The result set is about to change shape: every other column's
    /// distincts go stale.
    fn invalidate_distincts(&mut self, except: Option<&str>) {
        for column in self.columns.values_mut() {
            if column.can_list_distincts() && except != Some(column.name.as_str()) {
                column.distincts.is_dirty = true;
            }
        }
        self.mark_dirty();
    }

    fn total_items(&self) -> usize {
        self.store.total_items()
    }

    fn check_index(&self, index: usize) -> Result<(), ValidationError> {
        let total = self.total_items();
        if index < total {
            Ok(())
        } else {
            Err(ValidationError::IndexOutOfRange { index, total })
        }
    }

    fn item_id(&self, index: usize) -> Option<ItemId> {
        self.store.get(index).map(|item| item.id.clone())
    }

    fn apply_result(
        &mut self,
        generation: u64,
        snapshot: QuerySnapshot,
        response: ExecuteQueryResponse,
        keep_selection: bool,
    ) -> u64 {
        let total_items = usize::try_from(response.total_items).unwrap_or(usize::MAX);
        let items: Vec<QueryResultItem> = response
            .items
            .into_iter()
            .enumerate()
            .map(|(index, payload)| QueryResultItem::from_payload(index, payload))
            .collect();

        if keep_selection {
            self.selection.forget_indices();
        } else {
            let present: HashSet<ItemId> = items.iter().map(|i| i.id.clone()).collect();
            self.selection.retain_present(&present);
        }

        self.store.reset(generation, total_items, snapshot);
        let loaded = self.store.insert_rows(items);
        if loaded.len() < total_items && response.has_more.is_none() {
            debug!(loaded = loaded.len(), total_items, "first page shorter than result");
        }

        self.groups = match &response.grouping_info {
            Some(info) => build_groups(info, total_items, &self.groups),
            None => Vec::new(),
        };
        self.has_more = response.has_more.unwrap_or(false);
        self.continuation = response.continuation;
        self.notification = response.notification;
        response.total_items
    }
}

struct Inner<S> {
    source: S,
    options: QueryOptions,
    state: Mutex<State>,
    events: EventBus,
}

/// Cheap to clone; clones share state.
pub struct Query<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Query<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RemoteDataSource> Query<S> {
    pub fn new(source: S, definition: QueryDefinition, options: QueryOptions) -> Self {
        let mut ordered: Vec<Column> = definition
            .columns
            .iter()
            .map(Column::from_definition)
            .collect();
        ordered.sort_by_key(|c| c.offset);
        let mut columns: IndexMap<String, Column> =
            ordered.into_iter().map(|c| (c.name.clone(), c)).collect();

        let sort_options: Vec<SortOption> = SortOption::parse_list(&definition.sort_options)
            .into_iter()
            .filter(|option| match columns.get_mut(&option.column) {
                Some(column) => {
                    column.sort_direction = option.direction;
                    true
                }
                None => {
                    warn!(column = %option.column, "ignoring sort on unknown column");
                    false
                }
            })
            .collect();

        let group_by = definition
            .group_by
            .filter(|name| columns.get(name).is_some_and(Column::can_group_by));
        let page_size = definition
            .page_size
            .filter(|&p| p > 0)
            .unwrap_or(options.page_size);
        let max_selected = definition.max_selected_items.or(options.max_selected_items);

        let mut state = State {
            id: definition.id.clone(),
            name: definition.name,
            columns,
            sort_options,
            text_search: definition.text_search,
            group_by,
            can_reorder: definition.can_reorder,
            enable_select_all: definition.enable_select_all,
            page_size,
            status: QueryStatus::Idle,
            dirty: true,
            has_searched: false,
            generation: 0,
            store: WindowedItemStore::new(QuerySnapshot::new(&definition.id)),
            selection: SelectionTracker::new(max_selected),
            groups: Vec::new(),
            has_more: false,
            continuation: None,
            last_error: None,
            notification: None,
        };

        if let Some(result) = definition.result {
            let snapshot = state.snapshot();
            state.generation = 1;
            let total = state.apply_result(1, snapshot, result, false);
            state.has_searched = true;
            state.dirty = false;
            debug!(query = %state.id, total, "applied initial result");
        }

        Self {
            inner: Arc::new(Inner {
                source,
                options,
                state: Mutex::new(state),
                events: EventBus::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.inner.events.subscribe()
    }

    pub fn id(&self) -> String {
        self.inner.state.lock().id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.state.lock().status
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// Generation of the result set currently held.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().store.generation()
    }

    pub fn total_items(&self) -> usize {
        self.inner.state.lock().total_items()
    }

    pub fn page_size(&self) -> u32 {
        self.inner.state.lock().page_size
    }

    pub fn has_more(&self) -> bool {
        self.inner.state.lock().has_more
    }

    pub fn continuation(&self) -> Option<String> {
        self.inner.state.lock().continuation.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn notification(&self) -> Option<Notification> {
        self.inner.state.lock().notification.clone()
    }

    pub fn can_reorder(&self) -> bool {
        self.inner.state.lock().can_reorder
    }

    pub fn columns(&self) -> Vec<Column> {
        self.inner.state.lock().columns.values().cloned().collect()
    }

    pub fn column(&self, name: &str) -> Option<Column> {
        self.inner.state.lock().columns.get(name).cloned()
    }

    pub fn sort_options(&self) -> Vec<SortOption> {
        self.inner.state.lock().sort_options.clone()
    }

    pub fn text_search(&self) -> String {
        self.inner.state.lock().text_search.clone()
    }

    pub fn group_by(&self) -> Option<String> {
        self.inner.state.lock().group_by.clone()
    }

    pub fn groups(&self) -> Vec<QueryResultItemGroup> {
        self.inner.state.lock().groups.clone()
    }

    /// What the next search would send.
    pub fn snapshot(&self) -> QuerySnapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn loaded_count(&self) -> usize {
        self.inner.state.lock().store.loaded_count()
    }

    // ---- mutators -------------------------------------------------------

    pub fn set_text_search(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.inner.state.lock();
        if state.text_search != text {
            state.text_search = text;
            state.invalidate_distincts(None);
        }
    }

    /// Sort by `column`. Outside multi-sort every other column is reset;
    /// `SortDirection::None` removes the column from the sort.
    pub fn sort(&self, column: &str, direction: SortDirection, multi_sort: bool) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.column(column)?.can_sort() {
            return Err(ValidationError::NotSortable(column.to_string()).into());
        }

        let mut next: Vec<SortOption> = state
            .sort_options
            .iter()
            .filter(|o| multi_sort || o.column == column)
            .cloned()
            .collect();
        match next.iter().position(|o| o.column == column) {
            Some(pos) if direction.is_none() => {
                next.remove(pos);
            }
            Some(pos) => next[pos].direction = direction,
            None if direction.is_none() => {}
            None => next.push(SortOption {
                column: column.to_string(),
                direction,
            }),
        }
        if next == state.sort_options {
            return Ok(());
        }

        for col in state.columns.values_mut() {
            col.sort_direction = next
                .iter()
                .find(|o| o.column == col.name)
                .map_or(SortDirection::None, |o| o.direction);
        }
        state.sort_options = next;
        state.mark_dirty();
        Ok(())
    }

    pub fn group_by_column(&self, column: Option<&str>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if let Some(name) = column {
            if !state.column(name)?.can_group_by() {
                return Err(ValidationError::NotGroupable(name.to_string()).into());
            }
        }
        let next = column.map(str::to_string);
        if state.group_by != next {
            state.group_by = next;
            state.mark_dirty();
        }
        Ok(())
    }

    /// Replace a column's filter.
    pub fn set_filter<I, V>(&self, column: &str, values: I, inversed: bool) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.update_filter(column, |col| {
            col.selected_distincts = values.into_iter().map(Into::into).collect();
            col.selected_distincts_inversed = inversed;
        })
    }

    pub fn add_filter_value(&self, column: &str, value: impl Into<String>) -> Result<()> {
        self.update_filter(column, |col| {
            col.selected_distincts.insert(value.into());
        })
    }

    pub fn remove_filter_value(&self, column: &str, value: &str) -> Result<()> {
        self.update_filter(column, |col| {
            col.selected_distincts.shift_remove(value);
        })
    }

    pub fn set_filter_inversed(&self, column: &str, inversed: bool) -> Result<()> {
        self.update_filter(column, |col| col.selected_distincts_inversed = inversed)
    }

    pub fn clear_filter(&self, column: &str) -> Result<()> {
        self.update_filter(column, |col| {
            col.selected_distincts.clear();
            col.selected_distincts_inversed = false;
        })
    }

    pub fn clear_filters(&self) {
        let mut state = self.inner.state.lock();
        let mut changed = false;
        for col in state.columns.values_mut() {
            if !col.selected_distincts.is_empty() || col.selected_distincts_inversed {
                col.selected_distincts.clear();
                col.selected_distincts_inversed = false;
                changed = true;
            }
        }
        if changed {
            state.invalidate_distincts(None);
        }
    }

    fn update_filter(&self, column: &str, change: impl FnOnce(&mut Column)) -> Result<()> {
        let mut state = self.inner.state.lock();
        let col = state.column_mut(column)?;
        if !col.can_filter() {
            return Err(ValidationError::NotFilterable(column.to_string()).into());
        }
        let before = (col.selected_distincts.clone(), col.selected_distincts_inversed);
        change(col);
        if before.0 == col.selected_distincts && before.1 == col.selected_distincts_inversed {
            return Ok(());
        }
        state.invalidate_distincts(Some(column));
        Ok(())
    }

    // ---- search ---------------------------------------------------------

    pub async fn search(&self) -> Result<SearchOutcome> {
        self.search_with(SearchOptions::default()).await
    }

    /// Run a search with the current state. The latest call wins: a response
    /// that arrives after a newer search was issued is dropped.
    pub async fn search_with(&self, opts: SearchOptions) -> Result<SearchOutcome> {
        let (generation, request) = {
            let mut state = self.inner.state.lock();
            if !opts.force && state.has_searched && !state.dirty {
                debug!(query = %state.id, "search skipped, nothing changed");
                return Ok(SearchOutcome::Unchanged);
            }
            state.generation += 1;
            state.dirty = false;
            state.status = QueryStatus::Searching;
            let request = ExecuteQueryRequest::new(state.snapshot())
                .with_timeout(self.inner.options.request_timeout);
            (state.generation, request)
        };
        debug!(
            generation,
            text = %request.snapshot.text_search,
            sort = %SortOption::format_list(&request.snapshot.sort_options),
            "search issued"
        );
        self.inner.events.emit(QueryEvent::SearchStarted { generation });

        let snapshot = request.snapshot.clone();
        let result = with_timeout(
            self.inner.options.request_timeout,
            self.inner.source.execute_query(request),
        )
        .await;

        let mut state = self.inner.state.lock();
        if state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                "discarding superseded search response"
            );
            return Ok(SearchOutcome::Superseded {
                current: state.generation,
            });
        }

        match result {
            Ok(response) => {
                let total_items =
                    state.apply_result(generation, snapshot, response, opts.keep_selection);
                state.status = QueryStatus::Idle;
                state.has_searched = true;
                state.last_error = None;
                let notification = state.notification.clone();
                let selected_count = state.selection.selected_count(state.total_items());
                drop(state);

                info!(generation, total_items, "search applied");
                self.inner.events.emit(QueryEvent::SearchCompleted {
                    generation,
                    total_items,
                });
                self.inner
                    .events
                    .emit(QueryEvent::SelectionChanged { selected_count });
                if let Some(notification) = notification {
                    self.inner.events.emit(QueryEvent::Notification(notification));
                }
                Ok(SearchOutcome::Applied {
                    generation,
                    total_items,
                })
            }
            Err(err) => {
                let message = format!("{err:#}");
                state.status = QueryStatus::Error;
                state.dirty = true;
                state.last_error = Some(message.clone());
                drop(state);

                warn!(generation, error = %message, "search failed");
                self.inner.events.emit(QueryEvent::SearchFailed {
                    generation,
                    message: message.clone(),
                });
                if opts
                    .throw_exceptions
                    .unwrap_or(self.inner.options.throw_exceptions)
                {
                    Err(QueryError::transport(err))
                } else {
                    let notification = Notification::error(message);
                    self.inner
                        .events
                        .emit(QueryEvent::Notification(notification.clone()));
                    Ok(SearchOutcome::Reported(notification))
                }
            }
        }
    }

    // ---- rows -----------------------------------------------------------

    /// Loaded row at `index`, or `None` after queueing it for a debounced fetch.
    pub fn get_item(&self, index: usize) -> Option<QueryResultItem> {
        let schedule = {
            let mut state = self.inner.state.lock();
            if let Some(item) = state.store.get(index) {
                return Some(item.clone());
            }
            state.store.enqueue(index)
        };
        if schedule {
            self.schedule_flush();
        }
        None
    }

    /// Rows `start..start + length`, clamped to the result. Cached rows are
    /// reused and rows already being fetched are awaited, not refetched.
    pub async fn get_items(&self, start: usize, length: usize) -> Result<Vec<QueryResultItem>> {
        let (generation, end, fetches) = {
            let mut state = self.inner.state.lock();
            let end = start.saturating_add(length).min(state.total_items());
            if start >= end {
                return Ok(Vec::new());
            }
            let plan = state.store.plan(start..end);
            let mut fetches = plan.joined;
            for span in plan.missing {
                fetches.push(self.start_fetch(&mut state, span));
            }
            (state.store.generation(), end, fetches)
        };

        for result in join_all(fetches).await {
            result?;
        }

        let state = self.inner.state.lock();
        if state.store.generation() != generation {
            return Err(QueryError::Superseded {
                current: state.store.generation(),
            });
        }
        Ok(state.store.loaded_in(start..end).cloned().collect())
    }

    /// Drop queued indices and detach running fetches; whoever awaits them
    /// gets [`QueryError::Aborted`].
    pub fn abort_pending(&self) -> usize {
        let aborted = self.inner.state.lock().store.abort();
        if aborted > 0 {
            debug!(aborted, "aborted pending fetches");
        }
        aborted
    }

    pub fn typed_value(&self, item: &QueryResultItem, column: &str) -> Result<Value> {
        let data_type = self.inner.state.lock().column(column)?.data_type;
        Ok(item.typed(column, data_type)?)
    }

    fn schedule_flush(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, lazy fetch deferred");
            self.inner.state.lock().store.cancel_flush();
            return;
        };
        let query = self.clone();
        let debounce = self.inner.options.fetch_debounce;
        handle.spawn(async move {
            if !debounce.is_zero() {
                tokio::time::sleep(debounce).await;
            }
            query.flush_pending().await;
        });
    }

    async fn flush_pending(&self) {
        let fetches: Vec<FetchFuture> = {
            let mut state = self.inner.state.lock();
            let gap = self.inner.options.gap_for(state.page_size);
            let spans = state.store.take_pending(gap);
            spans
                .into_iter()
                .map(|span| self.start_fetch(&mut state, span))
                .collect()
        };
        for result in join_all(fetches).await {
            match result {
                Err(err) if err.is_discard() => debug!(error = %err, "lazy fetch discarded"),
                Err(err) => warn!(error = %err, "lazy fetch failed"),
                Ok(()) => {}
            }
        }
    }

    fn start_fetch(&self, state: &mut State, span: Range<usize>) -> FetchFuture {
        let id = state.store.next_fetch_id();
        let generation = state.store.generation();
        let skip = span.start;
        let snapshot = state
            .store
            .snapshot()
            .clone()
            .with_window(clamp_u32(skip), clamp_u32(span.len()));
        let request =
            ExecuteQueryRequest::new(snapshot).with_timeout(self.inner.options.request_timeout);
        debug!(generation, skip, top = span.len(), "fetching rows");

        let inner = Arc::clone(&self.inner);
        let future = async move {
            let result = with_timeout(
                inner.options.request_timeout,
                inner.source.execute_query(request),
            )
            .await;
            inner.complete_fetch(id, generation, skip, result)
        }
        .boxed()
        .shared();
        state.store.register(id, span, future.clone());
        future
    }

    // ---- distincts ------------------------------------------------------

    /// Refresh a column's distinct values under the other columns' filters.
    /// When refreshes overlap only the latest one is applied; earlier ones
    /// return the cache as it stands.
    pub async fn refresh_distincts(
        &self,
        column: &str,
        search_text: Option<&str>,
    ) -> Result<DistinctsCache> {
        let (seq, request) = {
            let mut state = self.inner.state.lock();
            if !state.column(column)?.can_list_distincts() {
                return Err(ValidationError::NoDistincts(column.to_string()).into());
            }
            let snapshot = state.distincts_snapshot(column);
            let cache = &mut state.column_mut(column)?.distincts;
            cache.request_seq += 1;
            let request = DistinctsRequest::new(column, snapshot, self.inner.options.distincts_cap)
                .with_search_text(search_text);
            (cache.request_seq, request)
        };
        let search_text = request.search_text.clone();
        let scope = request.snapshot.clone();

        let result = with_timeout(
            self.inner.options.request_timeout,
            self.inner.source.refresh_distincts(request),
        )
        .await;

        let cache = {
            let mut state = self.inner.state.lock();
            let now = state.distincts_snapshot(column);
            let current = now.filter == scope.filter && now.text_search == scope.text_search;
            let cache = &mut state.column_mut(column)?.distincts;
            if cache.request_seq != seq {
                debug!(column, "discarding superseded distincts response");
                return Ok(cache.clone());
            }
            let response = result.map_err(|err| {
                warn!(column, error = %format!("{err:#}"), "distincts refresh failed");
                QueryError::transport(err)
            })?;
            if !current {
                debug!(column, "sibling filters changed during refresh; keeping cache dirty");
            }
            cache.apply(response, search_text, current);
            cache.clone()
        };
        self.inner.events.emit(QueryEvent::DistinctsRefreshed {
            column: column.to_string(),
        });
        Ok(cache)
    }

    // ---- selection ------------------------------------------------------

    pub fn is_selected(&self, index: usize) -> bool {
        let state = self.inner.state.lock();
        let id = state.item_id(index);
        state.selection.is_selected(index, id.as_ref())
    }

    pub fn selected_count(&self) -> u64 {
        let state = self.inner.state.lock();
        state.selection.selected_count(state.total_items())
    }

    /// Loaded rows that are selected.
    pub fn selected_items(&self) -> Vec<QueryResultItem> {
        let state = self.inner.state.lock();
        state
            .store
            .loaded()
            .filter(|item| state.selection.is_selected(item.index, Some(&item.id)))
            .cloned()
            .collect()
    }

    pub fn select_all_state(&self) -> SelectAllState {
        let state = self.inner.state.lock();
        SelectAllState {
            is_available: state.enable_select_all,
            all_selected: state.selection.all_selected(),
            inverse: state.selection.inverse(),
        }
    }

    pub fn set_selected(&self, index: usize, selected: bool) -> Result<()> {
        self.update_selection(|state| {
            state.check_index(index)?;
            let id = state.item_id(index);
            let total = state.total_items();
            state
                .selection
                .set_selected(index, id.as_ref(), selected, total)
                .map(drop)
        })
    }

    /// Flip one row; returns its new state.
    pub fn toggle_selection(&self, index: usize) -> Result<bool> {
        self.update_selection(|state| {
            state.check_index(index)?;
            let id = state.item_id(index);
            let total = state.total_items();
            let selected = !state.selection.is_selected(index, id.as_ref());
            state
                .selection
                .set_selected(index, id.as_ref(), selected, total)?;
            Ok(selected)
        })
    }

    /// Select or deselect `from..=to` (either order), loaded or not.
    pub fn select_range(&self, from: usize, to: usize, selected: bool) -> Result<()> {
        self.update_selection(|state| {
            state.check_index(from)?;
            state.check_index(to)?;
            let total = state.total_items();
            let State {
                store, selection, ..
            } = state;
            selection.select_range(from.min(to)..=from.max(to), selected, total, |i| {
                store.get(i).map(|item| item.id.clone())
            })
        })
    }

    pub fn select_all(&self) -> Result<()> {
        self.update_selection(|state| {
            if !state.enable_select_all {
                return Err(ValidationError::SelectAllUnavailable);
            }
            let total = state.total_items();
            state.selection.select_all(total)
        })
    }

    pub fn clear_selection(&self) {
        // Clearing never exceeds the maximum.
        let _ = self.update_selection(|state| {
            state.selection.clear();
            Ok(())
        });
    }

    pub fn invert_selection(&self) -> Result<()> {
        self.update_selection(|state| {
            let total = state.total_items();
            state.selection.invert(total)
        })
    }

    fn update_selection<T>(
        &self,
        change: impl FnOnce(&mut State) -> Result<T, ValidationError>,
    ) -> Result<T> {
        let (value, selected_count) = {
            let mut state = self.inner.state.lock();
            let value = change(&mut state)?;
            (value, state.selection.selected_count(state.total_items()))
        };
        self.inner
            .events
            .emit(QueryEvent::SelectionChanged { selected_count });
        Ok(value)
    }

    // ---- groups ---------------------------------------------------------

    /// Flip a group's collapsed flag; `None` when no such group exists.
    pub fn toggle_group(&self, name: &str) -> Option<bool> {
        let collapsed = {
            let mut state = self.inner.state.lock();
            let group = state.groups.iter_mut().find(|g| g.name == name)?;
            group.is_collapsed = !group.is_collapsed;
            group.is_collapsed
        };
        self.inner.events.emit(QueryEvent::GroupCollapsed {
            name: name.to_string(),
            collapsed,
        });
        Some(collapsed)
    }

    // ---- reorder --------------------------------------------------------

    /// Move the row at `item` so it sits between `before` and `after`
    /// (indices in the current result). On success the loaded rows are
    /// moved locally; no search is issued.
    pub async fn reorder(
        &self,
        before: Option<usize>,
        item: usize,
        after: Option<usize>,
    ) -> Result<()> {
        let (generation, request) = {
            let state = self.inner.state.lock();
            if !state.can_reorder {
                return Err(ValidationError::ReorderNotAllowed.into());
            }
            let id_at = |index: usize| -> Result<String, ValidationError> {
                state.check_index(index)?;
                state
                    .item_id(index)
                    .map(|id| id.as_str().to_string())
                    .ok_or(ValidationError::ItemNotLoaded(index))
            };
            let request = ReorderRequest::new(
                state.store.snapshot().clone(),
                before.map(&id_at).transpose()?,
                id_at(item)?,
                after.map(&id_at).transpose()?,
            );
            (state.store.generation(), request)
        };

        let response = with_timeout(
            self.inner.options.request_timeout,
            self.inner.source.execute_reorder(request),
        )
        .await
        .map_err(QueryError::transport)?;

        let target = reorder_target(before, item);
        {
            let mut state = self.inner.state.lock();
            if state.store.generation() != generation {
                return Err(QueryError::Superseded {
                    current: state.store.generation(),
                });
            }
            if response.accepted {
                state.store.move_item(item, target);
                state.selection.move_index(item, target);
            }
        }

        if !response.accepted {
            let message = response
                .notification
                .map(|n| n.message)
                .unwrap_or_else(|| "reorder rejected".to_string());
            warn!(item, error = %message, "reorder rejected");
            self.inner
                .events
                .emit(QueryEvent::Notification(Notification::error(message.clone())));
            return Err(QueryError::Rejected(message));
        }

        self.inner.events.emit(QueryEvent::ItemMoved {
            from: item,
            to: target,
        });
        if let Some(notification) = response.notification {
            self.inner.events.emit(QueryEvent::Notification(notification));
        }
        Ok(())
    }
}

impl<S> Inner<S> {
    fn complete_fetch(
        &self,
        id: u64,
        generation: u64,
        skip: usize,
        result: anyhow::Result<ExecuteQueryResponse>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                state.store.fail(id);
                if state.store.generation() != generation {
                    return Err(QueryError::Superseded {
                        current: state.store.generation(),
                    });
                }
                return Err(QueryError::transport(err));
            }
        };

        if response.total_items as usize != state.store.total_items() {
            debug!(
                expected = state.store.total_items(),
                reported = response.total_items,
                "page reported a different total, keeping the search total"
            );
        }
        let items = response
            .items
            .into_iter()
            .enumerate()
            .map(|(offset, payload)| QueryResultItem::from_payload(skip + offset, payload))
            .collect();

        match state.store.complete(id, generation, items) {
            Completion::Applied(range) => {
                let State {
                    store, selection, ..
                } = &mut *state;
                for item in store.loaded_in(range.clone()) {
                    selection.reconcile_loaded(item.index, &item.id);
                }
                drop(state);
                self.events.emit(QueryEvent::ItemsLoaded { generation, range });
                Ok(())
            }
            Completion::Stale { current } => {
                debug!(generation, current, "discarding rows from old generation");
                Err(QueryError::Superseded { current })
            }
            Completion::Aborted => {
                debug!(generation, "discarding rows from aborted fetch");
                Err(QueryError::Aborted)
            }
        }
    }
}

/// Index the moved row lands on. Without a predecessor it moves to the top.
fn reorder_target(before: Option<usize>, item: usize) -> usize {
    match before {
        Some(b) if b < item => b + 1,
        Some(b) => b,
        None => 0,
    }
}

fn clamp_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    request: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| anyhow!("request timed out after {limit:?}"))?,
        None => request.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedSource, definition, row};
    use protocol::{NotificationKind, Uuid};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn opts() -> QueryOptions {
        QueryOptions::default()
            .with_page_size(10)
            .with_request_timeout(None)
    }

    fn query_with(
        source: &Arc<ScriptedSource>,
        options: QueryOptions,
    ) -> Query<Arc<ScriptedSource>> {
        Query::new(Arc::clone(source), definition(), options)
    }

    fn forced() -> SearchOptions {
        SearchOptions {
            force: true,
            ..SearchOptions::default()
        }
    }

    fn ids(items: &[QueryResultItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_coalesce_into_one_search() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());

        q.set_text_search("a");
        q.sort("Name", SortDirection::Descending, false).unwrap();
        q.add_filter_value("Age", "|30").unwrap();
        assert!(q.is_dirty());

        let outcome = q.search().await.unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Applied {
                generation: 1,
                total_items: 100
            }
        );
        assert_eq!(source.query_count(), 1);

        let sent = source.queries.lock()[0].clone();
        assert_eq!(sent.text_search, "a");
        assert_eq!(sent.sort_options, vec![SortOption::descending("Name")]);
        assert_eq!(sent.filter.columns(), vec!["Age"]);
        assert_eq!((sent.skip, sent.top), (0, 10));

        assert_eq!(q.search().await.unwrap(), SearchOutcome::Unchanged);
        assert_eq!(source.query_count(), 1);

        let forced = q.search_with(forced()).await.unwrap();
        assert!(matches!(forced, SearchOutcome::Applied { generation: 2, .. }));
        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn latest_search_wins() {
        let source = Arc::new(ScriptedSource::new(0));
        source.delay("slow", ms(100));
        source.delay("fast", ms(10));
        source.total_for("slow", 10);
        source.total_for("fast", 20);
        let q = query_with(&source, opts());

        q.set_text_search("slow");
        let first = tokio::spawn({
            let q = q.clone();
            async move { q.search().await }
        });
        while source.query_count() == 0 {
            tokio::task::yield_now().await;
        }

        q.set_text_search("fast");
        assert_eq!(source.queries.lock()[0].text_search, "slow");
        let second = q.search().await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(
            second,
            SearchOutcome::Applied {
                generation: 2,
                total_items: 20
            }
        );
        assert_eq!(first, SearchOutcome::Superseded { current: 2 });
        assert_eq!(q.total_items(), 20);
        assert_eq!(q.generation(), 2);
        assert_eq!(q.status(), QueryStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_search_keeps_its_snapshot() {
        let source = Arc::new(ScriptedSource::new(0));
        source.delay("slow", ms(100));
        let q = query_with(&source, opts());

        q.set_text_search("slow");
        let first = tokio::spawn({
            let q = q.clone();
            async move { q.search().await }
        });
        while source.query_count() == 0 {
            tokio::task::yield_now().await;
        }

        q.add_filter_value("Age", "|30").unwrap();
        q.sort("Name", SortDirection::Descending, false).unwrap();
        q.set_text_search("other");

        let sent = source.queries.lock()[0].clone();
        assert_eq!(sent.text_search, "slow");
        assert!(sent.filter.is_match_all());
        assert!(sent.sort_options.is_empty());

        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, SearchOutcome::Applied { generation: 1, .. }));
        assert!(q.is_dirty(), "changes made in flight still need a search");
        assert_eq!(source.query_count(), 1);

        q.search().await.unwrap();
        let second = source.queries.lock()[1].clone();
        assert_eq!(second.text_search, "other");
        assert_eq!(second.filter.columns(), vec!["Age"]);
        assert_eq!(SortOption::format_list(&second.sort_options), "Name DESC");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_indices_coalesce_into_spans() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts().with_coalesce_gap(0));
        q.search().await.unwrap();

        assert!(q.get_item(3).is_some(), "first page is cached");
        for index in [20, 21, 22, 25] {
            assert!(q.get_item(index).is_none());
        }
        tokio::time::sleep(ms(50)).await;

        assert_eq!(source.windows(), vec![(0, 10), (20, 3), (25, 1)]);
        assert_eq!(
            q.get_item(21).map(|i| i.id.as_str().to_string()),
            Some("row-21".to_string())
        );
        assert!(q.get_item(24).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn default_gap_merges_nearby_indices() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        for index in [20, 21, 22, 25] {
            q.get_item(index);
        }
        tokio::time::sleep(ms(50)).await;
        assert_eq!(source.windows(), vec![(0, 10), (20, 6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_reads_share_in_flight_fetch() {
        let source = Arc::new(ScriptedSource::new(100));
        source.delay("", ms(30));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        let (a, b) = tokio::join!(q.get_items(40, 10), q.get_items(45, 10));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(source.windows(), vec![(0, 10), (40, 10), (50, 5)]);
        assert_eq!(a.len(), 10);
        assert_eq!(b.len(), 10);
        assert_eq!(b[0].index, 45);

        let cached = q.get_items(42, 6).await.unwrap();
        assert_eq!(ids(&cached)[0], "row-42");
        assert_eq!(source.query_count(), 3, "cached rows are not refetched");
    }

    #[tokio::test(start_paused = true)]
    async fn get_items_clamps_to_total() {
        let source = Arc::new(ScriptedSource::new(12));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        let tail = q.get_items(8, 50).await.unwrap();
        assert_eq!(ids(&tail), vec!["row-8", "row-9", "row-10", "row-11"]);
        assert!(q.get_items(12, 5).await.unwrap().is_empty());
        assert_eq!(source.windows(), vec![(0, 10), (10, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_pending_rejects_waiters() {
        let source = Arc::new(ScriptedSource::new(100));
        source.delay("", ms(50));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        let fetch = tokio::spawn({
            let q = q.clone();
            async move { q.get_items(30, 5).await }
        });
        while source.query_count() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(q.abort_pending(), 1);
        let err = fetch.await.unwrap().unwrap_err();
        assert!(matches!(err, QueryError::Aborted));
        assert_eq!(q.loaded_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn new_search_discards_outstanding_fetches() {
        let source = Arc::new(ScriptedSource::new(100));
        source.delay("", ms(50));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        let fetch = tokio::spawn({
            let q = q.clone();
            async move { q.get_items(30, 5).await }
        });
        while source.query_count() < 2 {
            tokio::task::yield_now().await;
        }

        q.set_text_search("other");
        q.search().await.unwrap();

        let err = fetch.await.unwrap().unwrap_err();
        assert!(matches!(err, QueryError::Superseded { current: 2 }));
        assert_eq!(q.loaded_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_can_be_retried() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        source.set_failing(true);
        let err = q.get_items(30, 5).await.unwrap_err();
        assert!(matches!(err, QueryError::Transport(_)));
        assert_eq!(q.loaded_count(), 10, "cached rows survive a failed fetch");

        source.set_failing(false);
        assert_eq!(q.get_items(30, 5).await.unwrap().len(), 5);
        assert_eq!(source.windows(), vec![(0, 10), (30, 5), (30, 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_search_keeps_previous_result() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        source.set_failing(true);
        let err = q.search_with(forced()).await.unwrap_err();
        assert!(matches!(err, QueryError::Transport(_)));
        assert_eq!(q.status(), QueryStatus::Error);
        assert_eq!(q.total_items(), 100);
        assert_eq!(q.loaded_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn non_throwing_search_reports_notification() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts().with_throw_exceptions(false));
        let mut events = q.subscribe();

        source.set_failing(true);
        let outcome = q.search().await.unwrap();
        assert!(
            matches!(&outcome, SearchOutcome::Reported(n) if n.kind == NotificationKind::Error)
        );
        assert_eq!(q.status(), QueryStatus::Error);
        assert!(
            q.last_error()
                .is_some_and(|e| e.contains("service unavailable"))
        );

        assert_eq!(
            events.try_recv().unwrap(),
            QueryEvent::SearchStarted { generation: 1 }
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            QueryEvent::SearchFailed { generation: 1, .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            QueryEvent::Notification(_)
        ));

        q.set_text_search("x");
        assert_eq!(q.status(), QueryStatus::Idle);
        source.set_failing(false);
        assert!(matches!(
            q.search().await.unwrap(),
            SearchOutcome::Applied { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_time_out() {
        let source = Arc::new(ScriptedSource::new(100));
        source.delay("", ms(500));
        let q = query_with(&source, opts().with_request_timeout(Some(ms(20))));

        let err = q.search().await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn distincts_use_sibling_filters_only() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());
        q.set_text_search("jo");
        q.add_filter_value("Name", "|Name 1").unwrap();
        q.add_filter_value("Age", "|30").unwrap();

        let cache = q.refresh_distincts("Age", None).await.unwrap();
        assert_eq!(cache.matching, vec!["|all"]);
        assert_eq!(cache.remaining, vec!["|other"]);
        assert_eq!(cache.has_more, Some(false));
        assert!(!cache.is_dirty);

        let request = source.distincts.lock()[0].clone();
        assert_eq!(request.column, "Age");
        assert_eq!(request.snapshot.filter.columns(), vec!["Name"]);
        assert_eq!(request.snapshot.text_search, "jo");
        assert_eq!(request.cap, 50);

        q.add_filter_value("Name", "|Name 2").unwrap();
        let age = q.column("Age").unwrap();
        assert!(age.distincts.is_dirty);
        assert_eq!(age.distincts.matching, vec!["|all"], "stale values stay visible");
    }

    #[tokio::test(start_paused = true)]
    async fn distincts_validate_column() {
        let source = Arc::new(ScriptedSource::new(10));
        let q = query_with(&source, opts());
        assert!(matches!(
            q.refresh_distincts("Notes", None).await,
            Err(QueryError::Validation(ValidationError::NoDistincts(_)))
        ));
        assert!(matches!(
            q.refresh_distincts("Missing", None).await,
            Err(QueryError::Validation(ValidationError::UnknownColumn(_)))
        ));
        assert!(source.distincts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_distincts_refresh_applies() {
        let source = Arc::new(ScriptedSource::new(10));
        source.delay("slow", ms(100));
        let q = query_with(&source, opts());

        let slow = tokio::spawn({
            let q = q.clone();
            async move { q.refresh_distincts("Age", Some("slow")).await }
        });
        while source.distincts.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        let fast = q.refresh_distincts("Age", Some("fast")).await.unwrap();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(fast.matching, vec!["|fast"]);
        assert_eq!(slow.matching, vec!["|fast"]);
        assert_eq!(
            q.column("Age").unwrap().distincts.search_text.as_deref(),
            Some("fast")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn distincts_outdated_by_sibling_filter_stay_dirty() {
        let source = Arc::new(ScriptedSource::new(10));
        source.delay("slow", ms(100));
        let q = query_with(&source, opts());

        let pending = tokio::spawn({
            let q = q.clone();
            async move { q.refresh_distincts("Age", Some("slow")).await }
        });
        while source.distincts.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        q.add_filter_value("Name", "|Name 1").unwrap();
        assert!(q.column("Age").unwrap().distincts.is_dirty);

        let cache = pending.await.unwrap().unwrap();
        assert!(source.distincts.lock()[0].snapshot.filter.is_match_all());
        assert_eq!(cache.matching, vec!["|slow"], "values are still shown");
        assert!(cache.is_dirty);
        assert!(q.column("Age").unwrap().distincts.is_dirty);

        let fresh = q.refresh_distincts("Age", None).await.unwrap();
        assert!(!fresh.is_dirty);
        assert_eq!(source.distincts.lock()[1].snapshot.filter.columns(), vec!["Name"]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_mutations_leave_state_untouched() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        assert!(matches!(
            q.sort("Notes", SortDirection::Ascending, false),
            Err(QueryError::Validation(ValidationError::NotSortable(_)))
        ));
        assert!(matches!(
            q.add_filter_value("Notes", "|x"),
            Err(QueryError::Validation(ValidationError::NotFilterable(_)))
        ));
        assert!(matches!(
            q.group_by_column(Some("Name")),
            Err(QueryError::Validation(ValidationError::NotGroupable(_)))
        ));
        assert!(matches!(
            q.sort("Missing", SortDirection::Ascending, false),
            Err(QueryError::Validation(ValidationError::UnknownColumn(_)))
        ));
        assert!(matches!(
            q.set_selected(500, true),
            Err(QueryError::Validation(ValidationError::IndexOutOfRange {
                index: 500,
                total: 100
            }))
        ));
        assert!(!q.is_dirty());
        assert_eq!(q.search().await.unwrap(), SearchOutcome::Unchanged);
    }

    #[test]
    fn sort_modes() {
        let q = Query::new(ScriptedSource::new(0), definition(), opts());

        q.sort("Name", SortDirection::Ascending, false).unwrap();
        q.sort("Age", SortDirection::Descending, true).unwrap();
        assert_eq!(
            q.sort_options(),
            vec![SortOption::ascending("Name"), SortOption::descending("Age")]
        );

        q.sort("Age", SortDirection::Ascending, false).unwrap();
        assert_eq!(q.sort_options(), vec![SortOption::ascending("Age")]);
        assert_eq!(
            q.column("Name").unwrap().sort_direction,
            SortDirection::None
        );

        q.sort("Age", SortDirection::None, false).unwrap();
        assert!(q.sort_options().is_empty());
    }

    #[test]
    fn columns_follow_offset_order() {
        let q = Query::new(ScriptedSource::new(0), definition(), opts());
        let names: Vec<String> = q.columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Name", "Age", "Notes"]);
    }

    #[test]
    fn filter_noops_do_not_dirty() {
        let mut def = definition();
        def.result = Some(ExecuteQueryResponse::new(Uuid::nil(), Vec::new(), 0));
        let q = Query::new(ScriptedSource::new(0), def, opts());
        assert!(!q.is_dirty());

        q.remove_filter_value("Name", "|absent").unwrap();
        q.clear_filters();
        q.set_text_search("");
        assert!(!q.is_dirty());

        q.set_filter("Name", ["|A", "|B"], true).unwrap();
        assert!(q.is_dirty());
        let name = q.column("Name").unwrap();
        assert!(name.selected_distincts_inversed);
        assert_eq!(name.selected_distincts.len(), 2);
    }

    #[test]
    fn initial_result_is_generation_one() {
        let mut def = definition();
        def.sort_options = "Name DESC; Unknown".into();
        def.page_size = Some(5);
        def.result = Some(ExecuteQueryResponse::new(
            Uuid::nil(),
            (0..5).map(row).collect(),
            42,
        ));
        let q = Query::new(ScriptedSource::new(42), def, opts());

        assert_eq!(q.generation(), 1);
        assert_eq!(q.total_items(), 42);
        assert_eq!(q.page_size(), 5);
        assert_eq!(q.loaded_count(), 5);
        assert!(!q.is_dirty());
        assert_eq!(q.sort_options(), vec![SortOption::descending("Name")]);
        assert_eq!(
            q.column("Name").unwrap().sort_direction,
            SortDirection::Descending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn selection_spans_loaded_and_unloaded_rows() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts().with_max_selected_items(Some(50)));
        q.search().await.unwrap();

        q.set_selected(2, true).unwrap();
        q.set_selected(40, true).unwrap();
        assert_eq!(q.selected_count(), 2);
        assert_eq!(q.selected_items().len(), 1, "row 40 is not loaded yet");

        q.get_items(40, 1).await.unwrap();
        assert!(q.is_selected(40));
        assert_eq!(ids(&q.selected_items()), vec!["row-2", "row-40"]);

        assert!(matches!(
            q.select_all(),
            Err(QueryError::Validation(
                ValidationError::MaxSelectedExceeded {
                    requested: 100,
                    max: 50
                }
            ))
        ));
        assert!(q.invert_selection().is_err());
        assert_eq!(q.selected_count(), 2);

        q.search_with(SearchOptions {
            force: true,
            keep_selection: true,
            ..SearchOptions::default()
        })
        .await
        .unwrap();
        assert_eq!(q.selected_count(), 2);

        q.search_with(forced()).await.unwrap();
        assert_eq!(q.selected_count(), 1, "row-40 is not in the new first page");
        assert!(q.is_selected(2));
    }

    #[tokio::test(start_paused = true)]
    async fn range_toggle_and_select_all() {
        let source = Arc::new(ScriptedSource::new(30));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        q.select_range(12, 8, true).unwrap();
        assert_eq!(q.selected_count(), 5);
        assert!(!q.toggle_selection(10).unwrap());
        assert_eq!(q.selected_count(), 4);

        q.select_all().unwrap();
        assert_eq!(
            q.select_all_state(),
            SelectAllState {
                is_available: true,
                all_selected: true,
                inverse: false
            }
        );
        q.set_selected(0, false).unwrap();
        assert_eq!(q.selected_count(), 29);

        q.invert_selection().unwrap();
        assert_eq!(q.selected_count(), 1);
        assert!(q.is_selected(0));

        q.clear_selection();
        assert_eq!(q.selected_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn select_all_respects_availability() {
        let mut def = definition();
        def.enable_select_all = false;
        let q = Query::new(Arc::new(ScriptedSource::new(5)), def, opts());
        q.search().await.unwrap();
        assert!(matches!(
            q.select_all(),
            Err(QueryError::Validation(ValidationError::SelectAllUnavailable))
        ));
        assert!(!q.select_all_state().is_available);
    }

    #[tokio::test(start_paused = true)]
    async fn groups_partition_and_keep_collapse_state() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());
        q.group_by_column(Some("Age")).unwrap();
        q.search().await.unwrap();

        let groups = q.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].range(), 0..50);
        assert_eq!(groups[1].range(), 50..100);

        assert_eq!(q.toggle_group("second"), Some(true));
        q.search_with(forced()).await.unwrap();
        assert!(q.groups()[1].is_collapsed);
        assert_eq!(q.toggle_group("missing"), None);

        q.group_by_column(None).unwrap();
        q.search().await.unwrap();
        assert!(q.groups().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reorder_moves_loaded_rows_without_search() {
        let source = Arc::new(ScriptedSource::new(20));
        let mut def = definition();
        def.can_reorder = true;
        let q = Query::new(Arc::clone(&source), def, opts());
        q.search().await.unwrap();

        q.reorder(Some(0), 3, Some(1)).await.unwrap();
        let rows = q.get_items(0, 4).await.unwrap();
        assert_eq!(ids(&rows), vec!["row-0", "row-3", "row-1", "row-2"]);
        assert_eq!(source.query_count(), 1);

        let request = source.reorders.lock()[0].clone();
        assert_eq!(request.item, "row-3");
        assert_eq!(request.before.as_deref(), Some("row-0"));
        assert_eq!(request.after.as_deref(), Some("row-1"));

        q.reorder(None, 2, Some(0)).await.unwrap();
        let rows = q.get_items(0, 2).await.unwrap();
        assert_eq!(ids(&rows), vec!["row-1", "row-0"]);

        source.set_reject_reorder(true);
        assert!(matches!(
            q.reorder(None, 1, Some(0)).await,
            Err(QueryError::Rejected(_))
        ));
        assert!(matches!(
            q.reorder(None, 15, None).await,
            Err(QueryError::Validation(ValidationError::ItemNotLoaded(15)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reorder_requires_capability() {
        let source = Arc::new(ScriptedSource::new(5));
        let q = query_with(&source, opts());
        q.search().await.unwrap();
        assert!(matches!(
            q.reorder(None, 1, Some(0)).await,
            Err(QueryError::Validation(ValidationError::ReorderNotAllowed))
        ));
        assert!(source.reorders.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lazy_loads_are_announced() {
        let source = Arc::new(ScriptedSource::new(100));
        let q = query_with(&source, opts());
        let mut events = q.subscribe();
        q.search().await.unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            QueryEvent::SearchStarted { generation: 1 }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            QueryEvent::SearchCompleted {
                generation: 1,
                total_items: 100
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            QueryEvent::SelectionChanged { selected_count: 0 }
        );

        assert!(q.get_item(55).is_none());
        tokio::time::sleep(ms(30)).await;
        assert_eq!(
            events.try_recv().unwrap(),
            QueryEvent::ItemsLoaded {
                generation: 1,
                range: 55..56
            }
        );
        assert!(q.get_item(55).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn typed_values_use_column_types() {
        let source = Arc::new(ScriptedSource::new(10));
        let q = query_with(&source, opts());
        q.search().await.unwrap();

        let item = q.get_item(4).unwrap();
        assert_eq!(q.typed_value(&item, "Age").unwrap(), Value::Integer(24));
        assert_eq!(
            q.typed_value(&item, "Name").unwrap(),
            Value::Text("Name 4".into())
        );
        assert!(matches!(
            q.typed_value(&item, "Missing"),
            Err(QueryError::Validation(ValidationError::UnknownColumn(_)))
        ));
    }
}
