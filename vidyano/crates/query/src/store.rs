//! Sparse, generation-stamped storage of result rows.
//!
//! Rows live in a `BTreeMap` keyed by their index in the current result set.
//! Indices that are asked for but not loaded are queued, then coalesced into
//! spans and fetched. Each fetch is registered as a shared future so later
//! callers for the same rows join it instead of issuing another request.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use futures::future::{BoxFuture, Shared};
use protocol::QuerySnapshot;
use tracing::debug;

use crate::error::QueryError;
use crate::item::QueryResultItem;

pub(crate) type FetchFuture = Shared<BoxFuture<'static, Result<(), QueryError>>>;

struct InFlight {
    id: u64,
    range: Range<usize>,
    future: FetchFuture,
}

pub(crate) enum Completion {
    Applied(Range<usize>),
    Stale { current: u64 },
    Aborted,
}

/// What a caller has to do to get a range loaded.
#[derive(Default)]
pub(crate) struct FetchPlan {
    /// Spans nobody is fetching yet.
    pub missing: Vec<Range<usize>>,
    /// Fetches already covering part of the range.
    pub joined: Vec<FetchFuture>,
}

pub(crate) struct WindowedItemStore {
    generation: u64,
    total_items: usize,
    snapshot: QuerySnapshot,
    items: BTreeMap<usize, QueryResultItem>,
    pending: BTreeSet<usize>,
    flush_scheduled: bool,
    in_flight: Vec<InFlight>,
    next_fetch_id: u64,
}

impl WindowedItemStore {
    pub fn new(snapshot: QuerySnapshot) -> Self {
        Self {
            generation: 0,
            total_items: 0,
            snapshot,
            items: BTreeMap::new(),
            pending: BTreeSet::new(),
            flush_scheduled: false,
            in_flight: Vec::new(),
            next_fetch_id: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    /// Shape of the result set currently held; page fetches reuse it.
    pub fn snapshot(&self) -> &QuerySnapshot {
        &self.snapshot
    }

    pub fn get(&self, index: usize) -> Option<&QueryResultItem> {
        self.items.get(&index)
    }

    pub fn loaded(&self) -> impl Iterator<Item = &QueryResultItem> {
        self.items.values()
    }

    pub fn loaded_in(&self, range: Range<usize>) -> impl Iterator<Item = &QueryResultItem> {
        self.items.range(range).map(|(_, item)| item)
    }

    pub fn loaded_count(&self) -> usize {
        self.items.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start a new generation. Everything loaded, queued or in flight for
    /// the previous one is dropped.
    pub fn reset(&mut self, generation: u64, total_items: usize, snapshot: QuerySnapshot) {
        if !self.in_flight.is_empty() || !self.pending.is_empty() {
            debug!(
                previous = self.generation,
                generation,
                in_flight = self.in_flight.len(),
                pending = self.pending.len(),
                "dropping outstanding fetches for new generation"
            );
        }
        self.generation = generation;
        self.total_items = total_items;
        self.snapshot = snapshot;
        self.items.clear();
        self.pending.clear();
        self.in_flight.clear();
        self.flush_scheduled = false;
    }

    /// Store rows for the current generation. Rows past the end are ignored.
    /// Returns the index range the rows landed in.
    pub fn insert_rows(&mut self, items: Vec<QueryResultItem>) -> Range<usize> {
        let mut start = usize::MAX;
        let mut end = 0;
        for item in items {
            if item.index >= self.total_items {
                continue;
            }
            start = start.min(item.index);
            end = end.max(item.index + 1);
            self.items.insert(item.index, item);
        }
        if start > end { 0..0 } else { start..end }
    }

    /// Queue an unloaded index. Returns true when the caller has to schedule
    /// a flush; at most one is outstanding at a time.
    pub fn enqueue(&mut self, index: usize) -> bool {
        if index >= self.total_items
            || self.items.contains_key(&index)
            || self.covering(index).is_some()
            || !self.pending.insert(index)
        {
            return false;
        }
        !std::mem::replace(&mut self.flush_scheduled, true)
    }

    pub fn cancel_flush(&mut self) {
        self.flush_scheduled = false;
    }

    /// Drain the queue into spans, merging neighbours at most `gap` rows apart.
    pub fn take_pending(&mut self, gap: usize) -> Vec<Range<usize>> {
        self.flush_scheduled = false;
        let wanted: Vec<usize> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|&i| {
                i < self.total_items && !self.items.contains_key(&i) && self.covering(i).is_none()
            })
            .collect();
        coalesce(&wanted, gap)
            .into_iter()
            .flat_map(|span| self.outside_in_flight(span))
            .collect()
    }

    /// Split `range` into spans to fetch and fetches to join.
    pub fn plan(&mut self, range: Range<usize>) -> FetchPlan {
        let mut plan = FetchPlan::default();
        let mut joined_ids = Vec::new();
        let mut current: Option<Range<usize>> = None;

        for index in range.start..range.end.min(self.total_items) {
            if self.items.contains_key(&index) {
                plan.missing.extend(current.take());
                continue;
            }
            if let Some(flight) = self.covering(index) {
                plan.missing.extend(current.take());
                if !joined_ids.contains(&flight.id) {
                    joined_ids.push(flight.id);
                    plan.joined.push(flight.future.clone());
                }
                continue;
            }
            self.pending.remove(&index);
            match current.as_mut() {
                Some(span) => span.end = index + 1,
                None => current = Some(index..index + 1),
            }
        }
        plan.missing.extend(current);
        plan
    }

    pub fn next_fetch_id(&mut self) -> u64 {
        self.next_fetch_id += 1;
        self.next_fetch_id
    }

    pub fn register(&mut self, id: u64, range: Range<usize>, future: FetchFuture) {
        self.in_flight.push(InFlight { id, range, future });
    }

    /// Apply a finished fetch if it still belongs to this generation and was
    /// not aborted in the meantime.
    pub fn complete(
        &mut self,
        id: u64,
        generation: u64,
        items: Vec<QueryResultItem>,
    ) -> Completion {
        if generation != self.generation {
            return Completion::Stale {
                current: self.generation,
            };
        }
        let Some(pos) = self.in_flight.iter().position(|f| f.id == id) else {
            return Completion::Aborted;
        };
        self.in_flight.swap_remove(pos);
        Completion::Applied(self.insert_rows(items))
    }

    /// Forget a failed fetch so its rows can be retried.
    pub fn fail(&mut self, id: u64) {
        self.in_flight.retain(|f| f.id != id);
    }

    /// Drop queued indices and detach in-flight fetches. Their results will
    /// be discarded on arrival. Returns how many fetches were detached.
    pub fn abort(&mut self) -> usize {
        self.pending.clear();
        self.flush_scheduled = false;
        let aborted = self.in_flight.len();
        self.in_flight.clear();
        aborted
    }

    /// Move the row at `from` to `to`, shifting the rows in between.
    /// Outstanding fetches would land on stale indices, so they are aborted.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from == to {
            return self.items.contains_key(&from);
        }
        let Some(mut moved) = self.items.remove(&from) else {
            return false;
        };
        self.abort();

        let (lo, hi) = (from.min(to), from.max(to));
        let keys: Vec<usize> = self.items.range(lo..=hi).map(|(k, _)| *k).collect();
        let mut shifted: Vec<QueryResultItem> =
            keys.iter().filter_map(|k| self.items.remove(k)).collect();
        for item in &mut shifted {
            if from < to {
                item.index -= 1;
            } else {
                item.index += 1;
            }
        }
        for item in shifted {
            self.items.insert(item.index, item);
        }
        moved.index = to;
        self.items.insert(to, moved);
        true
    }

    fn covering(&self, index: usize) -> Option<&InFlight> {
        self.in_flight.iter().find(|f| f.range.contains(&index))
    }

    fn outside_in_flight(&self, span: Range<usize>) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        let mut current: Option<Range<usize>> = None;
        for index in span {
            if self.covering(index).is_some() {
                out.extend(current.take());
            } else {
                match current.as_mut() {
                    Some(s) => s.end = index + 1,
                    None => current = Some(index..index + 1),
                }
            }
        }
        out.extend(current);
        out
    }
}

/// Merge sorted, unique indices into spans. Two indices share a span when
/// at most `gap` unrequested rows sit between them.
pub(crate) fn coalesce(indices: &[usize], gap: usize) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    for &index in indices {
        match spans.last_mut() {
            Some(last) if index >= last.end && index - last.end <= gap => last.end = index + 1,
            _ => spans.push(index..index + 1),
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::ItemId;
    use futures::FutureExt;

    fn row(index: usize) -> QueryResultItem {
        QueryResultItem {
            id: ItemId::new(format!("row-{index}")),
            index,
            values: Vec::new(),
        }
    }

    fn store(total: usize) -> WindowedItemStore {
        let mut store = WindowedItemStore::new(QuerySnapshot::new("q"));
        store.reset(1, total, QuerySnapshot::new("q"));
        store
    }

    fn done() -> FetchFuture {
        futures::future::ready(Ok(())).boxed().shared()
    }

    #[test]
    fn coalesce_respects_gap() {
        assert_eq!(coalesce(&[0, 1, 2, 5], 0), vec![0..3, 5..6]);
        assert_eq!(coalesce(&[0, 1, 2, 5], 2), vec![0..6]);
        assert_eq!(coalesce(&[], 10), Vec::<Range<usize>>::new());
    }

    #[test]
    fn enqueue_schedules_one_flush() {
        let mut s = store(10);
        assert!(s.enqueue(3));
        assert!(!s.enqueue(4));
        assert!(!s.enqueue(3));
        assert!(!s.enqueue(10), "past the end");
        assert_eq!(s.pending_count(), 2);

        assert_eq!(s.take_pending(0), vec![3..5]);
        assert!(s.enqueue(7), "flush can be scheduled again after drain");
    }

    #[test]
    fn loaded_rows_are_not_queued() {
        let mut s = store(10);
        s.insert_rows(vec![row(2)]);
        assert!(!s.enqueue(2));
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn plan_joins_in_flight_fetches() {
        let mut s = store(20);
        let id = s.next_fetch_id();
        s.register(id, 5..10, done());
        s.insert_rows(vec![row(12)]);

        let plan = s.plan(0..15);
        assert_eq!(plan.missing, vec![0..5, 10..12, 13..15]);
        assert_eq!(plan.joined.len(), 1);
    }

    #[test]
    fn pending_spans_skip_in_flight_rows() {
        let mut s = store(20);
        for i in [0, 9] {
            s.enqueue(i);
        }
        let id = s.next_fetch_id();
        s.register(id, 3..6, done());
        assert_eq!(s.take_pending(10), vec![0..3, 6..10]);
    }

    #[test]
    fn stale_and_aborted_completions_are_discarded() {
        let mut s = store(10);
        let id = s.next_fetch_id();
        s.register(id, 0..2, done());
        assert!(matches!(
            s.complete(id, 0, vec![row(0)]),
            Completion::Stale { current: 1 }
        ));

        assert_eq!(s.abort(), 1);
        assert!(matches!(s.complete(id, 1, vec![row(0)]), Completion::Aborted));
        assert_eq!(s.loaded_count(), 0);

        let id = s.next_fetch_id();
        s.register(id, 0..2, done());
        match s.complete(id, 1, vec![row(0), row(1), row(11)]) {
            Completion::Applied(range) => assert_eq!(range, 0..2),
            _ => panic!("expected rows to apply"),
        }
        assert_eq!(s.in_flight_count(), 0);
    }

    #[test]
    fn reset_drops_previous_generation() {
        let mut s = store(10);
        s.insert_rows(vec![row(0)]);
        s.enqueue(4);
        s.reset(2, 3, QuerySnapshot::new("q").with_text_search("x"));
        assert_eq!(s.generation(), 2);
        assert_eq!(s.loaded_count(), 0);
        assert_eq!(s.pending_count(), 0);
        assert_eq!(s.snapshot().text_search, "x");
    }

    #[test]
    fn move_item_shifts_neighbours() {
        let mut s = store(4);
        s.insert_rows((0..4).map(row).collect());

        assert!(s.move_item(3, 1));
        let order: Vec<&str> = s.loaded().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["row-0", "row-3", "row-1", "row-2"]);
        assert!(s.loaded().all(|i| s.get(i.index).is_some_and(|g| g.id == i.id)));

        assert!(s.move_item(0, 2));
        let order: Vec<&str> = s.loaded().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["row-3", "row-1", "row-0", "row-2"]);
        assert!(!s.move_item(9, 0));
    }
}
