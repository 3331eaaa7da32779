//! Scripted data source used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use core_types::{ColumnCaps, DataType};
use parking_lot::Mutex;
use protocol::{
    ColumnDefinition, DistinctsRequest, DistinctsResponse, ExecuteQueryRequest,
    ExecuteQueryResponse, GroupPayload, GroupingInfo, ItemPayload, QueryDefinition,
    QuerySnapshot, ReorderRequest, ReorderResponse, ValuePayload,
};

use crate::source::RemoteDataSource;

/// Answers every request from a synthetic row set of `rows` items.
/// Delays and totals can be scripted per text search.
pub(crate) struct ScriptedSource {
    rows: usize,
    totals: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: AtomicBool,
    reject_reorder: AtomicBool,
    pub queries: Mutex<Vec<QuerySnapshot>>,
    pub distincts: Mutex<Vec<DistinctsRequest>>,
    pub reorders: Mutex<Vec<ReorderRequest>>,
}

impl ScriptedSource {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            totals: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            reject_reorder: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
            distincts: Mutex::new(Vec::new()),
            reorders: Mutex::new(Vec::new()),
        }
    }

    /// Delay applied to requests whose text search (or distinct search text)
    /// equals `key`. The empty key covers plain requests.
    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().insert(key.to_string(), delay);
    }

    pub fn total_for(&self, text_search: &str, total: usize) {
        self.totals.lock().insert(text_search.to_string(), total);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_reject_reorder(&self, reject: bool) {
        self.reject_reorder.store(reject, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    /// `(skip, top)` of every request so far.
    pub fn windows(&self) -> Vec<(u32, u32)> {
        self.queries.lock().iter().map(|s| (s.skip, s.top)).collect()
    }

    fn delay_for(&self, key: &str) -> Duration {
        self.delays.lock().get(key).copied().unwrap_or_default()
    }
}

impl RemoteDataSource for ScriptedSource {
    async fn execute_query(
        &self,
        request: ExecuteQueryRequest,
    ) -> anyhow::Result<ExecuteQueryResponse> {
        let snapshot = request.snapshot;
        self.queries.lock().push(snapshot.clone());

        let delay = self.delay_for(&snapshot.text_search);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("service unavailable");
        }

        let total = self
            .totals
            .lock()
            .get(&snapshot.text_search)
            .copied()
            .unwrap_or(self.rows);
        let skip = snapshot.skip as usize;
        let end = skip.saturating_add(snapshot.top as usize).min(total);
        let items = (skip..end).map(row).collect();

        let mut response = ExecuteQueryResponse::new(request.id, items, total as u64);
        response.has_more = Some(end < total);
        if let Some(group_by) = snapshot.group_by {
            let half = (total / 2) as u64;
            response.grouping_info = Some(GroupingInfo {
                group_by,
                groups: vec![
                    GroupPayload {
                        name: "first".into(),
                        count: half,
                    },
                    GroupPayload {
                        name: "second".into(),
                        count: total as u64 - half,
                    },
                ],
            });
        }
        Ok(response)
    }

    async fn refresh_distincts(
        &self,
        request: DistinctsRequest,
    ) -> anyhow::Result<DistinctsResponse> {
        self.distincts.lock().push(request.clone());
        let key = request.search_text.clone().unwrap_or_default();
        let delay = self.delay_for(&key);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("service unavailable");
        }
        let label = if key.is_empty() { "all".to_string() } else { key };
        Ok(DistinctsResponse {
            id: request.id,
            matching: vec![format!("|{label}")],
            remaining: vec!["|other".to_string()],
            has_more: false,
        })
    }

    async fn execute_reorder(&self, request: ReorderRequest) -> anyhow::Result<ReorderResponse> {
        let id = request.id;
        self.reorders.lock().push(request);
        Ok(ReorderResponse {
            id,
            accepted: !self.reject_reorder.load(Ordering::SeqCst),
            notification: None,
        })
    }
}

pub(crate) fn row(index: usize) -> ItemPayload {
    ItemPayload {
        id: format!("row-{index}"),
        values: vec![
            ValuePayload::new("Name", Some(format!("Name {index}"))),
            ValuePayload::new("Age", Some((20 + index % 50).to_string())),
        ],
    }
}

/// Two-column definition: `Name` sorts and filters, `Age` does everything,
/// `Notes` does nothing.
pub(crate) fn definition() -> QueryDefinition {
    let all = ColumnCaps::CAN_FILTER
        | ColumnCaps::CAN_SORT
        | ColumnCaps::CAN_GROUP_BY
        | ColumnCaps::CAN_LIST_DISTINCTS;
    QueryDefinition::new(
        "people",
        vec![
            ColumnDefinition::new("Age", DataType::Int32, all).with_offset(2),
            ColumnDefinition::new(
                "Name",
                DataType::String,
                ColumnCaps::CAN_FILTER | ColumnCaps::CAN_SORT | ColumnCaps::CAN_LIST_DISTINCTS,
            )
            .with_offset(1),
            ColumnDefinition::new("Notes", DataType::String, ColumnCaps::empty()).with_offset(3),
        ],
    )
}
