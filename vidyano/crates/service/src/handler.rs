use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail, ensure};
use core_types::Value;
use parking_lot::RwLock;
use protocol::{
    DistinctsRequest, DistinctsResponse, ExecuteQueryRequest, ExecuteQueryResponse, FilterExpr,
    GroupPayload, GroupingInfo, ItemPayload, MatchModifier, Notification, QueryDefinition,
    QuerySnapshot, ReorderRequest, ReorderResponse, SortDirection, SortOption, ValuePayload,
    build_filter_value, parse_distinct_value, text_search_fragment,
};
use query::RemoteDataSource;
use tracing::debug;

use crate::dataset::{Dataset, DatasetRow};
use crate::metrics::{RequestKind, SourceMetrics};

/// Data source that evaluates requests against an in-memory [`Dataset`].
///
/// Filtering, sorting, grouping and paging happen here the way a Vidyano
/// service would do them; accepted reorders change the base row order for
/// every later request.
pub struct MemoryDataSource {
    dataset: Dataset,
    index_of: HashMap<String, usize>,
    order: RwLock<Vec<usize>>,
    latency: Duration,
    metrics: Option<Arc<SourceMetrics>>,
}

impl MemoryDataSource {
    pub fn new(dataset: Dataset) -> Result<Self> {
        dataset.validate()?;
        let index_of = dataset
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.id.clone(), i))
            .collect();
        let order = (0..dataset.rows.len()).collect();
        Ok(Self {
            dataset,
            index_of,
            order: RwLock::new(order),
            latency: Duration::ZERO,
            metrics: None,
        })
    }

    /// Simulated round-trip delay applied before every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SourceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn definition(&self) -> QueryDefinition {
        self.dataset.definition()
    }

    /// Row ids in the current base order.
    pub fn row_order(&self) -> Vec<String> {
        self.order
            .read()
            .iter()
            .map(|&i| self.dataset.rows[i].id.clone())
            .collect()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn record(&self, kind: RequestKind, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record(kind, started.elapsed().as_secs_f64());
        }
    }

    fn check_query(&self, snapshot: &QuerySnapshot) -> Result<()> {
        ensure!(
            snapshot.query_id == self.dataset.id,
            "unknown query {}",
            snapshot.query_id
        );
        Ok(())
    }

    fn row(&self, index: usize) -> &DatasetRow {
        &self.dataset.rows[index]
    }

    fn row_index(&self, id: &str) -> Result<usize> {
        self.index_of
            .get(id)
            .copied()
            .with_context(|| format!("unknown row {id}"))
    }

    /// Rows passing the text search and filter, in base order.
    fn filtered(&self, snapshot: &QuerySnapshot) -> Vec<usize> {
        let needle = snapshot.text_search.trim().to_lowercase();
        self.order
            .read()
            .iter()
            .copied()
            .filter(|&i| {
                let row = self.row(i);
                self.matches_text(row, &needle) && matches_filter(&snapshot.filter, row)
            })
            .collect()
    }

    fn matches_text(&self, row: &DatasetRow, needle: &str) -> bool {
        needle.is_empty()
            || self
                .dataset
                .columns
                .iter()
                .filter(|c| !c.is_hidden)
                .any(|c| row.cell(&c.name).is_some_and(|v| contains_ci(v, needle)))
    }

    fn typed(&self, row: &DatasetRow, column: &str) -> Value {
        let raw = row.cell(column);
        let Some(def) = self.dataset.column(column) else {
            return raw.map_or(Value::Null, |v| Value::Text(v.to_string()));
        };
        Value::from_service_string(raw, def.data_type)
            .unwrap_or_else(|_| Value::Text(raw.unwrap_or_default().to_string()))
    }

    /// Sort keys in priority order. Grouping puts the group column first so
    /// groups come back as contiguous runs.
    fn sort_keys(&self, snapshot: &QuerySnapshot) -> Result<Vec<SortOption>> {
        let mut keys: Vec<SortOption> = snapshot
            .sort_options
            .iter()
            .filter(|o| !o.direction.is_none())
            .cloned()
            .collect();
        for key in &keys {
            ensure!(
                self.dataset.column(&key.column).is_some(),
                "unknown sort column {}",
                key.column
            );
        }
        if let Some(group_by) = &snapshot.group_by {
            ensure!(
                self.dataset.column(group_by).is_some(),
                "unknown group column {group_by}"
            );
            let first = match keys.iter().position(|k| &k.column == group_by) {
                Some(pos) => keys.remove(pos),
                None => SortOption::ascending(group_by.clone()),
            };
            keys.insert(0, first);
        }
        Ok(keys)
    }

    fn sorted(&self, rows: Vec<usize>, keys: &[SortOption]) -> Vec<usize> {
        if keys.is_empty() {
            return rows;
        }
        let mut keyed: Vec<(usize, Vec<Value>)> = rows
            .into_iter()
            .map(|i| {
                let row = self.row(i);
                (i, keys.iter().map(|k| self.typed(row, &k.column)).collect())
            })
            .collect();
        keyed.sort_by(|(_, a), (_, b)| {
            keys.iter()
                .zip(a.iter().zip(b))
                .map(|(key, (a, b))| match key.direction {
                    SortDirection::Descending => b.sort_cmp(a),
                    _ => a.sort_cmp(b),
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        keyed.into_iter().map(|(i, _)| i).collect()
    }

    fn groups(&self, rows: &[usize], group_by: &str) -> GroupingInfo {
        let mut groups: Vec<GroupPayload> = Vec::new();
        for &i in rows {
            let name = self.row(i).cell(group_by).unwrap_or_default();
            match groups.last_mut() {
                Some(last) if last.name == name => last.count += 1,
                _ => groups.push(GroupPayload {
                    name: name.to_string(),
                    count: 1,
                }),
            }
        }
        GroupingInfo {
            group_by: group_by.to_string(),
            groups,
        }
    }

    fn payload(&self, row: &DatasetRow) -> ItemPayload {
        ItemPayload {
            id: row.id.clone(),
            values: self
                .dataset
                .columns
                .iter()
                .map(|c| ValuePayload::new(&c.name, row.cell(&c.name).map(str::to_string)))
                .collect(),
        }
    }

    /// Distinct cell values of `column` across `rows`, sorted by type.
    fn distinct_values(
        &self,
        rows: impl IntoIterator<Item = usize>,
        column: &str,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut values: Vec<(Value, String)> = rows
            .into_iter()
            .filter_map(|i| {
                let row = self.row(i);
                let raw = row.cell(column).unwrap_or_default().to_string();
                seen.insert(raw.clone())
                    .then(|| (self.typed(row, column), raw))
            })
            .collect();
        values.sort_by(|(a, _), (b, _)| a.sort_cmp(b));
        values.into_iter().map(|(_, raw)| raw).collect()
    }
}

impl RemoteDataSource for MemoryDataSource {
    async fn execute_query(&self, request: ExecuteQueryRequest) -> Result<ExecuteQueryResponse> {
        self.simulate_latency().await;
        let started = Instant::now();
        let snapshot = request.snapshot;
        self.check_query(&snapshot)?;

        let keys = self.sort_keys(&snapshot)?;
        let rows = self.sorted(self.filtered(&snapshot), &keys);
        let total = rows.len();
        let skip = (snapshot.skip as usize).min(total);
        let end = skip.saturating_add(snapshot.top as usize).min(total);
        let items: Vec<ItemPayload> = rows[skip..end]
            .iter()
            .map(|&i| self.payload(self.row(i)))
            .collect();

        let served = items.len();
        let mut response = ExecuteQueryResponse::new(request.id, items, total as u64);
        response.has_more = Some(end < total);
        if let Some(group_by) = &snapshot.group_by {
            response.grouping_info = Some(self.groups(&rows, group_by));
        }

        debug!(
            query = %snapshot.query_id,
            skip,
            served,
            total,
            "served query page"
        );
        self.record(RequestKind::Query, started);
        if let Some(metrics) = &self.metrics {
            metrics.record_rows(served);
        }
        Ok(response)
    }

    async fn refresh_distincts(&self, request: DistinctsRequest) -> Result<DistinctsResponse> {
        self.simulate_latency().await;
        let started = Instant::now();
        self.check_query(&request.snapshot)?;
        let column = self
            .dataset
            .column(&request.column)
            .with_context(|| format!("unknown column {}", request.column))?;
        ensure!(
            column.caps.can_list_distincts(),
            "column {} does not list distincts",
            column.name
        );

        // Values in scope of the other columns' filters, split on the
        // search prefix. Without a search everything is matching.
        let in_scope = self.filtered(&request.snapshot);
        let values = self.distinct_values(in_scope, &column.name);
        let (mut matching, mut remaining): (Vec<String>, Vec<String>) =
            match request.search_text.as_deref() {
                Some(search) => {
                    let prefix = search.to_lowercase();
                    values
                        .into_iter()
                        .partition(|v| v.to_lowercase().starts_with(&prefix))
                }
                None => (values, Vec::new()),
            };

        let cap = request.cap as usize;
        let has_more = cap > 0 && matching.len() + remaining.len() > cap;
        if has_more {
            matching.truncate(cap);
            remaining.truncate(cap - matching.len());
        }

        debug!(
            column = %column.name,
            matching = matching.len(),
            remaining = remaining.len(),
            has_more,
            "served distincts"
        );
        self.record(RequestKind::Distincts, started);
        let encode = |values: Vec<String>| -> Vec<String> {
            values
                .iter()
                .map(|v| build_filter_value(v, false))
                .collect()
        };
        Ok(DistinctsResponse {
            id: request.id,
            matching: encode(matching),
            remaining: encode(remaining),
            has_more,
        })
    }

    async fn execute_reorder(&self, request: ReorderRequest) -> Result<ReorderResponse> {
        self.simulate_latency().await;
        let started = Instant::now();
        self.check_query(&request.snapshot)?;

        if !self.dataset.can_reorder {
            self.record(RequestKind::Reorder, started);
            return Ok(ReorderResponse {
                id: request.id,
                accepted: false,
                notification: Some(Notification::error(format!(
                    "{} does not allow reordering",
                    self.dataset.id
                ))),
            });
        }

        let item = self.row_index(&request.item)?;
        let before = request
            .before
            .as_deref()
            .map(|id| self.row_index(id))
            .transpose()?;
        if before == Some(item) {
            bail!("cannot place row {} after itself", request.item);
        }

        {
            let mut order = self.order.write();
            order.retain(|&i| i != item);
            let at = before
                .and_then(|b| order.iter().position(|&i| i == b))
                .map_or(0, |pos| pos + 1);
            order.insert(at, item);
        }

        debug!(item = %request.item, before = ?request.before, "reordered row");
        self.record(RequestKind::Reorder, started);
        Ok(ReorderResponse {
            id: request.id,
            accepted: true,
            notification: None,
        })
    }
}

fn matches_filter(expr: &FilterExpr, row: &DatasetRow) -> bool {
    match expr {
        FilterExpr::Match(m) => {
            let cell = row.cell(&m.column).unwrap_or_default();
            match m.modifier {
                MatchModifier::Exact => cell == parse_distinct_value(&m.value).value,
                MatchModifier::Text => text_search_fragment(&m.value)
                    .is_some_and(|text| contains_ci(cell, &text.to_lowercase())),
            }
        }
        FilterExpr::Not(inner) => !matches_filter(inner, row),
        FilterExpr::And(items) => items.iter().all(|e| matches_filter(e, row)),
        FilterExpr::Or(items) => items.iter().any(|e| matches_filter(e, row)),
    }
}

/// `needle` must already be lowercase.
fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}
