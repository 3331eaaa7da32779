//! Composition of per-column distinct selections into one request filter.
//!
//! Values of one column are OR'd, an inversed column is wrapped in NOT, and
//! columns are AND'd together. The result is flattened so equivalent
//! selections always produce the same tree.

use protocol::{FilterExpr, MatchExpr};

use crate::column::Column;

/// Predicate contributed by a single column, if it has an active filter.
pub fn column_predicate(column: &Column) -> Option<FilterExpr> {
    if !column.has_active_filter() {
        return None;
    }
    let leaves = column
        .selected_distincts
        .iter()
        .map(|value| FilterExpr::Match(MatchExpr::from_encoded(&column.name, value)))
        .collect();
    let any = flatten(FilterExpr::Or(leaves));
    Some(if column.selected_distincts_inversed {
        FilterExpr::Not(Box::new(any))
    } else {
        any
    })
}

/// AND of every column predicate. An empty conjunction matches all rows.
pub fn compose<'a>(columns: impl IntoIterator<Item = &'a Column>) -> FilterExpr {
    let predicates: Vec<_> = columns.into_iter().filter_map(column_predicate).collect();
    if predicates.is_empty() {
        return FilterExpr::default();
    }
    flatten(FilterExpr::And(predicates))
}

/// Like [`compose`] but leaves out one column, as used when listing that
/// column's distincts.
pub fn compose_excluding<'a>(
    columns: impl IntoIterator<Item = &'a Column>,
    excluded: &str,
) -> FilterExpr {
    compose(columns.into_iter().filter(|c| c.name != excluded))
}

/// Flatten nested ANDs and ORs and collapse single-child groups.
/// `And([And([A, B]), C])` -> `And([A, B, C])`.
pub fn flatten(expr: FilterExpr) -> FilterExpr {
    match expr {
        FilterExpr::And(subs) => {
            let mut flat = Vec::with_capacity(subs.len());
            for sub in subs {
                match flatten(sub) {
                    FilterExpr::And(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            collapse(flat, FilterExpr::And)
        }
        FilterExpr::Or(subs) => {
            let mut flat = Vec::with_capacity(subs.len());
            for sub in subs {
                match flatten(sub) {
                    FilterExpr::Or(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            collapse(flat, FilterExpr::Or)
        }
        FilterExpr::Not(inner) => FilterExpr::Not(Box::new(flatten(*inner))),
        leaf => leaf,
    }
}

fn collapse(mut flat: Vec<FilterExpr>, wrap: fn(Vec<FilterExpr>) -> FilterExpr) -> FilterExpr {
    if flat.len() == 1 {
        if let Some(only) = flat.pop() {
            return only;
        }
    }
    wrap(flat)
}
