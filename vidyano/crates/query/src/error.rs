use std::sync::Arc;

use core_types::ValueParseError;
use thiserror::Error;

/// Rejected before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
    #[error("column {0:?} cannot be sorted")]
    NotSortable(String),
    #[error("column {0:?} cannot be filtered")]
    NotFilterable(String),
    #[error("column {0:?} cannot be grouped by")]
    NotGroupable(String),
    #[error("column {0:?} does not list distinct values")]
    NoDistincts(String),
    #[error("query does not allow reordering")]
    ReorderNotAllowed,
    #[error("select all is not available for this query")]
    SelectAllUnavailable,
    #[error("index {index} is outside 0..{total}")]
    IndexOutOfRange { index: usize, total: usize },
    #[error("item at index {0} is not loaded")]
    ItemNotLoaded(usize),
    #[error("selecting {requested} items exceeds the maximum of {max}")]
    MaxSelectedExceeded { requested: u64, max: u32 },
}

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The data source failed. Shared so one failure can reach every
    /// caller awaiting the same coalesced fetch.
    #[error("transport failure: {0:#}")]
    Transport(Arc<anyhow::Error>),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Value(#[from] ValueParseError),
    /// A newer search replaced the result set this request belonged to.
    #[error("result superseded by generation {current}")]
    Superseded { current: u64 },
    #[error("fetch aborted")]
    Aborted,
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl QueryError {
    pub(crate) fn transport(err: anyhow::Error) -> Self {
        Self::Transport(Arc::new(err))
    }

    /// Stale or aborted results are expected during fast interaction.
    pub const fn is_discard(&self) -> bool {
        matches!(self, Self::Superseded { .. } | Self::Aborted)
    }
}

pub type Result<T, E = QueryError> = std::result::Result<T, E>;
