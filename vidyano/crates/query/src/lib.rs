//! Client-side synchronization core for Vidyano queries.
//!
//! A [`Query`] mirrors a server-side result set that is too large to load at
//! once. Rows are fetched lazily in coalesced pages, column filters are
//! composed from selected distinct values, and selection works across rows
//! that have never been loaded. The transport is abstracted behind
//! [`RemoteDataSource`].

pub mod column;
pub mod error;
pub mod events;
pub mod filter;
pub mod item;
pub mod options;
mod query;
mod selection;
pub mod source;
mod store;

#[cfg(test)]
mod testing;

pub use column::{Column, DistinctsCache};
pub use error::{QueryError, Result, ValidationError};
pub use events::QueryEvent;
pub use item::{ItemValue, QueryResultItem, QueryResultItemGroup};
pub use options::QueryOptions;
pub use query::{Query, QueryStatus, SearchOptions, SearchOutcome};
pub use selection::SelectAllState;
pub use source::RemoteDataSource;
