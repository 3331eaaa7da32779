//! Host-side support for the query core: an in-memory data source that
//! answers query, distinct and reorder requests from a JSON dataset, plus
//! tracing bootstrap and request metrics.

pub mod dataset;
pub mod handler;
mod logging;
pub mod metrics;

pub use dataset::{Dataset, DatasetRow};
pub use handler::MemoryDataSource;
pub use logging::{init_tracing, init_tracing_with_config};
pub use metrics::SourceMetrics;
