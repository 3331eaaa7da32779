use std::future::Future;
use std::sync::Arc;

use protocol::{
    DistinctsRequest, DistinctsResponse, ExecuteQueryRequest, ExecuteQueryResponse,
    ReorderRequest, ReorderResponse,
};

/// The remote end of a query. Implementations own the transport; the query
/// core only sees requests and responses.
pub trait RemoteDataSource: Send + Sync + 'static {
    /// Run a search or fetch a page. The snapshot's `skip`/`top` select the window.
    fn execute_query(
        &self,
        request: ExecuteQueryRequest,
    ) -> impl Future<Output = anyhow::Result<ExecuteQueryResponse>> + Send;

    fn refresh_distincts(
        &self,
        request: DistinctsRequest,
    ) -> impl Future<Output = anyhow::Result<DistinctsResponse>> + Send;

    fn execute_reorder(
        &self,
        request: ReorderRequest,
    ) -> impl Future<Output = anyhow::Result<ReorderResponse>> + Send;
}

impl<T: RemoteDataSource> RemoteDataSource for Arc<T> {
    fn execute_query(
        &self,
        request: ExecuteQueryRequest,
    ) -> impl Future<Output = anyhow::Result<ExecuteQueryResponse>> + Send {
        (**self).execute_query(request)
    }

    fn refresh_distincts(
        &self,
        request: DistinctsRequest,
    ) -> impl Future<Output = anyhow::Result<DistinctsResponse>> + Send {
        (**self).refresh_distincts(request)
    }

    fn execute_reorder(
        &self,
        request: ReorderRequest,
    ) -> impl Future<Output = anyhow::Result<ReorderResponse>> + Send {
        (**self).execute_reorder(request)
    }
}
