//! Request handlers for the record and sync endpoints.
//!
//! Each request acquires a listener-less session for its duration and
//! releases it afterwards, so bursts of requests share one open store and
//! the drain grace period absorbs the churn between them.

use crate::connection::ConnectionManager;
use crate::error::{ServerError, ServerResult};
use std::future::Future;
use std::sync::Arc;
use tasksync_core::{RecordStore, UserId};
use tasksync_protocol::{
    CreateRequest, GetRequest, ListRequest, ListResponse, PullRequest, PullResponse,
    RecordResponse, TagsResponse, UpdateRequest,
};
use tracing::{debug, warn};

/// Handler for per-user requests.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    connections: Arc<ConnectionManager>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Runs `f` against `user`'s store inside a request-scoped session.
    async fn with_store<T, F, Fut>(&self, user: &UserId, f: F) -> ServerResult<T>
    where
        F: FnOnce(RecordStore) -> Fut,
        Fut: Future<Output = ServerResult<T>>,
    {
        let session = self.connections.acquire(user, None).await?;
        let result = f(session.store().clone()).await;
        if let Err(e) = self.connections.release(session) {
            warn!(user = %user, error = %e, "failed to release request session");
        }
        result
    }

    /// Handles a create request.
    pub async fn handle_create(
        &self,
        user: &UserId,
        request: CreateRequest,
    ) -> ServerResult<RecordResponse> {
        let (kind, key, attributes) = request.decode()?;
        self.with_store(user, |store| async move {
            let result = store.create(kind, key, attributes).await?;
            Ok::<_, ServerError>(RecordResponse::from(&result))
        })
        .await
    }

    /// Handles an update request. Stale fields are reported in `dropped`.
    pub async fn handle_update(
        &self,
        user: &UserId,
        request: UpdateRequest,
    ) -> ServerResult<RecordResponse> {
        let (kind, key, modifications, baseline) = request.decode()?;
        self.with_store(user, |store| async move {
            let result = store.update(kind, key, modifications, baseline).await?;
            Ok::<_, ServerError>(RecordResponse::from(&result))
        })
        .await
    }

    /// Handles a get request.
    pub async fn handle_get(
        &self,
        user: &UserId,
        request: GetRequest,
    ) -> ServerResult<RecordResponse> {
        let (kind, key) = request.decode()?;
        self.with_store(user, |store| async move {
            let record = store.get(kind, key).await?;
            Ok::<_, ServerError>(RecordResponse::from(&record))
        })
        .await
    }

    /// Handles a list request.
    pub async fn handle_list(
        &self,
        user: &UserId,
        request: ListRequest,
    ) -> ServerResult<ListResponse> {
        let (kind, filter) = request.decode()?;
        self.with_store(user, |store| async move {
            let records = store.list(kind, filter).await?;
            Ok::<_, ServerError>(ListResponse::new(&records))
        })
        .await
    }

    /// Returns the active tag labels.
    pub async fn handle_tags(&self, user: &UserId) -> ServerResult<TagsResponse> {
        self.with_store(user, |store| async move {
            Ok::<_, ServerError>(TagsResponse {
                tags: store.tags().await?,
            })
        })
        .await
    }

    /// Handles a pull request.
    pub async fn handle_pull(
        &self,
        user: &UserId,
        request: PullRequest,
    ) -> ServerResult<PullResponse> {
        let baseline = request.baseline();
        self.with_store(user, |store| async move {
            let (revision, changes) = store.pull(baseline).await?;
            debug!(
                user = %store.handle().user(),
                baseline = baseline.as_u64(),
                rev = revision.as_u64(),
                changes = changes.len(),
                "pull"
            );
            Ok::<_, ServerError>(PullResponse::new(revision, &changes))
        })
        .await
    }
}
