//! Main sync server.

use crate::auth::{Authenticator, StaticAuthenticator};
use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, SyncSession};
use crate::error::ServerResult;
use crate::handler::RequestHandler;
use crate::subscription::Listener;
use std::sync::Arc;
use tasksync_core::UserId;
use tasksync_protocol::{
    CreateRequest, GetRequest, ListRequest, ListResponse, PullRequest, PullResponse,
    RecordResponse, TagsResponse, UpdateRequest,
};
use tracing::info;

/// The sync server.
///
/// Resolves callers to users, keeps one shared store open per active user
/// and notifies subscribed sessions when a user's store changes.
///
/// # Example
///
/// ```rust,ignore
/// use tasksync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::new("./dbs"));
/// let user = server.login("alice@example.com", "hunter2")?;
///
/// // Long-lived sync connection: notified after the store changes.
/// let session = server.subscribe(&user, listener).await?;
///
/// // Request-scoped calls from the HTTP layer.
/// let pulled = server.handle_pull(&user, PullRequest::new(Revision::ZERO)).await?;
///
/// server.unsubscribe(session)?;
/// ```
pub struct SyncServer {
    connections: Arc<ConnectionManager>,
    handler: RequestHandler,
    auth: Arc<dyn Authenticator>,
}

impl SyncServer {
    /// Creates a server with an empty in-memory authenticator.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_authenticator(config, Arc::new(StaticAuthenticator::new()))
    }

    /// Creates a server using `auth` to resolve logins.
    pub fn with_authenticator(config: ServerConfig, auth: Arc<dyn Authenticator>) -> Self {
        info!(data_dir = %config.data_dir.display(), "sync server created");
        let connections = ConnectionManager::new(config);
        let handler = RequestHandler::new(Arc::clone(&connections));
        Self {
            connections,
            handler,
            auth,
        }
    }

    /// Returns the connection manager.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Resolves credentials to a user. Authentication errors pass through
    /// unchanged.
    pub fn login(&self, login: &str, password: &str) -> ServerResult<UserId> {
        Ok(self.auth.authenticate(login, password)?)
    }

    /// Opens a long-lived sync session whose listener is called after the
    /// user's store changes.
    pub async fn subscribe(&self, user: &UserId, listener: Listener) -> ServerResult<SyncSession> {
        self.connections.acquire(user, Some(listener)).await
    }

    /// Ends a sync session.
    pub fn unsubscribe(&self, session: SyncSession) -> ServerResult<()> {
        self.connections.release(session)
    }

    /// Handles a create request.
    pub async fn handle_create(
        &self,
        user: &UserId,
        request: CreateRequest,
    ) -> ServerResult<RecordResponse> {
        self.handler.handle_create(user, request).await
    }

    /// Handles an update request.
    pub async fn handle_update(
        &self,
        user: &UserId,
        request: UpdateRequest,
    ) -> ServerResult<RecordResponse> {
        self.handler.handle_update(user, request).await
    }

    /// Handles a get request.
    pub async fn handle_get(
        &self,
        user: &UserId,
        request: GetRequest,
    ) -> ServerResult<RecordResponse> {
        self.handler.handle_get(user, request).await
    }

    /// Handles a list request.
    pub async fn handle_list(
        &self,
        user: &UserId,
        request: ListRequest,
    ) -> ServerResult<ListResponse> {
        self.handler.handle_list(user, request).await
    }

    /// Returns the active tag labels.
    pub async fn handle_tags(&self, user: &UserId) -> ServerResult<TagsResponse> {
        self.handler.handle_tags(user).await
    }

    /// Handles a pull request.
    pub async fn handle_pull(
        &self,
        user: &UserId,
        request: PullRequest,
    ) -> ServerResult<PullResponse> {
        self.handler.handle_pull(user, request).await
    }

    /// Closes every open store.
    pub fn shutdown(&self) -> usize {
        let closed = self.connections.close_all();
        info!(closed, "sync server shut down");
        closed
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("connections", &self.connections)
            .finish()
    }
}
