//! # tasksync server
//!
//! Per-user storage lifecycle and change notification for tasksync.
//!
//! This crate provides:
//! - `ConnectionManager`: one shared storage handle per user, opened once
//!   for concurrent first callers and closed after a grace period once the
//!   last session leaves
//! - `SubscriptionBus` and `Session`: two-tier debounced change notification
//! - `ScheduledTask`: the cancellable, resettable timer both tiers use
//! - `RequestHandler` and `SyncServer`: request-scoped record operations and
//!   the pull endpoint
//! - The `Authenticator` seam
//!
//! # Notification flow
//!
//! 1. A create or update commits and reports its revision to the bus
//! 2. The bus waits `store_debounce`, then notifies every session once
//! 3. Each session waits `session_debounce`, then calls its listener with
//!    the latest revision
//! 4. The client pulls the changes since its last baseline

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod connection;
mod error;
mod handler;
mod scheduler;
mod server;
mod subscription;

pub use auth::{AuthError, Authenticator, StaticAuthenticator};
pub use config::ServerConfig;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStats, SyncSession};
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use scheduler::ScheduledTask;
pub use server::SyncServer;
pub use subscription::{Listener, ListenerError, Session, SessionId, SubscriptionBus};
