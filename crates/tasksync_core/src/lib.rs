//! # tasksync core
//!
//! Revisioned record storage and incremental change computation for tasksync.
//!
//! This crate provides:
//! - A per-user SQLite store where every mutable field carries its own revision
//! - The revision allocator (one logical clock per user store)
//! - Field-granular last-writer-wins create/update
//! - The change feed: the Create/Update operations a client needs to catch up
//!   from a baseline revision
//!
//! ## Key Invariants
//!
//! - One mutation consumes exactly one revision, stamped on every field and
//!   tag it touches
//! - Revision allocation is serialized per store
//! - A field write is applied only if the writer's baseline is not stale for
//!   that field
//! - Computing changes never mutates the store
//!
//! ## Example
//!
//! ```rust,ignore
//! use tasksync_core::{Attributes, FieldValue, RecordKey, RecordKind, RecordStore, Revision};
//!
//! let store = RecordStore::new(handle);
//! let key = RecordKey::new("T1")?;
//! store
//!     .create(
//!         RecordKind::Task,
//!         key.clone(),
//!         Attributes::new()
//!             .with_field("description", FieldValue::text("buy milk"))
//!             .with_tag("home", true),
//!     )
//!     .await?;
//!
//! let changes = store.changes(Revision::ZERO).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code must not panic on storage input.
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod change_feed;
mod config;
mod dir;
mod error;
mod handle;
mod record;
mod revision;
mod schema;
mod store;
mod types;

pub use change_feed::{change_for, changes_since, ChangeOp, CreatedObject};
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use handle::StorageHandle;
pub use record::{Attributes, FieldState, Modifications, Record, TagState, TAG_PREFIX};
pub use revision::RevisionAllocator;
pub use schema::{FieldSpec, FieldType, FieldValue};
pub use store::{MutationObserver, RecordStore, WriteResult};
pub use types::{RecordKey, RecordKind, Revision, UserId};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
