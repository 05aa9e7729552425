//! The storage handle: one open SQLite connection per user store.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::revision::RevisionAllocator;
use crate::types::UserId;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS record (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    created_rev INTEGER NOT NULL,
    PRIMARY KEY (kind, key)
);
CREATE TABLE IF NOT EXISTS field (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    name TEXT NOT NULL,
    value,
    rev INTEGER NOT NULL,
    PRIMARY KEY (kind, key, name)
);
CREATE INDEX IF NOT EXISTS field_rev ON field(rev);
CREATE TABLE IF NOT EXISTS tag_membership (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    tag TEXT NOT NULL,
    active INTEGER NOT NULL,
    rev INTEGER NOT NULL,
    PRIMARY KEY (kind, key, tag)
);
CREATE INDEX IF NOT EXISTS tag_membership_rev ON tag_membership(rev);
";

pub(crate) fn install_schema(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

struct OpenStore {
    conn: Connection,
    // Dropped after the connection so the lock outlives every write.
    _dir: Option<StoreDir>,
}

/// The single live handle to one user's durable store.
///
/// The handle owns the connection, the revision allocator and the mutation
/// queue. It is shared by reference count across sync sessions; closing it
/// makes every outstanding `RecordStore` fail with `StoreClosed`.
pub struct StorageHandle {
    user: UserId,
    path: Option<PathBuf>,
    store: Mutex<Option<OpenStore>>,
    revisions: RevisionAllocator,
    mutations: tokio::sync::Mutex<()>,
}

impl StorageHandle {
    /// Opens (creating if allowed) the store of `user` under `data_dir`.
    ///
    /// This performs blocking file I/O and schema creation; async callers
    /// should run it on the blocking pool.
    pub fn open(data_dir: &Path, user: &UserId, config: &StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(&data_dir.join(user.as_str()), config.create_if_missing)?;
        let db_path = dir.db_path();
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(config.busy_timeout)?;
        install_schema(&conn)?;
        info!(user = %user, path = %db_path.display(), "opened user store");

        Ok(Self {
            user: user.clone(),
            path: Some(db_path),
            store: Mutex::new(Some(OpenStore {
                conn,
                _dir: Some(dir),
            })),
            revisions: RevisionAllocator::new(),
            mutations: tokio::sync::Mutex::new(()),
        })
    }

    /// Opens a throwaway in-memory store.
    pub fn open_in_memory(user: &UserId) -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        install_schema(&conn)?;
        Ok(Self {
            user: user.clone(),
            path: None,
            store: Mutex::new(Some(OpenStore { conn, _dir: None })),
            revisions: RevisionAllocator::new(),
            mutations: tokio::sync::Mutex::new(()),
        })
    }

    /// Returns the owning user.
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Returns the SQLite file path, or `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true until `close` is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.store.lock().is_some()
    }

    /// Physically closes the store and releases the directory lock.
    ///
    /// Returns false if the handle was already closed.
    pub fn close(&self) -> bool {
        let Some(open) = self.store.lock().take() else {
            return false;
        };
        if let Err((_, err)) = open.conn.close() {
            // The connection is dropped either way.
            debug!(user = %self.user, error = %err, "sqlite close reported an error");
        }
        self.revisions.reset();
        info!(user = %self.user, "closed user store");
        true
    }

    /// Returns the revision allocator of this store.
    #[must_use]
    pub fn revisions(&self) -> &RevisionAllocator {
        &self.revisions
    }

    pub(crate) fn mutation_queue(&self) -> &tokio::sync::Mutex<()> {
        &self.mutations
    }

    /// Runs `f` against the open connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut guard = self.store.lock();
        let open = guard.as_mut().ok_or(CoreError::StoreClosed)?;
        f(&mut open.conn)
    }
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("user", &self.user)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn open_creates_layout() {
        let temp = tempdir().unwrap();
        let handle = StorageHandle::open(temp.path(), &user("alice"), &StoreConfig::default())
            .unwrap();
        assert!(handle.is_open());
        assert_eq!(
            handle.path().unwrap(),
            temp.path().join("alice").join("db.sqlite")
        );
        assert!(temp.path().join("alice").join("LOCK").exists());
    }

    #[test]
    fn close_rejects_further_use() {
        let handle = StorageHandle::open_in_memory(&user("bob")).unwrap();
        assert!(handle.close());
        assert!(!handle.close());
        let result = handle.with_conn(|_| Ok(()));
        assert!(matches!(result, Err(CoreError::StoreClosed)));
    }

    #[test]
    fn close_releases_lock_for_reopen() {
        let temp = tempdir().unwrap();
        let config = StoreConfig::default();
        let first = StorageHandle::open(temp.path(), &user("carol"), &config).unwrap();
        assert!(matches!(
            StorageHandle::open(temp.path(), &user("carol"), &config),
            Err(CoreError::StoreLocked)
        ));
        first.close();
        assert!(StorageHandle::open(temp.path(), &user("carol"), &config).is_ok());
    }

    #[test]
    fn missing_store_without_create() {
        let temp = tempdir().unwrap();
        let config = StoreConfig::new().create_if_missing(false);
        assert!(StorageHandle::open(temp.path(), &user("dave"), &config).is_err());
    }
}
