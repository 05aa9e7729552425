//! Revision allocation.

use crate::error::CoreResult;
use crate::types::Revision;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::debug;

const MAX_REVISION_SQL: &str = "SELECT MAX(rev) FROM ( \
     SELECT MAX(created_rev) AS rev FROM record \
     UNION ALL SELECT MAX(rev) FROM field \
     UNION ALL SELECT MAX(rev) FROM tag_membership)";

/// The logical clock of one user store.
///
/// The counter is recovered lazily from the highest persisted revision and
/// then advanced by one per mutation. It lives exactly as long as the
/// storage handle that owns it, so every reopen recomputes it.
///
/// Callers must serialize `next` through the store's mutation queue; the
/// internal lock only protects the cached value.
#[derive(Debug, Default)]
pub struct RevisionAllocator {
    cached: Mutex<Option<Revision>>,
}

impl RevisionAllocator {
    /// Creates an allocator with no cached value.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current revision, scanning the store on first use.
    ///
    /// An empty store starts at zero. A failed scan caches nothing.
    pub fn current(&self, conn: &Connection) -> CoreResult<Revision> {
        let mut cached = self.cached.lock();
        if let Some(rev) = *cached {
            return Ok(rev);
        }
        let max: Option<Revision> = conn.query_row(MAX_REVISION_SQL, [], |row| row.get(0))?;
        let rev = max.unwrap_or(Revision::ZERO);
        debug!(rev = rev.as_u64(), "recovered store revision");
        *cached = Some(rev);
        Ok(rev)
    }

    /// Advances the counter and returns the new revision.
    pub fn next(&self, conn: &Connection) -> CoreResult<Revision> {
        let current = self.current(conn)?;
        let next = current.next();
        *self.cached.lock() = Some(next);
        Ok(next)
    }

    /// Gives back a revision whose mutation failed to commit.
    ///
    /// Only the most recently allocated revision can be returned.
    pub fn rollback(&self, rev: Revision) {
        let mut cached = self.cached.lock();
        if *cached == Some(rev) {
            *cached = Some(Revision::new(rev.as_u64().saturating_sub(1)));
        }
    }

    /// Returns the cached revision without touching storage.
    #[must_use]
    pub fn cached(&self) -> Option<Revision> {
        *self.cached.lock()
    }

    /// Forgets the cached value.
    pub fn reset(&self) {
        *self.cached.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::install_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        install_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn empty_store_starts_at_zero() {
        let conn = conn();
        let alloc = RevisionAllocator::new();
        assert_eq!(alloc.cached(), None);
        assert_eq!(alloc.current(&conn).unwrap(), Revision::ZERO);
        assert_eq!(alloc.next(&conn).unwrap(), Revision::new(1));
        assert_eq!(alloc.next(&conn).unwrap(), Revision::new(2));
    }

    #[test]
    fn recovers_from_persisted_revisions() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO record(kind, key, created_rev) VALUES ('task', 'T1', 3); \
             INSERT INTO field(kind, key, name, value, rev) VALUES ('task', 'T1', 'done', 1, 7); \
             INSERT INTO tag_membership(kind, key, tag, active, rev) VALUES ('task', 'T1', 'x', 1, 9);",
        )
        .unwrap();

        let alloc = RevisionAllocator::new();
        assert_eq!(alloc.current(&conn).unwrap(), Revision::new(9));
        assert_eq!(alloc.next(&conn).unwrap(), Revision::new(10));
    }

    #[test]
    fn failed_scan_caches_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        let alloc = RevisionAllocator::new();
        assert!(alloc.current(&conn).is_err());
        assert_eq!(alloc.cached(), None);
    }

    #[test]
    fn rollback_only_latest() {
        let conn = conn();
        let alloc = RevisionAllocator::new();
        let r1 = alloc.next(&conn).unwrap();
        let r2 = alloc.next(&conn).unwrap();
        alloc.rollback(r1);
        assert_eq!(alloc.cached(), Some(r2));
        alloc.rollback(r2);
        assert_eq!(alloc.cached(), Some(r1));
    }
}
