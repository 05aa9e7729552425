//! The record store: field-revisioned create/update/read and change queries.
//!
//! Every mutation runs inside one SQLite transaction under the store's
//! mutation queue, consumes exactly one revision, and stamps that revision on
//! every field and tag membership it writes. A failed mutation rolls back
//! all of its writes and gives its revision back.

use crate::change_feed::{changes_since, ChangeOp};
use crate::error::{CoreError, CoreResult};
use crate::handle::StorageHandle;
use crate::record::{Attributes, FieldState, Modifications, Record, TagState, TAG_PREFIX};
use crate::revision::RevisionAllocator;
use crate::schema::FieldValue;
use crate::types::{RecordKey, RecordKind, Revision};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Receives a callback after every committed mutation.
pub trait MutationObserver: Send + Sync {
    /// Called once per committed mutation with the revision it consumed.
    fn on_mutation(&self, revision: Revision);
}

/// Outcome of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// Revision consumed, or `None` if nothing was written.
    pub revision: Option<Revision>,
    /// Names written (fields, and `tags.<label>` for memberships).
    pub applied: Vec<String>,
    /// Names dropped because the caller's baseline was stale for them.
    pub dropped: Vec<String>,
    /// Record state after the call.
    pub record: Record,
}

/// Access to one user's records through a shared storage handle.
///
/// Cloning is cheap; clones share the handle and the observer.
#[derive(Clone)]
pub struct RecordStore {
    handle: Arc<StorageHandle>,
    observer: Option<Arc<dyn MutationObserver>>,
}

impl RecordStore {
    /// Creates a store over an open handle.
    #[must_use]
    pub fn new(handle: Arc<StorageHandle>) -> Self {
        Self {
            handle,
            observer: None,
        }
    }

    /// Attaches an observer notified after each committed mutation.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the underlying storage handle.
    #[must_use]
    pub fn handle(&self) -> &Arc<StorageHandle> {
        &self.handle
    }

    /// Runs blocking storage work on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&StorageHandle) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || f(&handle))
            .await
            .map_err(|e| CoreError::Join {
                message: e.to_string(),
            })?
    }

    /// Runs one mutation under the store's mutation queue.
    ///
    /// The mutation and its observer callback run on a spawned task, so a
    /// caller that stops waiting neither releases the queue early nor loses
    /// the notification of a mutation that commits anyway.
    async fn mutate<F>(&self, write: F) -> CoreResult<WriteResult>
    where
        F: FnOnce(&mut Connection, &RevisionAllocator) -> CoreResult<WriteResult>
            + Send
            + 'static,
    {
        let store = self.clone();
        tokio::spawn(async move {
            let _queue = store.handle.mutation_queue().lock().await;
            let result = store
                .blocking(move |handle| {
                    handle.with_conn(|conn| write(conn, handle.revisions()))
                })
                .await?;
            store.notify(&result);
            Ok::<_, CoreError>(result)
        })
        .await
        .map_err(|e| CoreError::Join {
            message: e.to_string(),
        })?
    }

    fn notify(&self, result: &WriteResult) {
        if let (Some(rev), Some(observer)) = (result.revision, &self.observer) {
            observer.on_mutation(rev);
        }
    }

    /// Returns the store's current revision (the next baseline for a
    /// client that has applied every change).
    pub async fn current_revision(&self) -> CoreResult<Revision> {
        self.blocking(|handle| handle.with_conn(|conn| handle.revisions().current(conn)))
            .await
    }

    /// Creates a record, stamping every field with one new revision.
    ///
    /// If the key already exists the supplied attributes overwrite the
    /// current values (the latest writer wins) and the creation revision is
    /// kept.
    pub async fn create(
        &self,
        kind: RecordKind,
        key: RecordKey,
        attributes: Attributes,
    ) -> CoreResult<WriteResult> {
        attributes.validate(kind)?;

        let result = self
            .mutate(move |conn, revisions| apply_create(conn, revisions, kind, &key, &attributes))
            .await?;

        debug!(
            user = %self.handle.user(),
            %kind,
            key = %result.record.key,
            rev = ?result.revision.map(Revision::as_u64),
            "create"
        );
        Ok(result)
    }

    /// Applies modifications whose fields were not changed after `baseline`.
    ///
    /// Fields (and tag memberships) with a persisted revision above the
    /// baseline are dropped silently. If nothing qualifies no revision is
    /// consumed.
    pub async fn update(
        &self,
        kind: RecordKind,
        key: RecordKey,
        modifications: Modifications,
        baseline: Revision,
    ) -> CoreResult<WriteResult> {
        let (fields, tags) = modifications.split(kind)?;

        let result = self
            .mutate(move |conn, revisions| {
                apply_update(conn, revisions, kind, &key, fields, tags, baseline)
            })
            .await?;

        debug!(
            user = %self.handle.user(),
            %kind,
            key = %result.record.key,
            rev = ?result.revision.map(Revision::as_u64),
            applied = result.applied.len(),
            dropped = result.dropped.len(),
            "update"
        );
        Ok(result)
    }

    /// Reads a record with its field revisions and tag memberships.
    pub async fn read(&self, kind: RecordKind, key: RecordKey) -> CoreResult<Option<Record>> {
        self.blocking(move |handle| handle.with_conn(|conn| read_record(conn, kind, &key)))
            .await
    }

    /// Reads a record, failing with `RecordNotFound` if absent.
    pub async fn get(&self, kind: RecordKind, key: RecordKey) -> CoreResult<Record> {
        let name = key.as_str().to_string();
        self.read(kind, key)
            .await?
            .ok_or_else(|| CoreError::not_found(kind, name))
    }

    /// Computes the operations a client at `baseline` needs to catch up.
    ///
    /// Records are visited kind by kind in `RecordKind::ALL` order and by key
    /// within a kind, all inside one read transaction. Calling this twice
    /// without an intervening mutation yields identical output.
    pub async fn changes(&self, baseline: Revision) -> CoreResult<Vec<ChangeOp>> {
        self.blocking(move |handle| handle.with_conn(|conn| collect_changes(conn, baseline)))
            .await
    }

    /// Computes the changes after `baseline` together with the current
    /// revision, both from the same snapshot.
    ///
    /// Every returned op has a revision at or below the returned revision,
    /// so the client can use it as its next baseline without missing a
    /// concurrent write.
    pub async fn pull(&self, baseline: Revision) -> CoreResult<(Revision, Vec<ChangeOp>)> {
        self.blocking(move |handle| {
            handle.with_conn(|conn| {
                let current = handle.revisions().current(conn)?;
                let ops = collect_changes(conn, baseline)?;
                Ok((current, ops))
            })
        })
        .await
    }

    /// Lists records of `kind` whose fields equal every entry of `filter`.
    pub async fn list(
        &self,
        kind: RecordKind,
        filter: BTreeMap<String, FieldValue>,
    ) -> CoreResult<Vec<Record>> {
        for name in filter.keys() {
            kind.require_field(name)?;
        }
        self.blocking(move |handle| {
            handle.with_conn(|conn| {
                let tx = conn.transaction()?;
                let mut records = Vec::new();
                for key in all_keys(&tx, kind)? {
                    if let Some(record) = read_record(&tx, kind, &key)? {
                        let matches = filter.iter().all(|(name, expected)| {
                            record.value(name).unwrap_or(&FieldValue::Null) == expected
                        });
                        if matches {
                            records.push(record);
                        }
                    }
                }
                Ok(records)
            })
        })
        .await
    }

    /// Returns every tag label active on at least one record, sorted.
    pub async fn tags(&self) -> CoreResult<Vec<String>> {
        self.blocking(|handle| {
            handle.with_conn(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT DISTINCT tag FROM tag_membership WHERE active = 1 ORDER BY tag",
                )?;
                let tags = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(tags)
            })
        })
        .await
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("handle", &self.handle)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

// --- Blocking storage operations ---

fn stored_key(raw: String) -> CoreResult<RecordKey> {
    RecordKey::new(raw)
}

pub(crate) fn read_record(
    conn: &Connection,
    kind: RecordKind,
    key: &RecordKey,
) -> CoreResult<Option<Record>> {
    let created_rev: Option<Revision> = conn
        .query_row(
            "SELECT created_rev FROM record WHERE kind = ?1 AND key = ?2",
            params![kind.as_str(), key.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(created_rev) = created_rev else {
        return Ok(None);
    };

    let mut fields = BTreeMap::new();
    let mut stmt =
        conn.prepare_cached("SELECT name, value, rev FROM field WHERE kind = ?1 AND key = ?2")?;
    let mut rows = stmt.query(params![kind.as_str(), key.as_str()])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let Some(spec) = kind.field(&name) else {
            debug!(%kind, %key, field = %name, "skipping field outside schema");
            continue;
        };
        let value = FieldValue::from_stored(spec.ty, row.get::<_, Value>(1)?)?;
        fields.insert(
            name,
            FieldState {
                value,
                rev: row.get(2)?,
            },
        );
    }

    let mut tags = BTreeMap::new();
    let mut stmt = conn.prepare_cached(
        "SELECT tag, active, rev FROM tag_membership WHERE kind = ?1 AND key = ?2",
    )?;
    let mut rows = stmt.query(params![kind.as_str(), key.as_str()])?;
    while let Some(row) = rows.next()? {
        tags.insert(
            row.get::<_, String>(0)?,
            TagState {
                active: row.get(1)?,
                rev: row.get(2)?,
            },
        );
    }

    Ok(Some(Record {
        kind,
        key: key.clone(),
        created_rev,
        fields,
        tags,
    }))
}

fn collect_changes(conn: &mut Connection, baseline: Revision) -> CoreResult<Vec<ChangeOp>> {
    let tx = conn.transaction()?;
    let mut records = Vec::new();
    for kind in RecordKind::ALL {
        for key in changed_keys(&tx, kind, baseline)? {
            records.extend(read_record(&tx, kind, &key)?);
        }
    }
    Ok(changes_since(&records, baseline))
}

fn all_keys(conn: &Connection, kind: RecordKind) -> CoreResult<Vec<RecordKey>> {
    let mut stmt = conn.prepare_cached("SELECT key FROM record WHERE kind = ?1 ORDER BY key")?;
    let raw = stmt
        .query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(stored_key).collect()
}

fn changed_keys(
    conn: &Connection,
    kind: RecordKind,
    baseline: Revision,
) -> CoreResult<Vec<RecordKey>> {
    let mut stmt = conn.prepare_cached(
        "SELECT r.key FROM record r WHERE r.kind = ?1 AND ( \
             r.created_rev > ?2 \
             OR EXISTS (SELECT 1 FROM field f \
                        WHERE f.kind = r.kind AND f.key = r.key AND f.rev > ?2) \
             OR EXISTS (SELECT 1 FROM tag_membership t \
                        WHERE t.kind = r.kind AND t.key = r.key AND t.rev > ?2)) \
         ORDER BY r.key",
    )?;
    let raw = stmt
        .query_map(params![kind.as_str(), baseline], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(stored_key).collect()
}

fn upsert_field(
    tx: &Transaction<'_>,
    kind: RecordKind,
    key: &RecordKey,
    name: &str,
    value: &FieldValue,
    rev: Revision,
) -> CoreResult<()> {
    tx.prepare_cached(
        "INSERT INTO field(kind, key, name, value, rev) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(kind, key, name) DO UPDATE SET value = excluded.value, rev = excluded.rev",
    )?
    .execute(params![kind.as_str(), key.as_str(), name, value, rev])?;
    Ok(())
}

fn upsert_tag(
    tx: &Transaction<'_>,
    kind: RecordKind,
    key: &RecordKey,
    tag: &str,
    active: bool,
    rev: Revision,
) -> CoreResult<()> {
    tx.prepare_cached(
        "INSERT INTO tag_membership(kind, key, tag, active, rev) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(kind, key, tag) DO UPDATE SET active = excluded.active, rev = excluded.rev",
    )?
    .execute(params![kind.as_str(), key.as_str(), tag, active, rev])?;
    Ok(())
}

/// Runs `write` and commits, giving `rev` back to the allocator on failure.
fn commit_stamped<T>(
    tx: Transaction<'_>,
    revisions: &RevisionAllocator,
    rev: Revision,
    write: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
) -> CoreResult<T> {
    let outcome = write(&tx).and_then(|out| {
        tx.commit()?;
        Ok(out)
    });
    if outcome.is_err() {
        revisions.rollback(rev);
    }
    outcome
}

fn reread(tx: &Transaction<'_>, kind: RecordKind, key: &RecordKey) -> CoreResult<Record> {
    read_record(tx, kind, key)?.ok_or_else(|| CoreError::not_found(kind, key.as_str()))
}

fn apply_create(
    conn: &mut Connection,
    revisions: &RevisionAllocator,
    kind: RecordKind,
    key: &RecordKey,
    attributes: &Attributes,
) -> CoreResult<WriteResult> {
    let tx = conn.transaction()?;

    let existing = read_record(&tx, kind, key)?;
    if let Some(record) = &existing {
        if attributes.is_empty() {
            return Ok(WriteResult {
                revision: None,
                applied: Vec::new(),
                dropped: Vec::new(),
                record: record.clone(),
            });
        }
    }

    let rev = revisions.next(&tx)?;
    let mut applied = Vec::new();
    let record = commit_stamped(tx, revisions, rev, |tx| {
        if existing.is_none() {
            tx.execute(
                "INSERT INTO record(kind, key, created_rev) VALUES (?1, ?2, ?3)",
                params![kind.as_str(), key.as_str(), rev],
            )?;
            // Every schema field is stamped so the record has one creation revision.
            for spec in kind.fields() {
                let value = attributes
                    .fields
                    .get(spec.name)
                    .unwrap_or(&FieldValue::Null);
                upsert_field(tx, kind, key, spec.name, value, rev)?;
                applied.push(spec.name.to_string());
            }
        } else {
            for (name, value) in &attributes.fields {
                upsert_field(tx, kind, key, name, value, rev)?;
                applied.push(name.clone());
            }
        }
        for (tag, active) in &attributes.tags {
            upsert_tag(tx, kind, key, tag, *active, rev)?;
            applied.push(format!("{TAG_PREFIX}{tag}"));
        }
        reread(tx, kind, key)
    })?;

    Ok(WriteResult {
        revision: Some(rev),
        applied,
        dropped: Vec::new(),
        record,
    })
}

fn apply_update(
    conn: &mut Connection,
    revisions: &RevisionAllocator,
    kind: RecordKind,
    key: &RecordKey,
    fields: BTreeMap<String, FieldValue>,
    tags: BTreeMap<String, bool>,
    baseline: Revision,
) -> CoreResult<WriteResult> {
    let tx = conn.transaction()?;
    let current = read_record(&tx, kind, key)?.ok_or_else(|| CoreError::not_found(kind, key.as_str()))?;

    let mut applied = Vec::new();
    let mut dropped = Vec::new();

    let fields: Vec<(String, FieldValue)> = fields
        .into_iter()
        .filter(|(name, _)| {
            let fresh = current.field_rev(name).unwrap_or(Revision::ZERO) <= baseline;
            if fresh {
                applied.push(name.clone());
            } else {
                dropped.push(name.clone());
            }
            fresh
        })
        .collect();
    let tags: Vec<(String, bool)> = tags
        .into_iter()
        .filter(|(tag, _)| {
            let rev = current.tags.get(tag).map_or(Revision::ZERO, |t| t.rev);
            let fresh = rev <= baseline;
            let name = format!("{TAG_PREFIX}{tag}");
            if fresh {
                applied.push(name);
            } else {
                dropped.push(name);
            }
            fresh
        })
        .collect();

    if applied.is_empty() {
        return Ok(WriteResult {
            revision: None,
            applied,
            dropped,
            record: current,
        });
    }

    let rev = revisions.next(&tx)?;
    let record = commit_stamped(tx, revisions, rev, |tx| {
        for (name, value) in &fields {
            upsert_field(tx, kind, key, name, value, rev)?;
        }
        for (tag, active) in &tags {
            upsert_tag(tx, kind, key, tag, *active, rev)?;
        }
        reread(tx, kind, key)
    })?;

    Ok(WriteResult {
        revision: Some(rev),
        applied,
        dropped,
        record,
    })
}
