//! Core type definitions for tasksync.

use crate::error::{CoreError, CoreResult};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use std::str::FromStr;

/// A logical revision of one user's store.
///
/// Revisions are allocated one per mutation and never reused. Zero means
/// "nothing seen yet" and is never stamped on a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub u64);

impl Revision {
    /// The baseline of a client that has never synced.
    pub const ZERO: Revision = Revision(0);

    /// Creates a new revision.
    #[must_use]
    pub const fn new(rev: u64) -> Self {
        Self(rev)
    }

    /// Returns the raw revision value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next revision.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev:{}", self.0)
    }
}

impl ToSql for Revision {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let raw = i64::try_from(self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(raw))
    }
}

impl FromSql for Revision {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        u64::try_from(raw)
            .map(Revision)
            .map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

/// Identity of the user owning a store.
///
/// The id becomes a directory name, so it is restricted to a safe subset of
/// ASCII.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(String);

impl UserId {
    /// Maximum length of a user id in bytes.
    pub const MAX_LEN: usize = 128;

    /// Validates and wraps a user id.
    pub fn parse(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return Err(CoreError::invalid_input(format!(
                "user id must be 1..={} bytes",
                Self::MAX_LEN
            )));
        }
        if id.starts_with('.') {
            return Err(CoreError::invalid_input("user id must not start with '.'"));
        }
        let valid = id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if !valid {
            return Err(CoreError::invalid_input(format!(
                "user id contains unsupported characters: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable, caller-generated key of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    /// Wraps a record key. Keys must be non-empty.
    pub fn new(key: impl Into<String>) -> CoreResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(CoreError::invalid_input("record key must not be empty"));
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kinds of record a user store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    /// A task.
    Task,
    /// A sprint grouping tasks.
    Sprint,
    /// A todo item attached to a task.
    Todo,
}

impl RecordKind {
    /// Every kind, in change feed order.
    pub const ALL: [RecordKind; 3] = [RecordKind::Task, RecordKind::Sprint, RecordKind::Todo];

    /// Returns the storage and wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Task => "task",
            RecordKind::Sprint => "sprint",
            RecordKind::Todo => "todo",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" | "tasks" => Ok(RecordKind::Task),
            "sprint" | "sprints" => Ok(RecordKind::Sprint),
            "todo" | "todos" => Ok(RecordKind::Todo),
            other => Err(CoreError::invalid_input(format!(
                "unknown record kind: {other}"
            ))),
        }
    }
}
