//! Field schema for each record kind.
//!
//! Every kind has a fixed set of mutable fields. Values are stored in a
//! single untyped column, so decoding is driven by the schema rather than
//! by SQLite's storage class.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordKind;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use std::fmt;

/// Type of a mutable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Free text.
    Text,
    /// Boolean flag, stored as 0/1.
    Bool,
    /// Unix epoch milliseconds.
    Timestamp,
    /// Key of another record of the given kind.
    Reference(RecordKind),
}

/// A named, typed field of a record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name as used on the wire and in storage.
    pub name: &'static str,
    /// Field type.
    pub ty: FieldType,
}

const fn spec(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec { name, ty }
}

const TASK_FIELDS: &[FieldSpec] = &[
    spec("description", FieldType::Text),
    spec("done", FieldType::Bool),
    spec("deleted", FieldType::Bool),
    spec("doneUntil", FieldType::Timestamp),
    spec("createdAt", FieldType::Timestamp),
    spec("updatedAt", FieldType::Timestamp),
];

const SPRINT_FIELDS: &[FieldSpec] = &[
    spec("createdAt", FieldType::Timestamp),
    spec("dueDate", FieldType::Timestamp),
];

const TODO_FIELDS: &[FieldSpec] = &[spec("task", FieldType::Reference(RecordKind::Task))];

impl RecordKind {
    /// Returns the mutable fields of this kind.
    #[must_use]
    pub const fn fields(self) -> &'static [FieldSpec] {
        match self {
            RecordKind::Task => TASK_FIELDS,
            RecordKind::Sprint => SPRINT_FIELDS,
            RecordKind::Todo => TODO_FIELDS,
        }
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Looks up a field by name, failing with `InvalidInput` if unknown.
    pub fn require_field(self, name: &str) -> CoreResult<&'static FieldSpec> {
        self.field(name).ok_or_else(|| {
            CoreError::invalid_input(format!("unknown field {name:?} for kind {self}"))
        })
    }
}

/// The value of a mutable field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldValue {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer (timestamps are epoch milliseconds).
    Integer(i64),
    /// Text (also used for references).
    Text(String),
}

impl FieldValue {
    /// Convenience constructor for text values.
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Returns true if the value counts as "set" for a flag.
    ///
    /// Null, false, zero and the empty string are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Bool(b) => *b,
            FieldValue::Integer(i) => *i != 0,
            FieldValue::Text(s) => !s.is_empty(),
        }
    }

    /// Returns true if the value may be stored in a field of type `ty`.
    #[must_use]
    pub fn conforms_to(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (FieldValue::Null, _)
                | (FieldValue::Text(_), FieldType::Text | FieldType::Reference(_))
                | (FieldValue::Bool(_), FieldType::Bool)
                | (FieldValue::Integer(_), FieldType::Timestamp)
        )
    }

    /// Checks the value against a field spec.
    pub fn check(&self, kind: RecordKind, field: &FieldSpec) -> CoreResult<()> {
        if self.conforms_to(field.ty) {
            Ok(())
        } else {
            Err(CoreError::invalid_input(format!(
                "value {self} does not fit field {kind}.{} ({:?})",
                field.name, field.ty
            )))
        }
    }

    /// Decodes a stored value for a field of type `ty`.
    pub(crate) fn from_stored(ty: FieldType, raw: Value) -> CoreResult<Self> {
        let value = match (ty, raw) {
            (_, Value::Null) => FieldValue::Null,
            (FieldType::Bool, Value::Integer(i)) => FieldValue::Bool(i != 0),
            (FieldType::Timestamp, Value::Integer(i)) => FieldValue::Integer(i),
            (FieldType::Text | FieldType::Reference(_), Value::Text(s)) => FieldValue::Text(s),
            (ty, other) => {
                return Err(CoreError::invalid_input(format!(
                    "stored value {other:?} does not decode as {ty:?}"
                )))
            }
        };
        Ok(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}
