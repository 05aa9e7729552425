//! Conversion between JSON values and typed field values.

use crate::error::{ProtocolError, ProtocolResult};
use crate::timestamp::parse_timestamp;
use serde_json::Value as Json;
use tasksync_core::{FieldType, FieldValue, RecordKind};

/// Decodes the JSON value of field `name` of `kind`.
///
/// Timestamp fields accept epoch milliseconds or RFC 3339 strings; null
/// clears any field.
pub fn field_from_json(kind: RecordKind, name: &str, value: &Json) -> ProtocolResult<FieldValue> {
    let spec = kind
        .field(name)
        .ok_or_else(|| ProtocolError::invalid_request(format!("{kind} has no field {name:?}")))?;
    match (spec.ty, value) {
        (_, Json::Null) => Ok(FieldValue::Null),
        (FieldType::Bool, Json::Bool(b)) => Ok(FieldValue::Bool(*b)),
        (FieldType::Timestamp, v) => parse_timestamp(v).map(FieldValue::Integer),
        (FieldType::Text | FieldType::Reference(_), Json::String(s)) => {
            Ok(FieldValue::Text(s.clone()))
        }
        (ty, other) => Err(ProtocolError::invalid_request(format!(
            "field {name:?} of {kind} expects {ty:?}, got {other}"
        ))),
    }
}

/// Interprets a tag flag. Any JSON value is accepted; its truthiness decides.
#[must_use]
pub fn flag_from_json(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

/// Encodes a field value. Timestamps leave as epoch milliseconds.
#[must_use]
pub fn field_to_json(value: &FieldValue) -> Json {
    match value {
        FieldValue::Null => Json::Null,
        FieldValue::Bool(b) => Json::Bool(*b),
        FieldValue::Integer(i) => Json::from(*i),
        FieldValue::Text(s) => Json::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_by_field_type() {
        assert_eq!(
            field_from_json(RecordKind::Task, "done", &json!(true)).unwrap(),
            FieldValue::Bool(true)
        );
        assert_eq!(
            field_from_json(RecordKind::Task, "doneUntil", &json!("1970-01-01T00:00:02Z"))
                .unwrap(),
            FieldValue::Integer(2_000)
        );
        assert_eq!(
            field_from_json(RecordKind::Todo, "task", &json!("T1")).unwrap(),
            FieldValue::text("T1")
        );
        assert_eq!(
            field_from_json(RecordKind::Sprint, "dueDate", &json!(null)).unwrap(),
            FieldValue::Null
        );
    }

    #[test]
    fn rejects_mismatches() {
        assert!(field_from_json(RecordKind::Task, "done", &json!("yes")).is_err());
        assert!(field_from_json(RecordKind::Task, "colour", &json!("red")).is_err());
        assert!(field_from_json(RecordKind::Task, "description", &json!(3)).is_err());
    }

    #[test]
    fn flag_truthiness() {
        assert!(flag_from_json(&json!(true)));
        assert!(flag_from_json(&json!(1)));
        assert!(flag_from_json(&json!("x")));
        assert!(!flag_from_json(&json!(0)));
        assert!(!flag_from_json(&json!("")));
        assert!(!flag_from_json(&json!(null)));
    }

    #[test]
    fn encodes_values() {
        assert_eq!(field_to_json(&FieldValue::Integer(5)), json!(5));
        assert_eq!(field_to_json(&FieldValue::text("a")), json!("a"));
        assert_eq!(field_to_json(&FieldValue::Null), json!(null));
    }
}
