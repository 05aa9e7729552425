//! Change feed operations on the wire.

use crate::value::field_to_json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use tasksync_core::{ChangeOp, FieldValue};

/// Key under which a created object carries its tag set.
const TAGS_KEY: &str = "tags";

/// One operation a client applies to catch up, as sent over the wire.
///
/// ```json
/// {"type":"Create","kind":"task","key":"T1","rev":1,
///  "obj":{"description":"buy milk","done":null,"tags":{"home":true}}}
/// {"type":"Update","kind":"task","key":"T1","rev":2,"mods":{"done":true}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireChange {
    /// The client has never seen this record.
    Create {
        /// Record kind name.
        kind: String,
        /// Record key.
        key: String,
        /// Latest revision of the record.
        rev: u64,
        /// Every field, plus `tags` mapping each active tag to `true`.
        obj: Map<String, Json>,
    },
    /// The client holds an older version of this record.
    Update {
        /// Record kind name.
        kind: String,
        /// Record key.
        key: String,
        /// Latest revision of the record.
        rev: u64,
        /// Changed fields and `tags.<label>` flags.
        mods: Map<String, Json>,
    },
}

impl WireChange {
    /// Returns the revision carried by the operation.
    #[must_use]
    pub fn rev(&self) -> u64 {
        match self {
            WireChange::Create { rev, .. } | WireChange::Update { rev, .. } => *rev,
        }
    }
}

fn encode_fields(fields: &BTreeMap<String, FieldValue>) -> Map<String, Json> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), field_to_json(value)))
        .collect()
}

impl From<&ChangeOp> for WireChange {
    fn from(op: &ChangeOp) -> Self {
        match op {
            ChangeOp::Create { kind, key, rev, obj } => {
                let mut encoded = encode_fields(&obj.fields);
                let tags: Map<String, Json> = obj
                    .tags
                    .iter()
                    .map(|(tag, active)| (tag.clone(), Json::Bool(*active)))
                    .collect();
                encoded.insert(TAGS_KEY.to_string(), Json::Object(tags));
                WireChange::Create {
                    kind: kind.as_str().to_string(),
                    key: key.as_str().to_string(),
                    rev: rev.as_u64(),
                    obj: encoded,
                }
            }
            ChangeOp::Update { kind, key, rev, mods } => WireChange::Update {
                kind: kind.as_str().to_string(),
                key: key.as_str().to_string(),
                rev: rev.as_u64(),
                mods: encode_fields(mods),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasksync_core::{CreatedObject, RecordKey, RecordKind, Revision};

    #[test]
    fn create_serializes_with_tag_map() {
        let op = ChangeOp::Create {
            kind: RecordKind::Task,
            key: RecordKey::new("T1").unwrap(),
            rev: Revision::new(1),
            obj: CreatedObject {
                fields: BTreeMap::from([
                    ("description".to_string(), FieldValue::text("buy milk")),
                    ("done".to_string(), FieldValue::Null),
                ]),
                tags: BTreeMap::from([("home".to_string(), true)]),
            },
        };
        let wire = serde_json::to_value(WireChange::from(&op)).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "Create",
                "kind": "task",
                "key": "T1",
                "rev": 1,
                "obj": {"description": "buy milk", "done": null, "tags": {"home": true}},
            })
        );
    }

    #[test]
    fn update_carries_only_mods() {
        let op = ChangeOp::Update {
            kind: RecordKind::Task,
            key: RecordKey::new("T1").unwrap(),
            rev: Revision::new(2),
            mods: BTreeMap::from([
                ("done".to_string(), FieldValue::Bool(true)),
                ("tags.home".to_string(), FieldValue::Bool(false)),
            ]),
        };
        let wire = WireChange::from(&op);
        assert_eq!(wire.rev(), 2);
        let text = serde_json::to_string(&wire).unwrap();
        assert_eq!(
            text,
            r#"{"type":"Update","kind":"task","key":"T1","rev":2,"mods":{"done":true,"tags.home":false}}"#
        );
        let back: WireChange = serde_json::from_str(&text).unwrap();
        assert_eq!(back, wire);
    }
}
