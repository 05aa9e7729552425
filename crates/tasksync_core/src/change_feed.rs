//! Change feed computation.
//!
//! Maps the current state of a record and a client baseline to the single
//! operation the client must apply. This is a pure function of its inputs;
//! the store only decides which records to feed it.
//!
//! - A record created after the baseline becomes a `Create` carrying the full
//!   field set and the active tags.
//! - A record the client has seen becomes an `Update` carrying only the
//!   fields and tag memberships whose revision exceeds the baseline.
//! - A record with nothing newer than the baseline produces no operation.

use crate::record::{Record, TAG_PREFIX};
use crate::schema::FieldValue;
use crate::types::{RecordKey, RecordKind, Revision};
use std::collections::BTreeMap;

/// Full state of a newly seen record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedObject {
    /// Every field's current value.
    pub fields: BTreeMap<String, FieldValue>,
    /// Active tags, each mapped to `true`.
    pub tags: BTreeMap<String, bool>,
}

/// An operation a client applies to catch up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    /// The client has never seen this record.
    Create {
        /// Record kind.
        kind: RecordKind,
        /// Record key.
        key: RecordKey,
        /// Latest revision of the record.
        rev: Revision,
        /// Full current state.
        obj: CreatedObject,
    },
    /// The client has an older version of this record.
    Update {
        /// Record kind.
        kind: RecordKind,
        /// Record key.
        key: RecordKey,
        /// Latest revision of the record.
        rev: Revision,
        /// Changed fields, plus `tags.<label>` entries for changed memberships.
        mods: BTreeMap<String, FieldValue>,
    },
}

impl ChangeOp {
    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            ChangeOp::Create { kind, .. } | ChangeOp::Update { kind, .. } => *kind,
        }
    }

    /// Returns the record key.
    #[must_use]
    pub fn key(&self) -> &RecordKey {
        match self {
            ChangeOp::Create { key, .. } | ChangeOp::Update { key, .. } => key,
        }
    }

    /// Returns the revision the operation brings the record to.
    #[must_use]
    pub fn rev(&self) -> Revision {
        match self {
            ChangeOp::Create { rev, .. } | ChangeOp::Update { rev, .. } => *rev,
        }
    }

    /// Returns true for `Create` operations.
    #[must_use]
    pub fn is_create(&self) -> bool {
        matches!(self, ChangeOp::Create { .. })
    }
}

/// Computes the operation that brings a client at `baseline` up to date
/// with `record`, or `None` if the client already has everything.
#[must_use]
pub fn change_for(record: &Record, baseline: Revision) -> Option<ChangeOp> {
    let rev = record.latest_rev();
    if rev <= baseline {
        return None;
    }

    if baseline < record.created_rev {
        let fields = record
            .fields
            .iter()
            .map(|(name, state)| (name.clone(), state.value.clone()))
            .collect();
        let tags = record
            .active_tags()
            .map(|tag| (tag.to_string(), true))
            .collect();
        return Some(ChangeOp::Create {
            kind: record.kind,
            key: record.key.clone(),
            rev,
            obj: CreatedObject { fields, tags },
        });
    }

    let mut mods: BTreeMap<String, FieldValue> = record
        .fields
        .iter()
        .filter(|(_, state)| state.rev > baseline)
        .map(|(name, state)| (name.clone(), state.value.clone()))
        .collect();
    for (tag, state) in &record.tags {
        if state.rev > baseline {
            mods.insert(format!("{TAG_PREFIX}{tag}"), FieldValue::Bool(state.active));
        }
    }

    Some(ChangeOp::Update {
        kind: record.kind,
        key: record.key.clone(),
        rev,
        mods,
    })
}

/// Computes the operations for a sequence of records, preserving input order.
pub fn changes_since<'a, I>(records: I, baseline: Revision) -> Vec<ChangeOp>
where
    I: IntoIterator<Item = &'a Record>,
{
    records
        .into_iter()
        .filter_map(|record| change_for(record, baseline))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldState, TagState};

    fn field(value: FieldValue, rev: u64) -> FieldState {
        FieldState {
            value,
            rev: Revision::new(rev),
        }
    }

    fn task(created: u64) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert("description".into(), field(FieldValue::text("buy milk"), created));
        fields.insert("done".into(), field(FieldValue::Bool(false), created));
        let mut tags = BTreeMap::new();
        tags.insert(
            "home".into(),
            TagState {
                active: true,
                rev: Revision::new(created),
            },
        );
        Record {
            kind: RecordKind::Task,
            key: RecordKey::new("T1").unwrap(),
            created_rev: Revision::new(created),
            fields,
            tags,
        }
    }

    #[test]
    fn unseen_record_is_create() {
        let record = task(1);
        let op = change_for(&record, Revision::ZERO).unwrap();
        match op {
            ChangeOp::Create { rev, obj, .. } => {
                assert_eq!(rev, Revision::new(1));
                assert_eq!(obj.fields.get("description"), Some(&FieldValue::text("buy milk")));
                assert_eq!(obj.tags.get("home"), Some(&true));
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn seen_record_is_field_delta() {
        let mut record = task(1);
        record.fields.get_mut("done").unwrap().value = FieldValue::Bool(true);
        record.fields.get_mut("done").unwrap().rev = Revision::new(2);

        let op = change_for(&record, Revision::new(1)).unwrap();
        match op {
            ChangeOp::Update { rev, mods, .. } => {
                assert_eq!(rev, Revision::new(2));
                assert_eq!(mods.len(), 1);
                assert_eq!(mods.get("done"), Some(&FieldValue::Bool(true)));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn deactivated_tag_reported_as_false() {
        let mut record = task(1);
        record.tags.insert(
            "urgent".into(),
            TagState {
                active: false,
                rev: Revision::new(3),
            },
        );

        let op = change_for(&record, Revision::new(2)).unwrap();
        let ChangeOp::Update { mods, .. } = op else {
            panic!("expected update");
        };
        assert_eq!(mods.get("tags.urgent"), Some(&FieldValue::Bool(false)));

        // A client that never saw the record gets only active tags.
        let ChangeOp::Create { obj, .. } = change_for(&record, Revision::ZERO).unwrap() else {
            panic!("expected create");
        };
        assert!(!obj.tags.contains_key("urgent"));
    }

    #[test]
    fn up_to_date_client_gets_nothing() {
        let record = task(4);
        assert!(change_for(&record, Revision::new(4)).is_none());
        assert!(change_for(&record, Revision::new(9)).is_none());
    }

    #[test]
    fn changes_since_keeps_order() {
        let mut second = task(2);
        second.key = RecordKey::new("T2").unwrap();
        let records = vec![task(1), second];
        let ops = changes_since(&records, Revision::new(1));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].key().as_str(), "T2");
        assert!(ops[0].is_create());
    }
}
