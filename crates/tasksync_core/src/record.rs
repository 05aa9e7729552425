//! Records, their per-field revisions, and mutation inputs.

use crate::error::{CoreError, CoreResult};
use crate::schema::FieldValue;
use crate::types::{RecordKey, RecordKind, Revision};
use std::collections::BTreeMap;

/// Prefix marking a modification key as a tag membership flag.
pub const TAG_PREFIX: &str = "tags.";

/// Current value of a field together with the revision that last wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldState {
    /// Current value.
    pub value: FieldValue,
    /// Revision at which the field last changed.
    pub rev: Revision,
}

/// A tag membership. Deactivated tags are kept so clients see the removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagState {
    /// Whether the tag currently applies.
    pub active: bool,
    /// Revision at which the membership last changed.
    pub rev: Revision,
}

/// A materialized record: every field with its revision, plus tag memberships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record kind.
    pub kind: RecordKind,
    /// Record key.
    pub key: RecordKey,
    /// Revision every field was stamped with when the record was created.
    pub created_rev: Revision,
    /// Field states by field name.
    pub fields: BTreeMap<String, FieldState>,
    /// Tag memberships by tag label.
    pub tags: BTreeMap<String, TagState>,
}

impl Record {
    /// Returns the highest revision across all fields and tag memberships.
    #[must_use]
    pub fn latest_rev(&self) -> Revision {
        self.fields
            .values()
            .map(|f| f.rev)
            .chain(self.tags.values().map(|t| t.rev))
            .fold(self.created_rev, Revision::max)
    }

    /// Returns the current value of a field, if stored.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).map(|f| &f.value)
    }

    /// Returns the revision at which a field last changed.
    #[must_use]
    pub fn field_rev(&self, name: &str) -> Option<Revision> {
        self.fields.get(name).map(|f| f.rev)
    }

    /// Returns the labels of all active tags, in order.
    pub fn active_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(|(_, t)| t.active)
            .map(|(name, _)| name.as_str())
    }

    /// Returns true if the tag is currently active on this record.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.get(tag).is_some_and(|t| t.active)
    }
}

fn check_tag(tag: &str) -> CoreResult<()> {
    if tag.is_empty() {
        return Err(CoreError::invalid_input("tag label must not be empty"));
    }
    Ok(())
}

/// Field values and tag flags for creating a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Field values by name. Absent fields are stored as null.
    pub fields: BTreeMap<String, FieldValue>,
    /// Tag memberships to set.
    pub tags: BTreeMap<String, bool>,
}

impl Attributes {
    /// Creates an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a tag membership.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>, active: bool) -> Self {
        self.tags.insert(tag.into(), active);
        self
    }

    /// Checks every name and value against the schema of `kind`.
    pub fn validate(&self, kind: RecordKind) -> CoreResult<()> {
        for (name, value) in &self.fields {
            let spec = kind.require_field(name)?;
            value.check(kind, spec)?;
        }
        for tag in self.tags.keys() {
            check_tag(tag)?;
        }
        Ok(())
    }

    /// Returns true if nothing would be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.tags.is_empty()
    }
}

/// Named modifications for an update.
///
/// Keys are field names, or `tags.<label>` for tag memberships, in which
/// case the value's truthiness decides whether the tag is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifications {
    entries: BTreeMap<String, FieldValue>,
}

impl Modifications {
    /// Creates an empty modification set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one modification.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    /// Inserts one modification in place.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.entries.insert(name.into(), value);
    }

    /// Returns true if there are no modifications.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of modifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Separates field writes from tag flags, validating against `kind`.
    pub fn split(
        &self,
        kind: RecordKind,
    ) -> CoreResult<(BTreeMap<String, FieldValue>, BTreeMap<String, bool>)> {
        let mut fields = BTreeMap::new();
        let mut tags = BTreeMap::new();
        for (name, value) in &self.entries {
            if let Some(tag) = name.strip_prefix(TAG_PREFIX) {
                check_tag(tag)?;
                tags.insert(tag.to_string(), value.is_truthy());
            } else {
                let spec = kind.require_field(name)?;
                value.check(kind, spec)?;
                fields.insert(name.clone(), value.clone());
            }
        }
        Ok((fields, tags))
    }
}

impl FromIterator<(String, FieldValue)> for Modifications {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut fields = BTreeMap::new();
        fields.insert(
            "description".to_string(),
            FieldState {
                value: FieldValue::text("buy milk"),
                rev: Revision::new(1),
            },
        );
        fields.insert(
            "done".to_string(),
            FieldState {
                value: FieldValue::Bool(true),
                rev: Revision::new(4),
            },
        );
        let mut tags = BTreeMap::new();
        tags.insert(
            "home".to_string(),
            TagState {
                active: true,
                rev: Revision::new(1),
            },
        );
        tags.insert(
            "urgent".to_string(),
            TagState {
                active: false,
                rev: Revision::new(6),
            },
        );
        Record {
            kind: RecordKind::Task,
            key: RecordKey::new("T1").unwrap(),
            created_rev: Revision::new(1),
            fields,
            tags,
        }
    }

    #[test]
    fn latest_revision_includes_tags() {
        assert_eq!(sample().latest_rev(), Revision::new(6));
    }

    #[test]
    fn active_tags_skip_deactivated() {
        let record = sample();
        assert_eq!(record.active_tags().collect::<Vec<_>>(), ["home"]);
        assert!(!record.has_tag("urgent"));
    }

    #[test]
    fn modifications_route_tags() {
        let mods = Modifications::new()
            .set("done", true)
            .set("tags.urgent", true)
            .set("tags.home", FieldValue::Null);
        let (fields, tags) = mods.split(RecordKind::Task).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(tags.get("urgent"), Some(&true));
        assert_eq!(tags.get("home"), Some(&false));
    }

    #[test]
    fn modifications_reject_unknown_fields() {
        let mods = Modifications::new().set("colour", "red");
        assert!(mods.split(RecordKind::Task).is_err());
        let mods = Modifications::new().set("tags.", true);
        assert!(mods.split(RecordKind::Task).is_err());
    }

    #[test]
    fn attributes_validate_types() {
        let ok = Attributes::new().with_field("dueDate", 1_700_000_000_000i64);
        assert!(ok.validate(RecordKind::Sprint).is_ok());
        let bad = Attributes::new().with_field("done", "yes");
        assert!(bad.validate(RecordKind::Task).is_err());
    }
}
