//! Request and response messages.
//!
//! Requests carry kinds and keys as strings and values as raw JSON; each
//! request type has a `decode` method producing the typed inputs of the
//! record store. Responses are built from store results.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::WireChange;
use crate::value::{field_from_json, field_to_json, flag_from_json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use tasksync_core::{
    Attributes, ChangeOp, FieldValue, Modifications, Record, RecordKey, RecordKind, Revision,
    WriteResult, TAG_PREFIX,
};

/// Attribute key holding a tag set in create requests and record views.
const TAGS_KEY: &str = "tags";

fn parse_kind(kind: &str) -> ProtocolResult<RecordKind> {
    kind.parse()
        .map_err(|_| ProtocolError::UnknownKind(kind.to_string()))
}

fn parse_key(key: &str) -> ProtocolResult<RecordKey> {
    RecordKey::new(key).map_err(|e| ProtocolError::invalid_request(e.to_string()))
}

/// Reads a tag set given either as `{label: flag}` or `[label, ...]`.
fn parse_tag_set(value: &Json) -> ProtocolResult<BTreeMap<String, bool>> {
    match value {
        Json::Object(map) => Ok(map
            .iter()
            .map(|(tag, flag)| (tag.clone(), flag_from_json(flag)))
            .collect()),
        Json::Array(items) => items
            .iter()
            .map(|item| match item {
                Json::String(tag) => Ok((tag.clone(), true)),
                other => Err(ProtocolError::invalid_request(format!(
                    "tag labels must be strings, got {other}"
                ))),
            })
            .collect(),
        Json::Null => Ok(BTreeMap::new()),
        other => Err(ProtocolError::invalid_request(format!(
            "tags must be an object or array, got {other}"
        ))),
    }
}

/// Request to create a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Record kind name (`task`, `sprint`, `todo`; plurals accepted).
    pub kind: String,
    /// Caller-generated record key.
    pub key: String,
    /// Field values, plus an optional `tags` set.
    #[serde(default)]
    pub attributes: Map<String, Json>,
}

impl CreateRequest {
    /// Creates a request with no attributes.
    pub fn new(kind: RecordKind, key: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            key: key.into(),
            attributes: Map::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Json) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Decodes into store inputs.
    pub fn decode(&self) -> ProtocolResult<(RecordKind, RecordKey, Attributes)> {
        let kind = parse_kind(&self.kind)?;
        let key = parse_key(&self.key)?;
        let mut attributes = Attributes::new();
        for (name, value) in &self.attributes {
            if name == TAGS_KEY {
                attributes.tags.extend(parse_tag_set(value)?);
            } else if let Some(tag) = name.strip_prefix(TAG_PREFIX) {
                attributes.tags.insert(tag.to_string(), flag_from_json(value));
            } else {
                attributes
                    .fields
                    .insert(name.clone(), field_from_json(kind, name, value)?);
            }
        }
        Ok((kind, key, attributes))
    }
}

/// Request to update a record relative to the revision the caller last saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Record kind name.
    pub kind: String,
    /// Record key.
    pub key: String,
    /// Revision the caller last observed.
    #[serde(default)]
    pub baseline: u64,
    /// Field values and `tags.<label>` flags (a nested `tags` object is
    /// also accepted).
    #[serde(default)]
    pub modifications: Map<String, Json>,
}

impl UpdateRequest {
    /// Creates a request with no modifications.
    pub fn new(kind: RecordKind, key: impl Into<String>, baseline: Revision) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            key: key.into(),
            baseline: baseline.as_u64(),
            modifications: Map::new(),
        }
    }

    /// Adds a modification.
    #[must_use]
    pub fn with_modification(mut self, name: impl Into<String>, value: Json) -> Self {
        self.modifications.insert(name.into(), value);
        self
    }

    /// Decodes into store inputs.
    pub fn decode(&self) -> ProtocolResult<(RecordKind, RecordKey, Modifications, Revision)> {
        let kind = parse_kind(&self.kind)?;
        let key = parse_key(&self.key)?;
        let mut modifications = Modifications::new();
        for (name, value) in &self.modifications {
            if name == TAGS_KEY {
                for (tag, active) in parse_tag_set(value)? {
                    modifications.insert(format!("{TAG_PREFIX}{tag}"), FieldValue::Bool(active));
                }
            } else if name.starts_with(TAG_PREFIX) {
                modifications.insert(name.clone(), FieldValue::Bool(flag_from_json(value)));
            } else {
                modifications.insert(name.clone(), field_from_json(kind, name, value)?);
            }
        }
        Ok((kind, key, modifications, Revision::new(self.baseline)))
    }
}

/// Request for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    /// Record kind name.
    pub kind: String,
    /// Record key.
    pub key: String,
}

impl GetRequest {
    /// Creates a request.
    pub fn new(kind: RecordKind, key: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            key: key.into(),
        }
    }

    /// Decodes into store inputs.
    pub fn decode(&self) -> ProtocolResult<(RecordKind, RecordKey)> {
        Ok((parse_kind(&self.kind)?, parse_key(&self.key)?))
    }
}

/// Request for all records of a kind, optionally filtered by field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Record kind name.
    pub kind: String,
    /// Required field values, e.g. `{"deleted": false}`.
    #[serde(default)]
    pub filter: Map<String, Json>,
}

impl ListRequest {
    /// Creates an unfiltered request.
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            filter: Map::new(),
        }
    }

    /// Adds a filter entry.
    #[must_use]
    pub fn with_filter(mut self, name: impl Into<String>, value: Json) -> Self {
        self.filter.insert(name.into(), value);
        self
    }

    /// Decodes into store inputs.
    pub fn decode(&self) -> ProtocolResult<(RecordKind, BTreeMap<String, FieldValue>)> {
        let kind = parse_kind(&self.kind)?;
        let filter: BTreeMap<String, FieldValue> = self
            .filter
            .iter()
            .map(|(name, value)| Ok((name.clone(), field_from_json(kind, name, value)?)))
            .collect::<ProtocolResult<_>>()?;
        Ok((kind, filter))
    }
}

/// Request for the changes after a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PullRequest {
    /// Revision the client has fully applied (0 for a fresh client).
    #[serde(default)]
    pub baseline: u64,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(baseline: Revision) -> Self {
        Self {
            baseline: baseline.as_u64(),
        }
    }

    /// Returns the baseline as a revision.
    #[must_use]
    pub fn baseline(&self) -> Revision {
        Revision::new(self.baseline)
    }
}

/// Changes after a baseline, with the revision to use as the next baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Store revision at the time of the pull.
    pub revision: u64,
    /// Operations to apply.
    pub changes: Vec<WireChange>,
}

impl PullResponse {
    /// Builds a response from store output.
    pub fn new(revision: Revision, changes: &[ChangeOp]) -> Self {
        Self {
            revision: revision.as_u64(),
            changes: changes.iter().map(WireChange::from).collect(),
        }
    }
}

/// A record as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    /// Record kind name.
    pub kind: String,
    /// Record key.
    pub key: String,
    /// Revision the record was created at.
    pub created_rev: u64,
    /// Highest revision across fields and tags.
    pub latest_rev: u64,
    /// Field values, plus `tags` listing active tags as `{label: true}`.
    pub attributes: Map<String, Json>,
    /// Revision of each field and `tags.<label>` membership.
    pub revisions: BTreeMap<String, u64>,
}

impl From<&Record> for WireRecord {
    fn from(record: &Record) -> Self {
        let mut attributes: Map<String, Json> = record
            .fields
            .iter()
            .map(|(name, state)| (name.clone(), field_to_json(&state.value)))
            .collect();
        let tags: Map<String, Json> = record
            .active_tags()
            .map(|tag| (tag.to_string(), Json::Bool(true)))
            .collect();
        attributes.insert(TAGS_KEY.to_string(), Json::Object(tags));

        let revisions = record
            .fields
            .iter()
            .map(|(name, state)| (name.clone(), state.rev.as_u64()))
            .chain(
                record
                    .tags
                    .iter()
                    .map(|(tag, state)| (format!("{TAG_PREFIX}{tag}"), state.rev.as_u64())),
            )
            .collect();

        Self {
            kind: record.kind.as_str().to_string(),
            key: record.key.as_str().to_string(),
            created_rev: record.created_rev.as_u64(),
            latest_rev: record.latest_rev().as_u64(),
            attributes,
            revisions,
        }
    }
}

/// Response to create, update and get.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResponse {
    /// The record after the call.
    pub record: WireRecord,
    /// Revision consumed by a write, absent if nothing was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    /// Modifications dropped because the baseline was stale for them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<String>,
}

impl From<&Record> for RecordResponse {
    fn from(record: &Record) -> Self {
        Self {
            record: WireRecord::from(record),
            revision: None,
            dropped: Vec::new(),
        }
    }
}

impl From<&WriteResult> for RecordResponse {
    fn from(result: &WriteResult) -> Self {
        Self {
            record: WireRecord::from(&result.record),
            revision: result.revision.map(Revision::as_u64),
            dropped: result.dropped.clone(),
        }
    }
}

/// Records of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Matching records, ordered by key.
    pub records: Vec<WireRecord>,
}

impl ListResponse {
    /// Builds a response from store output.
    pub fn new(records: &[Record]) -> Self {
        Self {
            records: records.iter().map(WireRecord::from).collect(),
        }
    }
}

/// Active tag labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsResponse {
    /// Sorted labels.
    pub tags: Vec<String>,
}

/// An error reported to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code (e.g. `USER_NOT_FOUND`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error response.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
