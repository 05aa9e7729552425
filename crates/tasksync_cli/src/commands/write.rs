//! Create and update commands.

use super::{open_store, parse_assignment, CommandResult};
use serde_json::Value;
use std::path::Path;
use tasksync_core::{Revision, UserId};
use tasksync_protocol::{CreateRequest, RecordResponse, UpdateRequest};
use tracing::info;

/// Creates a record.
pub async fn create(
    data_dir: &Path,
    user: &UserId,
    kind: &str,
    key: &str,
    sets: &[String],
    tags: &[String],
) -> CommandResult {
    let mut request = CreateRequest {
        kind: kind.to_string(),
        key: key.to_string(),
        attributes: Default::default(),
    };
    for raw in sets {
        let (name, value) = parse_assignment(raw)?;
        request.attributes.insert(name, value);
    }
    if !tags.is_empty() {
        request.attributes.insert(
            "tags".to_string(),
            Value::Array(tags.iter().cloned().map(Value::String).collect()),
        );
    }
    let (kind, key, attributes) = request.decode()?;

    let store = open_store(data_dir, user, true)?;
    let result = store.create(kind, key, attributes).await?;
    info!(user = %user, rev = ?result.revision.map(Revision::as_u64), "created");
    println!("{}", serde_json::to_string_pretty(&RecordResponse::from(&result))?);
    Ok(())
}

/// Updates a record relative to `baseline`.
pub async fn update(
    data_dir: &Path,
    user: &UserId,
    kind: &str,
    key: &str,
    baseline: u64,
    sets: &[String],
) -> CommandResult {
    let mut request = UpdateRequest {
        kind: kind.to_string(),
        key: key.to_string(),
        baseline,
        modifications: Default::default(),
    };
    for raw in sets {
        let (name, value) = parse_assignment(raw)?;
        request.modifications.insert(name, value);
    }
    let (kind, key, modifications, baseline) = request.decode()?;
    if modifications.is_empty() {
        return Err("nothing to update: pass at least one --set".into());
    }

    let store = open_store(data_dir, user, false)?;
    let result = store.update(kind, key, modifications, baseline).await?;
    if result.revision.is_none() {
        info!(user = %user, dropped = ?result.dropped, "update was stale, nothing written");
    }
    println!("{}", serde_json::to_string_pretty(&RecordResponse::from(&result))?);
    Ok(())
}
