//! Get command implementation.

use super::{open_store, CommandResult};
use serde_json::Value;
use std::path::Path;
use tasksync_core::{FieldType, RecordKind, UserId};
use tasksync_protocol::{format_rfc3339, GetRequest, WireRecord};

/// Runs the get command.
pub async fn run(
    data_dir: &Path,
    user: &UserId,
    kind: &str,
    key: &str,
    format: &str,
) -> CommandResult {
    let request = GetRequest {
        kind: kind.to_string(),
        key: key.to_string(),
    };
    let (kind, key) = request.decode()?;
    let store = open_store(data_dir, user, false)?;
    let record = store.get(kind, key).await?;
    let wire = WireRecord::from(&record);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&wire)?);
        }
        _ => {
            print_text_output(kind, &wire)?;
        }
    }

    Ok(())
}

fn print_text_output(kind: RecordKind, record: &WireRecord) -> CommandResult {
    println!(
        "{}/{} (created rev:{}, latest rev:{})",
        record.kind, record.key, record.created_rev, record.latest_rev
    );
    for spec in kind.fields() {
        let value = record.attributes.get(spec.name).unwrap_or(&Value::Null);
        let rev = record.revisions.get(spec.name).copied().unwrap_or_default();
        let shown = match (spec.ty, value.as_i64()) {
            (FieldType::Timestamp, Some(ms)) => format_rfc3339(ms)?,
            _ => value.to_string(),
        };
        println!("  {:<12} {shown:<32} rev:{rev}", spec.name);
    }

    let active = record.attributes.get("tags").and_then(Value::as_object);
    for (name, rev) in &record.revisions {
        let Some(tag) = name.strip_prefix("tags.") else {
            continue;
        };
        let state = if active.is_some_and(|tags| tags.contains_key(tag)) {
            "active"
        } else {
            "removed"
        };
        println!("  #{tag:<11} {state:<32} rev:{rev}");
    }
    Ok(())
}
