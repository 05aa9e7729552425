//! Inspect command implementation.

use super::{open_store, CommandResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tasksync_core::{RecordKind, UserId};

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// User id.
    pub user: String,
    /// Database file path.
    pub path: String,
    /// Current revision (the baseline of a fully synced client).
    pub revision: u64,
    /// Number of records per kind.
    pub records: BTreeMap<String, usize>,
    /// Number of records whose `deleted` flag is set.
    pub deleted_tasks: usize,
    /// Active tag labels.
    pub tags: Vec<String>,
}

/// Runs the inspect command.
pub async fn run(data_dir: &Path, user: &UserId, format: &str) -> CommandResult {
    let store = open_store(data_dir, user, false)?;

    let mut records = BTreeMap::new();
    let mut deleted_tasks = 0;
    for kind in RecordKind::ALL {
        let all = store.list(kind, BTreeMap::new()).await?;
        if kind == RecordKind::Task {
            deleted_tasks = all
                .iter()
                .filter(|r| r.value("deleted").is_some_and(|v| v.is_truthy()))
                .count();
        }
        records.insert(kind.as_str().to_string(), all.len());
    }

    let result = InspectResult {
        user: user.to_string(),
        path: store
            .handle()
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        revision: store.current_revision().await?.as_u64(),
        records,
        deleted_tasks,
        tags: store.tags().await?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {} ({})", result.user, result.path);
    println!("Revision: {}", result.revision);
    println!();
    println!("Records:");
    for (kind, count) in &result.records {
        println!("  {kind:<8} {count}");
    }
    println!("  deleted tasks: {}", result.deleted_tasks);
    println!();
    if result.tags.is_empty() {
        println!("Tags: (none)");
    } else {
        println!("Tags: {}", result.tags.join(", "));
    }
}
