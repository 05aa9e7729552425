//! Changes command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use tasksync_core::{Revision, UserId};
use tasksync_protocol::{PullResponse, WireChange};
use tracing::debug;

/// Runs the changes command.
pub async fn run(data_dir: &Path, user: &UserId, since: u64, format: &str) -> CommandResult {
    let store = open_store(data_dir, user, false)?;
    let (revision, changes) = store.pull(Revision::new(since)).await?;
    debug!(user = %user, since, rev = revision.as_u64(), count = changes.len(), "computed changes");
    let response = PullResponse::new(revision, &changes);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        _ => {
            print_text_output(since, &response)?;
        }
    }

    Ok(())
}

fn print_text_output(since: u64, response: &PullResponse) -> CommandResult {
    println!(
        "{} change(s) after rev:{} (store at rev:{})",
        response.changes.len(),
        since,
        response.revision
    );
    for change in &response.changes {
        match change {
            WireChange::Create { kind, key, rev, obj } => {
                println!("  rev:{rev:<6} CREATE {kind}/{key} {}", serde_json::to_string(obj)?);
            }
            WireChange::Update { kind, key, rev, mods } => {
                println!("  rev:{rev:<6} UPDATE {kind}/{key} {}", serde_json::to_string(mods)?);
            }
        }
    }
    Ok(())
}
