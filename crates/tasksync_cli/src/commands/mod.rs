//! CLI command implementations.

pub mod changes;
pub mod get;
pub mod inspect;
pub mod write;

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tasksync_core::{RecordStore, StorageHandle, StoreConfig, UserId};

/// Result type shared by the commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens `user`'s store, creating it only if `create` is set.
pub fn open_store(data_dir: &Path, user: &UserId, create: bool) -> CommandResult<RecordStore> {
    let config = StoreConfig::default().create_if_missing(create);
    let handle = StorageHandle::open(data_dir, user, &config)
        .map_err(|e| format!("cannot open store of {user} under {}: {e}", data_dir.display()))?;
    Ok(RecordStore::new(Arc::new(handle)))
}

/// Splits `name=value`, reading the value as JSON and falling back to a
/// plain string.
pub fn parse_assignment(raw: &str) -> CommandResult<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))?;
    if name.is_empty() {
        return Err(format!("missing field name in {raw:?}").into());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
