//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;
use tasksync_core::StoreConfig;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root directory holding one store directory per user.
    pub data_dir: PathBuf,
    /// How long a user's store stays open after its last session leaves.
    pub drain_grace: Duration,
    /// Store-level debounce: mutations within this window produce one
    /// fan-out to the user's sessions.
    pub store_debounce: Duration,
    /// Session-level debounce before a session's listener runs. Zero defers
    /// delivery to the next scheduler tick.
    pub session_debounce: Duration,
    /// Options for opening each user store.
    pub store: StoreConfig,
}

impl ServerConfig {
    /// Creates a configuration rooted at `data_dir` with default timings.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            drain_grace: Duration::from_secs(5),
            store_debounce: Duration::from_millis(100),
            session_debounce: Duration::ZERO,
            store: StoreConfig::default(),
        }
    }

    /// Sets the drain grace period.
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Sets the store-level debounce window.
    #[must_use]
    pub fn with_store_debounce(mut self, delay: Duration) -> Self {
        self.store_debounce = delay;
        self
    }

    /// Sets the session-level debounce window.
    #[must_use]
    pub fn with_session_debounce(mut self, delay: Duration) -> Self {
        self.session_debounce = delay;
        self
    }

    /// Sets the store options.
    #[must_use]
    pub fn with_store_config(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("./dbs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./dbs"));
        assert_eq!(config.drain_grace, Duration::from_secs(5));
        assert_eq!(config.store_debounce, Duration::from_millis(100));
        assert_eq!(config.session_debounce, Duration::ZERO);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("/tmp/stores")
            .with_drain_grace(Duration::from_millis(250))
            .with_store_debounce(Duration::from_millis(10))
            .with_session_debounce(Duration::from_millis(1))
            .with_store_config(StoreConfig::default().create_if_missing(false));

        assert_eq!(config.drain_grace, Duration::from_millis(250));
        assert_eq!(config.store_debounce, Duration::from_millis(10));
        assert_eq!(config.session_debounce, Duration::from_millis(1));
        assert!(!config.store.create_if_missing);
    }
}
