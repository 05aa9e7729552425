//! Store configuration.

use std::time::Duration;

/// Configuration for opening a user store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory and file if missing.
    pub create_if_missing: bool,

    /// How long SQLite waits on a locked database file before failing.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the SQLite busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .create_if_missing(false)
            .busy_timeout(Duration::from_millis(250));

        assert!(!config.create_if_missing);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }
}
