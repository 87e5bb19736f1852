//! Server configuration.

use std::time::Duration;

/// Configuration for a [`Replicator`](crate::Replicator).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Window in which repeated changes to one Replicant coalesce into a
    /// single persisted write.
    pub persist_debounce: Duration,
    /// Whether Replicants are persistent when a declaration does not say.
    pub default_persistent: bool,
    /// Maximum number of operations accepted in one `operations` message.
    pub max_operations_per_message: usize,
}

impl ServerConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            persist_debounce: Duration::from_millis(250),
            default_persistent: true,
            max_operations_per_message: 1000,
        }
    }

    /// Sets the persistence debounce window.
    pub fn with_persist_debounce(mut self, debounce: Duration) -> Self {
        self.persist_debounce = debounce;
        self
    }

    /// Sets whether Replicants default to persistent.
    pub fn with_default_persistent(mut self, persistent: bool) -> Self {
        self.default_persistent = persistent;
        self
    }

    /// Sets the operation count limit per message.
    pub fn with_max_operations_per_message(mut self, max: usize) -> Self {
        self.max_operations_per_message = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.persist_debounce, Duration::from_millis(250));
        assert!(config.default_persistent);
        assert_eq!(config.max_operations_per_message, 1000);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_persist_debounce(Duration::from_millis(10))
            .with_default_persistent(false)
            .with_max_operations_per_message(5);

        assert_eq!(config.persist_debounce, Duration::from_millis(10));
        assert!(!config.default_persistent);
        assert_eq!(config.max_operations_per_message, 5);
    }
}
