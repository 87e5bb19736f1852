//! Configuration for Replicant clients.

use rand::Rng;
use std::time::Duration;

/// Configuration for a [`crate::ReplicantClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whether mutations are checked against the schema sent by the server
    /// before they are applied locally.
    pub validate_locally: bool,
    /// Retry configuration for reconnects.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a configuration with local validation on and default retries.
    pub fn new() -> Self {
        Self {
            validate_locally: true,
            retry: RetryConfig::default(),
        }
    }

    /// Enables or disables local schema validation.
    pub fn with_local_validation(mut self, enabled: bool) -> Self {
        self.validate_locally = enabled;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    ///
    /// The first attempt never waits. Later attempts back off exponentially
    /// up to `max_delay`, plus up to 25% jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builders() {
        let config = ClientConfig::new()
            .with_local_validation(false)
            .with_retry(RetryConfig::new(5));
        assert!(!config.validate_locally);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(ClientConfig::default().validate_locally);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        // Jitter adds at most 25%.
        let d1 = config.delay_for_attempt(1);
        assert!(d1 >= Duration::from_millis(100));
        assert!(d1 <= Duration::from_millis(125));

        let d2 = config.delay_for_attempt(2);
        assert!(d2 >= Duration::from_millis(200));
        assert!(d2 <= Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(20)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn no_retry_never_waits() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }
}
