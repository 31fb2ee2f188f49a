//! Transaction scope configuration.

use std::time::Duration;

/// Configuration for opening a transaction scope.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// Budget for every lock acquisition made through the scope, measured
    /// from scope construction. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ScopeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock acquisition budget.
    #[must_use]
    pub const fn lock_timeout(mut self, value: Duration) -> Self {
        self.lock_timeout = Some(value);
        self
    }

    /// Removes the lock acquisition budget; waits become unbounded.
    #[must_use]
    pub const fn no_lock_timeout(mut self) -> Self {
        self.lock_timeout = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_bounded_timeout() {
        let config = ScopeConfig::default();
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn builder_overrides() {
        let config = ScopeConfig::new().lock_timeout(Duration::from_millis(50));
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(50)));

        let config = ScopeConfig::new().no_lock_timeout();
        assert_eq!(config.lock_timeout, None);
    }
}
