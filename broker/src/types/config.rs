//! Broker configuration.

use std::time::Duration;

use crate::types::{BrokerError, Result};

pub const ENV_MAX_ACTIVE: &str = "RTK_MAX_ACTIVE";
pub const ENV_IDLE_SECS: &str = "RTK_IDLE_SECS";
pub const ENV_TOOL_TIMEOUT_MS: &str = "RTK_TOOL_TIMEOUT_MS";
pub const ENV_REAP_INTERVAL_SECS: &str = "RTK_REAP_INTERVAL_SECS";
pub const ENV_PREWARM: &str = "RTK_PREWARM";

/// Limits and timers for the worker pool.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tool_broker::BrokerConfig;
///
/// let config = BrokerConfig::new()
///     .with_max_active(2)
///     .with_call_timeout(Duration::from_secs(5))
///     .with_prewarm(["github-mcp"]);
/// assert_eq!(config.max_active, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Maximum number of live workers.
    pub max_active: usize,
    /// A worker unused for longer than this is evicted by the reaper.
    pub idle_timeout: Duration,
    /// Deadline for each individual RPC, handshake included.
    pub call_timeout: Duration,
    /// How often the idle reaper runs.
    pub reap_interval: Duration,
    /// Integrations spawned eagerly by `Broker::start`.
    pub prewarm: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_active: 6,
            idle_timeout: Duration::from_secs(300),
            call_timeout: Duration::from_millis(60_000),
            reap_interval: Duration::from_secs(60),
            prewarm: Vec::new(),
        }
    }
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_reap_interval(mut self, reap_interval: Duration) -> Self {
        self.reap_interval = reap_interval;
        self
    }

    pub fn with_prewarm<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prewarm = names.into_iter().map(Into::into).collect();
        self
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup. Unset or blank
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get(ENV_MAX_ACTIVE) {
            config.max_active = parse_number(ENV_MAX_ACTIVE, &raw)? as usize;
        }
        if let Some(raw) = get(ENV_IDLE_SECS) {
            config.idle_timeout = Duration::from_secs(parse_number(ENV_IDLE_SECS, &raw)?);
        }
        if let Some(raw) = get(ENV_TOOL_TIMEOUT_MS) {
            config.call_timeout = Duration::from_millis(parse_number(ENV_TOOL_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = get(ENV_REAP_INTERVAL_SECS) {
            config.reap_interval = Duration::from_secs(parse_number(ENV_REAP_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = get(ENV_PREWARM) {
            config.prewarm = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(BrokerError::Config("max_active must be at least 1".to_string()));
        }
        if self.call_timeout.is_zero() {
            return Err(BrokerError::Config("call_timeout must be non-zero".to_string()));
        }
        if self.reap_interval.is_zero() {
            return Err(BrokerError::Config("reap_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| BrokerError::Config(format!("{}={:?}: {}", key, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, BrokerConfig::default());
        assert_eq!(config.max_active, 6);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.call_timeout, Duration::from_secs(60));
        assert!(config.prewarm.is_empty());
    }

    #[test]
    fn test_from_lookup() {
        let config = BrokerConfig::from_lookup(lookup_from(&[
            (ENV_MAX_ACTIVE, "2"),
            (ENV_IDLE_SECS, "30"),
            (ENV_TOOL_TIMEOUT_MS, "1500"),
            (ENV_PREWARM, "github-mcp, ,neon-mcp,"),
        ]))
        .unwrap();

        assert_eq!(config.max_active, 2);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.prewarm, vec!["github-mcp", "neon-mcp"]);
    }

    #[test]
    fn test_invalid_values() {
        let err = BrokerConfig::from_lookup(lookup_from(&[(ENV_MAX_ACTIVE, "six")])).unwrap_err();
        assert!(matches!(err, BrokerError::Config(msg) if msg.contains(ENV_MAX_ACTIVE)));

        let err = BrokerConfig::from_lookup(lookup_from(&[(ENV_MAX_ACTIVE, "0")])).unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = BrokerConfig::new()
            .with_max_active(3)
            .with_idle_timeout(Duration::from_millis(200))
            .with_reap_interval(Duration::from_millis(50))
            .with_prewarm(vec!["a".to_string()]);
        assert_eq!(config.max_active, 3);
        assert_eq!(config.idle_timeout, Duration::from_millis(200));
        assert_eq!(config.reap_interval, Duration::from_millis(50));
        assert_eq!(config.prewarm, vec!["a"]);
        assert!(config.validate().is_ok());
    }
}
