//! Configuration
//!
//! Tunables of the dispatcher and the registries. Durations are expressed in
//! milliseconds so the structures deserialize from flat config files, and every
//! value can be overridden from the environment.

use serde::Deserialize;
use std::time::Duration;

pub const ENV_REQUEST_TIMEOUT_MS: &str = "CLUSTER_REQUEST_TIMEOUT_MS";
pub const ENV_EXECUTOR_THREADS: &str = "CLUSTER_EXECUTOR_THREADS";
pub const ENV_DRAIN_TIMEOUT_MS: &str = "CLUSTER_DRAIN_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Default timeout of a remote command.
    pub request_timeout_ms: u64,
    /// Maximum number of inbound commands executing concurrently.
    pub executor_threads: usize,
    /// How long `close` waits for in-flight inbound commands.
    pub drain_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            executor_threads: 8,
            drain_timeout_ms: 10_000,
        }
    }
}

impl DispatcherConfig {
    /// Defaults overridden by any `CLUSTER_*` environment variables that are set.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup`; unparsable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = parse(&lookup, ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = value;
        }
        if let Some(value) = parse::<usize>(&lookup, ENV_EXECUTOR_THREADS) {
            self.executor_threads = value.max(1);
        }
        if let Some(value) = parse(&lookup, ENV_DRAIN_TIMEOUT_MS) {
            self.drain_timeout_ms = value;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.executor_threads, 8);
        assert_eq!(config.drain_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_apply_and_skip_invalid_values() {
        let env: HashMap<&str, &str> = [
            (ENV_REQUEST_TIMEOUT_MS, "250"),
            (ENV_EXECUTOR_THREADS, "not-a-number"),
            (ENV_DRAIN_TIMEOUT_MS, " 40 "),
        ]
        .into_iter()
        .collect();

        let config = DispatcherConfig::default()
            .with_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.executor_threads, 8);
        assert_eq!(config.drain_timeout(), Duration::from_millis(40));
    }

    #[test]
    fn test_zero_threads_is_clamped() {
        let config = DispatcherConfig::default().with_overrides(|key| {
            (key == ENV_EXECUTOR_THREADS).then(|| "0".to_string())
        });
        assert_eq!(config.executor_threads, 1);
    }

    #[test]
    fn test_deserializes_partial_json() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{ "request_timeout_ms": 100 }"#).unwrap();
        assert_eq!(config.request_timeout_ms, 100);
        assert_eq!(config.executor_threads, 8);
    }
}
