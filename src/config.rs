//! Configuration Module
//!
//! Handles loading the demo server configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::{CacheConfig, FetchPriority, RefreshPolicy};

/// Demo server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Refresh interval of the cached quote in seconds
    pub refresh_interval: u64,
    /// Whether a login event also refreshes the quote
    pub refresh_on_login: bool,
    /// Throttle window in milliseconds, 0 disables throttling
    pub fetch_throttle_ms: u64,
    /// Simulated latency of the remote quote source in milliseconds
    pub fetch_latency_ms: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `REFRESH_INTERVAL` - Refresh interval in seconds (default: 10)
    /// - `REFRESH_ON_LOGIN` - Refresh on login events (default: true)
    /// - `FETCH_THROTTLE_MS` - Throttle window, 0 = fetch all (default: 0)
    /// - `FETCH_LATENCY_MS` - Simulated remote latency (default: 50)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            refresh_interval: env_or("REFRESH_INTERVAL", defaults.refresh_interval),
            refresh_on_login: env_or("REFRESH_ON_LOGIN", defaults.refresh_on_login),
            fetch_throttle_ms: env_or("FETCH_THROTTLE_MS", defaults.fetch_throttle_ms),
            fetch_latency_ms: env_or("FETCH_LATENCY_MS", defaults.fetch_latency_ms),
        }
    }

    /// Builds the cache configuration for the demo quote.
    pub fn cache_config(&self) -> CacheConfig {
        let interval = Duration::from_secs(self.refresh_interval);
        let policy = if self.refresh_on_login {
            RefreshPolicy::periodic_and_login(interval)
        } else {
            RefreshPolicy::periodic(interval)
        };
        let fetch_priority = match self.fetch_throttle_ms {
            0 => FetchPriority::FetchAll,
            ms => FetchPriority::Throttled(Duration::from_millis(ms)),
        };
        CacheConfig::new(policy).with_fetch_priority(fetch_priority)
    }

    pub fn fetch_latency(&self) -> Duration {
        Duration::from_millis(self.fetch_latency_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            refresh_interval: 10,
            refresh_on_login: true,
            fetch_throttle_ms: 0,
            fetch_latency_ms: 50,
        }
    }
}
