//! Engine configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a compiled-in default; malformed values fall back to the
//! default instead of failing startup. Durations are milliseconds throughout
//! because lease and presence timestamps are stored as epoch milliseconds.

use std::time::Duration;

pub const DEFAULT_LEASE_TTL_MS: i64 = 60_000;
pub const DEFAULT_LEASE_RENEW_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PRESENCE_TTL_MS: i64 = 60_000;
pub const DEFAULT_PRESENCE_HEARTBEAT_MS: u64 = 20_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_GUARD_MIN_TABLES: usize = 3;
pub const DEFAULT_GUARD_UNIQUE_RATIO: f64 = 0.3;
pub const DEFAULT_HEARTBEAT_RETRIES: usize = 3;
pub const DEFAULT_HEARTBEAT_RETRY_BASE_MS: u64 = 200;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// A lease is valid while `now - acquired_at < lease_ttl_ms`.
    pub lease_ttl_ms: i64,
    /// Interval between lease renewals for held leases.
    pub lease_renew_interval_ms: u64,
    /// Presence entries older than this are hidden and collected.
    pub presence_ttl_ms: i64,
    /// Interval between presence heartbeats.
    pub presence_heartbeat_ms: u64,
    /// Interval of the background lease/presence sweep.
    pub sweep_interval_ms: u64,
    /// The state guard only inspects collections larger than this.
    pub guard_min_tables: usize,
    /// Minimum ratio of distinct positions accepted by the state guard.
    pub guard_unique_ratio: f64,
    /// Store attempts per heartbeat tick before giving up on the tick.
    pub heartbeat_retries: usize,
    /// Linear back-off base between heartbeat attempts.
    pub heartbeat_retry_base_ms: u64,
    /// Maximum undo depth kept per plan.
    pub history_limit: usize,
}

impl EngineConfig {
    /// Build the config from environment variables.
    ///
    /// - `LEASE_TTL_MS`, `LEASE_RENEW_INTERVAL_MS`
    /// - `PRESENCE_TTL_MS`, `PRESENCE_HEARTBEAT_MS`
    /// - `SWEEP_INTERVAL_MS`
    /// - `GUARD_MIN_TABLES`, `GUARD_UNIQUE_RATIO`
    /// - `HEARTBEAT_RETRIES`, `HEARTBEAT_RETRY_BASE_MS`
    /// - `HISTORY_LIMIT`
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            lease_ttl_ms: env_parse("LEASE_TTL_MS", DEFAULT_LEASE_TTL_MS),
            lease_renew_interval_ms: env_parse("LEASE_RENEW_INTERVAL_MS", DEFAULT_LEASE_RENEW_INTERVAL_MS),
            presence_ttl_ms: env_parse("PRESENCE_TTL_MS", DEFAULT_PRESENCE_TTL_MS),
            presence_heartbeat_ms: env_parse("PRESENCE_HEARTBEAT_MS", DEFAULT_PRESENCE_HEARTBEAT_MS),
            sweep_interval_ms: env_parse("SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS),
            guard_min_tables: env_parse("GUARD_MIN_TABLES", DEFAULT_GUARD_MIN_TABLES),
            guard_unique_ratio: env_parse("GUARD_UNIQUE_RATIO", DEFAULT_GUARD_UNIQUE_RATIO),
            heartbeat_retries: env_parse("HEARTBEAT_RETRIES", DEFAULT_HEARTBEAT_RETRIES).max(1),
            heartbeat_retry_base_ms: env_parse("HEARTBEAT_RETRY_BASE_MS", DEFAULT_HEARTBEAT_RETRY_BASE_MS),
            history_limit: env_parse("HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
        }
    }

    #[must_use]
    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_millis(self.lease_renew_interval_ms)
    }

    #[must_use]
    pub fn presence_heartbeat(&self) -> Duration {
        Duration::from_millis(self.presence_heartbeat_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
            lease_renew_interval_ms: DEFAULT_LEASE_RENEW_INTERVAL_MS,
            presence_ttl_ms: DEFAULT_PRESENCE_TTL_MS,
            presence_heartbeat_ms: DEFAULT_PRESENCE_HEARTBEAT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            guard_min_tables: DEFAULT_GUARD_MIN_TABLES,
            guard_unique_ratio: DEFAULT_GUARD_UNIQUE_RATIO,
            heartbeat_retries: DEFAULT_HEARTBEAT_RETRIES,
            heartbeat_retry_base_ms: DEFAULT_HEARTBEAT_RETRY_BASE_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
