use std::time::Duration;

use serde::Deserialize;

/// Capacities and time-to-live values for the account caches.
///
/// Positive results are stable and cached for hours, negative results for minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default = "defaults::found_secs")]
    pub domain_secs: u64,
    #[serde(default = "defaults::missing_secs")]
    pub domain_missing_secs: u64,
    #[serde(default = "defaults::found_secs")]
    pub alias_secs: u64,
    #[serde(default = "defaults::missing_secs")]
    pub alias_missing_secs: u64,
    #[serde(default = "defaults::found_secs")]
    pub return_path_secs: u64,
    #[serde(default = "defaults::missing_secs")]
    pub return_path_missing_secs: u64,
    #[serde(default = "defaults::dkim_secs")]
    pub dkim_secs: u64,
    #[serde(default = "defaults::found_secs")]
    pub auth_secs: u64,
    #[serde(default = "defaults::missing_secs")]
    pub auth_failed_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::capacity(),
            domain_secs: defaults::found_secs(),
            domain_missing_secs: defaults::missing_secs(),
            alias_secs: defaults::found_secs(),
            alias_missing_secs: defaults::missing_secs(),
            return_path_secs: defaults::found_secs(),
            return_path_missing_secs: defaults::missing_secs(),
            dkim_secs: defaults::dkim_secs(),
            auth_secs: defaults::found_secs(),
            auth_failed_secs: defaults::missing_secs(),
        }
    }
}

impl CacheConfig {
    pub(crate) const fn secs(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }
}

mod defaults {
    pub const fn capacity() -> usize {
        100_000
    }

    pub const fn found_secs() -> u64 {
        60 * 60
    }

    pub const fn missing_secs() -> u64 {
        5 * 60
    }

    pub const fn dkim_secs() -> u64 {
        24 * 60 * 60
    }
}
