use std::{net::IpAddr, time::Duration};

use postern_common::{config::ClientTimeouts, envelope::QueueLevel, error::ProtocolError};
use serde::Deserialize;

/// A source address and the name its PTR record must carry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Binding {
    pub ip: IpAddr,
    pub rdns: String,
}

impl core::str::FromStr for Binding {
    type Err = String;

    /// Parses `ip=rdns`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, rdns) = s
            .split_once('=')
            .ok_or_else(|| format!("expected ip=rdns, got '{s}'"))?;

        let ip = ip
            .trim()
            .parse()
            .map_err(|err| format!("invalid address '{ip}': {err}"))?;

        let rdns = rdns.trim().trim_end_matches('.');
        if rdns.is_empty() {
            return Err(format!("missing rdns name in '{s}'"));
        }

        Ok(Self {
            ip,
            rdns: rdns.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MxConfig {
    /// DNS query timeout
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    /// Replaces the record TTL for every cached answer
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    #[serde(default = "defaults::min_ttl_secs")]
    pub min_ttl_secs: u64,

    #[serde(default = "defaults::max_ttl_secs")]
    pub max_ttl_secs: u64,

    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
}

impl MxConfig {
    /// # Errors
    /// If the TTL bounds are inverted
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.min_ttl_secs > self.max_ttl_secs {
            return Err(ProtocolError::InvalidConfiguration {
                field: String::from("delivery.mx.min_ttl_secs"),
                reason: format!(
                    "{} is greater than max_ttl_secs {}",
                    self.min_ttl_secs, self.max_ttl_secs
                ),
            });
        }

        Ok(())
    }

    /// How long to cache an answer whose records carry `record_ttl`.
    pub fn cache_ttl(&self, record_ttl: u32) -> Duration {
        let secs = self.cache_ttl_secs.unwrap_or_else(|| {
            u64::from(record_ttl)
                .max(self.min_ttl_secs)
                .min(self.max_ttl_secs)
        });
        Duration::from_secs(secs)
    }
}

impl Default for MxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout_secs(),
            cache_ttl_secs: None,
            min_ttl_secs: defaults::min_ttl_secs(),
            max_ttl_secs: defaults::max_ttl_secs(),
            capacity: defaults::capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryConfig {
    /// One set of workers per binding.
    #[serde(default)]
    pub bindings: Vec<Binding>,

    /// Name presented in `EHLO`. Each binding's rdns name when unset.
    #[serde(default)]
    pub helo: Option<String>,

    /// Minimum time between two deliveries by one worker
    #[serde(default = "defaults::pacing_secs")]
    pub pacing_secs: u64,

    #[serde(default)]
    pub timeouts: ClientTimeouts,

    #[serde(default)]
    pub queue: QueueLevel,

    #[serde(default = "defaults::workers")]
    pub workers: usize,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub mx: MxConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            helo: None,
            pacing_secs: defaults::pacing_secs(),
            timeouts: ClientTimeouts::default(),
            queue: QueueLevel::default(),
            workers: defaults::workers(),
            accept_invalid_certs: false,
            mx: MxConfig::default(),
        }
    }
}

impl DeliveryConfig {
    /// # Errors
    /// If a binding is missing or the MX cache bounds are inverted
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.bindings.is_empty() {
            return Err(ProtocolError::InvalidConfiguration {
                field: String::from("delivery.bindings"),
                reason: String::from("at least one source address is required"),
            });
        }

        self.mx.validate()
    }

    pub const fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_secs)
    }

    /// The `EHLO` name to use when sending from `binding`.
    pub fn helo_for<'a>(&'a self, binding: &'a Binding) -> &'a str {
        self.helo.as_deref().unwrap_or(&binding.rdns)
    }
}

mod defaults {
    pub const fn timeout_secs() -> u64 {
        5
    }

    pub const fn min_ttl_secs() -> u64 {
        60
    }

    pub const fn max_ttl_secs() -> u64 {
        60 * 60
    }

    pub const fn capacity() -> usize {
        10_000
    }

    pub const fn pacing_secs() -> u64 {
        60
    }

    pub const fn workers() -> usize {
        1
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn binding_from_flag() {
        let binding: Binding = "192.0.2.25=mx1.postern.test.".parse().unwrap();
        assert_eq!(binding.ip, "192.0.2.25".parse::<IpAddr>().unwrap());
        assert_eq!(binding.rdns, "mx1.postern.test");

        assert!("192.0.2.25".parse::<Binding>().is_err());
        assert!("nope=mx1.postern.test".parse::<Binding>().is_err());
        assert!("192.0.2.25=".parse::<Binding>().is_err());
    }

    #[test]
    fn inverted_ttl_bounds_are_rejected() {
        let mx = MxConfig {
            min_ttl_secs: 600,
            max_ttl_secs: 60,
            ..MxConfig::default()
        };
        assert!(mx.validate().is_err());

        let config = DeliveryConfig {
            bindings: vec!["192.0.2.25=mx1.postern.test".parse().unwrap()],
            mx,
            ..DeliveryConfig::default()
        };
        assert!(config.validate().is_err());

        // Never panics, even when left unvalidated
        assert_eq!(mx.cache_ttl(300), Duration::from_secs(60));
    }

    #[test]
    fn cache_ttl_is_clamped_or_overridden() {
        let mx = MxConfig::default();
        assert_eq!(mx.cache_ttl(5), Duration::from_secs(60));
        assert_eq!(mx.cache_ttl(900), Duration::from_secs(900));
        assert_eq!(mx.cache_ttl(86_400), Duration::from_secs(3600));

        let fixed = MxConfig {
            cache_ttl_secs: Some(30),
            ..MxConfig::default()
        };
        assert_eq!(fixed.cache_ttl(900), Duration::from_secs(30));
    }

    #[test]
    fn missing_bindings_are_rejected() {
        assert!(DeliveryConfig::default().validate().is_err());
    }

    #[test]
    fn ron_defaults() {
        let config: DeliveryConfig = ron::from_str(
            "(bindings: [(ip: \"192.0.2.25\", rdns: \"mx1.postern.test\")], queue: high)",
        )
        .unwrap();

        assert_eq!(config.queue, QueueLevel::High);
        assert_eq!(config.pacing(), Duration::from_secs(60));
        assert_eq!(config.timeouts.dial(), Duration::from_secs(10));
        assert_eq!(config.timeouts.session(), Duration::from_secs(60));
        assert_eq!(config.helo_for(&config.bindings[0]), "mx1.postern.test");
        assert_eq!(config.mx, MxConfig::default());
        assert!(config.validate().is_ok());
    }
}
