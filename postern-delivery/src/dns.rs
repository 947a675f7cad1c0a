//! MX resolution for outbound delivery.
//!
//! Hosts come back sorted ascending by preference and are cached per domain.
//! The cache TTL follows the records' own TTL, clamped to the configured bounds,
//! unless an override is set. A domain with no exchangers is an error, never an
//! empty list, and errors are not cached.

use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use postern_common::cache::TtlCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::MxConfig, error::DnsError};

pub const SMTP_PORT: u16 = 25;

/// Record TTL used when an answer carries none.
const FALLBACK_TTL: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailServer {
    pub host: String,
    /// Lower is tried first.
    pub preference: u16,
    pub port: u16,
}

impl MailServer {
    #[must_use]
    pub fn new(host: impl Into<String>, preference: u16) -> Self {
        Self {
            host: host.into(),
            preference,
            port: SMTP_PORT,
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The raw answer to an MX query, in no particular order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecords {
    pub servers: Vec<MailServer>,
    pub ttl: u32,
}

#[async_trait]
pub trait MxLookup: Debug + Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<MxRecords, DnsError>;
}

#[derive(Debug)]
pub struct HickoryMx {
    resolver: TokioResolver,
}

impl HickoryMx {
    /// A resolver using the system configuration.
    ///
    /// # Errors
    /// If the system resolver configuration cannot be read
    pub fn from_system_conf(config: &MxConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())
            .map_err(DnsError::Configuration)?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxLookup for HickoryMx {
    async fn lookup(&self, domain: &str) -> Result<MxRecords, DnsError> {
        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(err) if err.is_no_records_found() => {
                return Err(DnsError::NoMailServers(domain.to_string()));
            }
            Err(source) => {
                return Err(DnsError::LookupFailed {
                    domain: domain.to_string(),
                    source,
                });
            }
        };

        let ttl = lookup
            .as_lookup()
            .records()
            .iter()
            .map(hickory_resolver::proto::rr::Record::ttl)
            .min()
            .unwrap_or(FALLBACK_TTL);

        let servers = lookup
            .iter()
            .map(|mx| {
                let host = mx.exchange().to_utf8();
                MailServer::new(host.trim_end_matches('.'), mx.preference())
            })
            .collect();

        Ok(MxRecords { servers, ttl })
    }
}

/// Fixed answers, keyed by domain.
#[derive(Debug, Default, Clone)]
pub struct StaticMx {
    records: HashMap<String, Vec<MailServer>>,
}

impl StaticMx {
    #[must_use]
    pub fn with(mut self, domain: impl Into<String>, servers: Vec<MailServer>) -> Self {
        self.records.insert(domain.into().to_lowercase(), servers);
        self
    }
}

#[async_trait]
impl MxLookup for StaticMx {
    async fn lookup(&self, domain: &str) -> Result<MxRecords, DnsError> {
        self.records
            .get(&domain.to_lowercase())
            .map(|servers| MxRecords {
                servers: servers.clone(),
                ttl: FALLBACK_TTL,
            })
            .ok_or_else(|| DnsError::NoMailServers(domain.to_string()))
    }
}

#[derive(Debug)]
pub struct MxResolver {
    lookup: Arc<dyn MxLookup>,
    cache: TtlCache<String, Arc<Vec<MailServer>>>,
    config: MxConfig,
}

impl MxResolver {
    pub fn new(lookup: Arc<dyn MxLookup>, config: MxConfig) -> Self {
        Self {
            lookup,
            cache: TtlCache::with_capacity(config.capacity),
            config,
        }
    }

    /// Mail exchangers for `domain`, most preferred first.
    ///
    /// # Errors
    /// [`DnsError::NoMailServers`] when the domain names none, otherwise the lookup failure
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError> {
        let domain = domain.to_lowercase();

        if let Some(servers) = self.cache.get(&domain) {
            debug!("MX cache hit for {domain}, {} server(s)", servers.len());
            return Ok(servers);
        }

        let MxRecords { mut servers, ttl } = self.lookup.lookup(&domain).await?;
        if servers.is_empty() {
            return Err(DnsError::NoMailServers(domain));
        }

        servers.sort_by_key(|server| server.preference);
        let servers = Arc::new(servers);

        let ttl = self.config.cache_ttl(ttl);

        debug!("Caching {} MX host(s) for {domain} for {}s", servers.len(), ttl.as_secs());
        self.cache.insert_with_ttl(domain, Arc::clone(&servers), ttl);

        Ok(servers)
    }
}
