//! Reverse DNS (PTR) lookups for `Received:` headers and startup checks.

use std::{collections::HashMap, fmt::Debug, net::IpAddr};

use async_trait::async_trait;
use hickory_resolver::{TokioResolver, name_server::TokioConnectionProvider};

#[async_trait]
pub trait ReverseLookup: Debug + Send + Sync {
    /// PTR names for `ip` without their trailing dot. Empty when none exist.
    async fn lookup(&self, ip: IpAddr) -> Vec<String>;
}

#[derive(Debug)]
pub struct DnsReverseLookup {
    resolver: TokioResolver,
}

impl DnsReverseLookup {
    /// # Errors
    /// If the system resolver configuration cannot be read
    pub fn from_system_conf() -> Result<Self, hickory_resolver::ResolveError> {
        Ok(Self {
            resolver: TokioResolver::builder(TokioConnectionProvider::default())?.build(),
        })
    }
}

#[async_trait]
impl ReverseLookup for DnsReverseLookup {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn lookup(&self, ip: IpAddr) -> Vec<String> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(names) => names
                .iter()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .collect(),
            Err(err) => {
                tracing::debug!("PTR lookup for {ip} failed: {err}");
                Vec::new()
            }
        }
    }
}

/// Fixed PTR answers.
#[derive(Debug, Default, Clone)]
pub struct StaticReverseLookup {
    names: HashMap<IpAddr, String>,
}

impl StaticReverseLookup {
    #[must_use]
    pub fn with(mut self, ip: IpAddr, name: impl Into<String>) -> Self {
        self.names.insert(ip, name.into());
        self
    }
}

#[async_trait]
impl ReverseLookup for StaticReverseLookup {
    async fn lookup(&self, ip: IpAddr) -> Vec<String> {
        self.names.get(&ip).cloned().into_iter().collect()
    }
}
