//! Domain, alias and return-path resolution with positive and negative caching.

use std::sync::Arc;

use postern_common::{
    address::EmailAddress,
    cache::{Cached, LookupCache, TtlCache},
};

use crate::{
    config::CacheConfig,
    error::ResolveError,
    model::{Alias, Domain, ReturnPath},
    return_path,
    store::Datastore,
};

#[derive(Debug)]
pub struct Resolver {
    store: Arc<dyn Datastore>,
    domains: LookupCache<String, Domain>,
    alias_sets: TtlCache<String, Arc<[Alias]>>,
    alias_ttl: std::time::Duration,
    unmatched: TtlCache<String, ()>,
    unmatched_ttl: std::time::Duration,
    return_paths: LookupCache<String, ReturnPath>,
}

impl Resolver {
    pub fn new(store: Arc<dyn Datastore>, config: &CacheConfig) -> Self {
        Self {
            store,
            domains: LookupCache::new(
                config.capacity,
                CacheConfig::secs(config.domain_secs),
                CacheConfig::secs(config.domain_missing_secs),
            ),
            alias_sets: TtlCache::with_capacity(config.capacity),
            alias_ttl: CacheConfig::secs(config.alias_secs),
            unmatched: TtlCache::with_capacity(config.capacity),
            unmatched_ttl: CacheConfig::secs(config.alias_missing_secs),
            return_paths: LookupCache::new(
                config.capacity,
                CacheConfig::secs(config.return_path_secs),
                CacheConfig::secs(config.return_path_missing_secs),
            ),
        }
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    /// The verified domain an address belongs to.
    ///
    /// # Errors
    /// An [`ResolveError::Address`] for malformed addresses, before any lookup is made,
    /// [`ResolveError::DomainNotFound`] for unknown, unverified or deleted domains.
    pub async fn resolve_domain(&self, address: &str) -> Result<Domain, ResolveError> {
        let address = EmailAddress::parse(address)?;
        self.domain(address.domain()).await
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn domain(&self, name: &str) -> Result<Domain, ResolveError> {
        match self.domains.get(&name.to_string()) {
            Some(Cached::Found(domain)) => return Ok(domain),
            Some(Cached::Missing) => return Err(ResolveError::DomainNotFound(name.to_string())),
            None => {}
        }

        let domain = self
            .store
            .domain_by_name(name)
            .await
            .map_err(ResolveError::store("resolve domain"))?;

        match domain {
            Some(domain) if domain.is_usable() => {
                self.domains.found(name.to_string(), domain.clone());
                Ok(domain)
            }
            _ => {
                self.domains.missing(name.to_string());
                Err(ResolveError::DomainNotFound(name.to_string()))
            }
        }
    }

    async fn alias_set(&self, domain: &Domain) -> Result<Arc<[Alias]>, ResolveError> {
        if let Some(aliases) = self.alias_sets.get(&domain.name) {
            return Ok(aliases);
        }

        let mut aliases = self
            .store
            .aliases_for_domain(domain.id)
            .await
            .map_err(ResolveError::store("load alias set"))?;

        aliases.sort_by(|a, b| b.rule.len().cmp(&a.rule.len()));

        let aliases: Arc<[Alias]> = aliases.into();
        self.alias_sets
            .insert_with_ttl(domain.name.clone(), Arc::clone(&aliases), self.alias_ttl);

        Ok(aliases)
    }

    /// The alias an address forwards through. Longer rules are tried first.
    ///
    /// # Errors
    /// Address and domain errors as for [`Self::resolve_domain`], or
    /// [`ResolveError::NoMatchingAlias`] carrying the domain it got as far as.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn resolve_alias(&self, address: &str) -> Result<Alias, ResolveError> {
        let address = EmailAddress::parse(address)?;
        let domain = self.domain(address.domain()).await?;

        let no_match = || ResolveError::NoMatchingAlias {
            address: address.to_string(),
            account_id: domain.account_id,
            domain_id: domain.id,
        };

        let key = address.to_string();
        if self.unmatched.get(&key).is_some() {
            return Err(no_match());
        }

        let aliases = self.alias_set(&domain).await?;

        if let Some(alias) = aliases.iter().find(|alias| alias.matches(address.local())) {
            return Ok(alias.clone());
        }

        self.unmatched.insert_with_ttl(key, (), self.unmatched_ttl);
        Err(no_match())
    }

    /// The original envelope behind a generated return-path address.
    ///
    /// # Errors
    /// [`ResolveError::NotReturnPath`] when the address is not one, or no row matches.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn resolve_return_path(&self, address: &str) -> Result<ReturnPath, ResolveError> {
        let address = EmailAddress::parse(address)?;
        let key = address.to_string();

        match self.return_paths.get(&key) {
            Some(Cached::Found(return_path)) => return Ok(return_path),
            Some(Cached::Missing) => return Err(ResolveError::NotReturnPath(key)),
            None => {}
        }

        let Some(id) = return_path::envelope_id(&address) else {
            self.return_paths.missing(key.clone());
            return Err(ResolveError::NotReturnPath(key));
        };

        let found = self
            .store
            .return_path(id)
            .await
            .map_err(ResolveError::store("resolve return path"))?;

        if let Some(return_path) = found {
            self.return_paths.found(key, return_path.clone());
            Ok(return_path)
        } else {
            self.return_paths.missing(key.clone());
            Err(ResolveError::NotReturnPath(key))
        }
    }
}
