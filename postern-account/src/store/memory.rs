use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use ulid::Ulid;

use super::Datastore;
use crate::{
    error::StoreError,
    model::{Account, Alias, Destination, Domain, ReturnPath},
};

/// Number of times each datastore read has been issued.
#[derive(Debug, Default)]
pub struct Calls {
    pub domain_by_name: AtomicUsize,
    pub aliases_for_domain: AtomicUsize,
    pub destinations_for_alias: AtomicUsize,
    pub return_path: AtomicUsize,
    pub dkim_private_key: AtomicUsize,
    pub account_by_username: AtomicUsize,
}

impl Calls {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Tables {
    domains: Vec<Domain>,
    aliases: Vec<(Alias, bool)>,
    destinations: Vec<Destination>,
    alias_destinations: Vec<(i64, i64)>,
    return_paths: HashMap<Ulid, ReturnPath>,
    dkim_keys: HashMap<i64, String>,
    accounts: Vec<Account>,
}

/// A datastore held entirely in memory, with call counting for tests.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    tables: RwLock<Tables>,
    pub calls: Calls,
}

impl MemoryDatastore {
    pub fn add_domain(&self, domain: Domain) {
        self.tables.write().domains.push(domain);
    }

    /// Unverified aliases are stored but never returned.
    pub fn add_alias(&self, alias: Alias, verified: bool) {
        self.tables.write().aliases.push((alias, verified));
    }

    pub fn add_destination(&self, alias_id: i64, destination: Destination) {
        let mut tables = self.tables.write();
        tables.alias_destinations.push((alias_id, destination.id));
        if !tables.destinations.iter().any(|d| d.id == destination.id) {
            tables.destinations.push(destination);
        }
    }

    pub fn add_dkim_key(&self, domain_id: i64, pem: impl Into<String>) {
        self.tables.write().dkim_keys.insert(domain_id, pem.into());
    }

    pub fn add_account(&self, account: Account) {
        self.tables.write().accounts.push(account);
    }

    pub fn return_paths(&self) -> Vec<ReturnPath> {
        self.tables.read().return_paths.values().cloned().collect()
    }

    fn usable_domain(tables: &Tables, domain_id: i64) -> bool {
        tables
            .domains
            .iter()
            .any(|domain| domain.id == domain_id && domain.is_usable())
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, StoreError> {
        Calls::bump(&self.calls.domain_by_name);

        Ok(self
            .tables
            .read()
            .domains
            .iter()
            .find(|domain| domain.name == name && domain.is_usable())
            .cloned())
    }

    async fn aliases_for_domain(&self, domain_id: i64) -> Result<Vec<Alias>, StoreError> {
        Calls::bump(&self.calls.aliases_for_domain);

        let tables = self.tables.read();
        if !Self::usable_domain(&tables, domain_id) {
            return Ok(Vec::new());
        }

        Ok(tables
            .aliases
            .iter()
            .filter(|(alias, verified)| *verified && alias.domain_id == domain_id)
            .map(|(alias, _)| alias.clone())
            .collect())
    }

    async fn destinations_for_alias(&self, alias_id: i64) -> Result<Vec<Destination>, StoreError> {
        Calls::bump(&self.calls.destinations_for_alias);

        let tables = self.tables.read();
        Ok(tables
            .alias_destinations
            .iter()
            .filter(|(alias, _)| *alias == alias_id)
            .filter_map(|(_, destination)| {
                tables.destinations.iter().find(|d| d.id == *destination)
            })
            .cloned()
            .collect())
    }

    async fn return_path(&self, id: Ulid) -> Result<Option<ReturnPath>, StoreError> {
        Calls::bump(&self.calls.return_path);

        Ok(self.tables.read().return_paths.get(&id).cloned())
    }

    async fn insert_return_path(&self, return_path: &ReturnPath) -> Result<(), StoreError> {
        self.tables
            .write()
            .return_paths
            .insert(return_path.id, return_path.clone());
        Ok(())
    }

    async fn dkim_private_key(&self, domain_id: i64) -> Result<Option<String>, StoreError> {
        Calls::bump(&self.calls.dkim_private_key);

        let tables = self.tables.read();
        if !Self::usable_domain(&tables, domain_id) {
            return Ok(None);
        }

        Ok(tables.dkim_keys.get(&domain_id).cloned())
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Calls::bump(&self.calls.account_by_username);

        Ok(self
            .tables
            .read()
            .accounts
            .iter()
            .find(|account| account.username == username)
            .cloned())
    }
}
