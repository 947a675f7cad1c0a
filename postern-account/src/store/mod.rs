//! The account datastore seam.
//!
//! Every read filters out unverified and soft-deleted rows, so callers never have to.

mod memory;
mod postgres;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use ulid::Ulid;

pub use self::{
    memory::{Calls, MemoryDatastore},
    postgres::PgDatastore,
};
use crate::{
    error::StoreError,
    model::{Account, Alias, Destination, Domain, ReturnPath},
};

#[async_trait]
pub trait Datastore: Debug + Send + Sync {
    /// A verified, non-deleted domain by name.
    async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, StoreError>;

    /// Every verified, non-deleted alias of a domain, in one consistent read.
    async fn aliases_for_domain(&self, domain_id: i64) -> Result<Vec<Alias>, StoreError>;

    async fn destinations_for_alias(&self, alias_id: i64) -> Result<Vec<Destination>, StoreError>;

    async fn return_path(&self, id: Ulid) -> Result<Option<ReturnPath>, StoreError>;

    async fn insert_return_path(&self, return_path: &ReturnPath) -> Result<(), StoreError>;

    /// PEM encoded private key, only for verified domains.
    async fn dkim_private_key(&self, domain_id: i64) -> Result<Option<String>, StoreError>;

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub enum DatastoreConfig {
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
    #[default]
    Memory,
}

const fn default_max_connections() -> u32 {
    10
}

impl DatastoreConfig {
    /// Open the configured datastore.
    ///
    /// `url_override` replaces the configured database URL, e.g. from the environment.
    ///
    /// # Errors
    /// If the database cannot be reached
    pub async fn connect(
        &self,
        url_override: Option<String>,
    ) -> Result<Arc<dyn Datastore>, StoreError> {
        match self {
            Self::Postgres {
                url,
                max_connections,
            } => {
                let url = url_override.unwrap_or_else(|| url.clone());
                Ok(Arc::new(PgDatastore::connect(&url, *max_connections).await?))
            }
            Self::Memory => Ok(Arc::new(MemoryDatastore::default())),
        }
    }
}
