use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use ulid::Ulid;

use super::Datastore;
use crate::{
    error::StoreError,
    model::{Account, Alias, Destination, Domain, ReturnPath},
};

/// PostgreSQL backed datastore. See `schema.sql` for the expected tables.
#[derive(Debug, Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    /// # Errors
    /// If the pool cannot establish its first connection
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, StoreError> {
        Ok(sqlx::query_as::<_, Domain>(
            "SELECT id, account_id, name, verified_at, deleted_at FROM domains \
             WHERE name = $1 AND deleted_at IS NULL AND verified_at IS NOT NULL",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn aliases_for_domain(&self, domain_id: i64) -> Result<Vec<Alias>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, i64, i64, String)>(
            "SELECT a.id, a.account_id, a.domain_id, a.rule FROM aliases a \
             JOIN domains d ON d.id = a.domain_id \
             WHERE a.domain_id = $1 \
               AND a.deleted_at IS NULL AND a.verified_at IS NOT NULL \
               AND d.deleted_at IS NULL AND d.verified_at IS NOT NULL",
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, account_id, domain_id, rule)| Alias::new(id, account_id, domain_id, rule))
            .collect())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn destinations_for_alias(&self, alias_id: i64) -> Result<Vec<Destination>, StoreError> {
        Ok(sqlx::query_as::<_, Destination>(
            "SELECT d.id, d.account_id, d.address FROM destinations d \
             JOIN alias_destinations ad ON ad.destination_id = d.id \
             WHERE ad.alias_id = $1 AND d.deleted_at IS NULL AND d.verified_at IS NOT NULL",
        )
        .bind(alias_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn return_path(&self, id: Ulid) -> Result<Option<ReturnPath>, StoreError> {
        let row = sqlx::query_as::<_, (i64, i64, String, DateTime<Utc>)>(
            "SELECT account_id, alias_id, return_to, created_at FROM return_paths WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(
            row.map(|(account_id, alias_id, return_to, created_at)| ReturnPath {
                id,
                account_id,
                alias_id,
                return_to,
                created_at,
            }),
        )
    }

    #[tracing::instrument(level = "trace", skip(self), fields(id = %return_path.id))]
    async fn insert_return_path(&self, return_path: &ReturnPath) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO return_paths (id, account_id, alias_id, return_to, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(return_path.id.to_string())
        .bind(return_path.account_id)
        .bind(return_path.alias_id)
        .bind(&return_path.return_to)
        .bind(return_path.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn dkim_private_key(&self, domain_id: i64) -> Result<Option<String>, StoreError> {
        Ok(sqlx::query_as::<_, (String,)>(
            "SELECT k.private_key FROM dkim_keys k \
             JOIN domains d ON d.id = k.domain_id \
             WHERE k.domain_id = $1 AND d.deleted_at IS NULL AND d.verified_at IS NOT NULL",
        )
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|(key,)| key))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(sqlx::query_as::<_, Account>(
            "SELECT id, username, password_hash, log_level FROM accounts WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }
}
