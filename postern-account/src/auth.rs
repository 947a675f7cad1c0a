use std::{sync::Arc, time::Duration};

use postern_common::cache::TtlCache;

use crate::{config::CacheConfig, error::AuthError, model::Account, store::Datastore};

/// Verifies submission credentials against bcrypt hashes.
///
/// Accounts are cached by username once fetched. A username that fails is remembered for
/// a short while, and further attempts against it are answered with
/// [`AuthError::Unsupported`] without touching the datastore or running bcrypt.
#[derive(Debug)]
pub struct Authenticator {
    store: Arc<dyn Datastore>,
    accounts: TtlCache<String, Arc<Account>>,
    account_ttl: Duration,
    failed: TtlCache<String, ()>,
    failed_ttl: Duration,
}

impl Authenticator {
    pub fn new(store: Arc<dyn Datastore>, config: &CacheConfig) -> Self {
        Self {
            store,
            accounts: TtlCache::with_capacity(config.capacity),
            account_ttl: CacheConfig::secs(config.auth_secs),
            failed: TtlCache::with_capacity(config.capacity),
            failed_ttl: CacheConfig::secs(config.auth_failed_secs),
        }
    }

    /// # Errors
    /// [`AuthError::InvalidCredentials`] on an unknown user or wrong password,
    /// [`AuthError::Unsupported`] while that username is negatively cached.
    #[tracing::instrument(level = "trace", skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<Account>, AuthError> {
        let username = username.trim().to_lowercase();

        if self.failed.get(&username).is_some() {
            return Err(AuthError::Unsupported);
        }

        let account = match self.accounts.get(&username) {
            Some(account) => account,
            None => {
                let Some(account) = self.store.account_by_username(&username).await? else {
                    self.reject(username);
                    return Err(AuthError::InvalidCredentials);
                };

                let account = Arc::new(account);
                self.accounts
                    .insert_with_ttl(username.clone(), Arc::clone(&account), self.account_ttl);
                account
            }
        };

        let hash = account.password_hash.clone();
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;

        match verified {
            Ok(true) => Ok(account),
            Ok(false) => {
                self.reject(username);
                Err(AuthError::InvalidCredentials)
            }
            Err(err) => {
                tracing::warn!(%username, "Stored password hash is unusable: {err}");
                self.reject(username);
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    fn reject(&self, username: String) {
        self.failed.insert_with_ttl(username, (), self.failed_ttl);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::Authenticator;
    use crate::{
        config::CacheConfig,
        error::AuthError,
        model::Account,
        store::{Calls, MemoryDatastore},
    };

    fn store() -> Arc<MemoryDatastore> {
        let store = Arc::new(MemoryDatastore::default());
        store.add_account(Account {
            id: 7,
            username: "owner@example.com".to_string(),
            password_hash: bcrypt::hash("hunter2", 4).unwrap(),
            log_level: 0,
        });
        store
    }

    #[tokio::test]
    async fn valid_credentials_are_cached() {
        let store = store();
        let auth = Authenticator::new(store.clone(), &CacheConfig::default());

        let account = auth.authenticate("Owner@Example.com", "hunter2").await.unwrap();
        assert_eq!(account.id, 7);

        auth.authenticate("owner@example.com", "hunter2").await.unwrap();
        assert_eq!(Calls::get(&store.calls.account_by_username), 1);
    }

    #[tokio::test]
    async fn failures_are_negatively_cached() {
        let store = store();
        let auth = Authenticator::new(store.clone(), &CacheConfig::default());

        assert!(matches!(
            auth.authenticate("owner@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.authenticate("owner@example.com", "hunter2").await,
            Err(AuthError::Unsupported)
        ));

        assert!(matches!(
            auth.authenticate("ghost@example.com", "x").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.authenticate("ghost@example.com", "x").await,
            Err(AuthError::Unsupported)
        ));
        assert_eq!(Calls::get(&store.calls.account_by_username), 2);
    }
}
