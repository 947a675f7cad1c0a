use postern_common::address::AddressError;
use thiserror::Error;

/// Failures talking to the account datastore.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("no verified domain named '{0}'")]
    DomainNotFound(String),

    #[error("no alias matches '{address}'")]
    NoMatchingAlias {
        address: String,
        account_id: i64,
        domain_id: i64,
    },

    #[error("'{0}' is not a return-path address")]
    NotReturnPath(String),

    #[error("{operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ResolveError {
    pub(crate) fn store(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { operation, source }
    }

    /// Whether the failure may clear up on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store { .. })
    }

    /// `(account_id, domain_id, alias_id)` established before the failure.
    pub const fn partial_ids(&self) -> (i64, i64, i64) {
        match self {
            Self::NoMatchingAlias {
                account_id,
                domain_id,
                ..
            } => (*account_id, *domain_id, 0),
            _ => (0, 0, 0),
        }
    }
}

#[derive(Debug, Error)]
pub enum DkimError {
    #[error("domain '{0}' is not verified")]
    DomainNotVerified(String),

    #[error("no DKIM key for domain '{0}'")]
    MissingKey(String),

    #[error("invalid DKIM key for domain '{domain}': {reason}")]
    InvalidKey { domain: String, reason: String },

    #[error("DKIM signing failed for domain '{domain}': {reason}")]
    Signing { domain: String, reason: String },

    #[error("load DKIM key: {0}")]
    Store(#[from] StoreError),
}

impl DkimError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Also returned for usernames that recently failed, so existence is not disclosed.
    #[error("authentication unsupported")]
    Unsupported,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("load credentials: {0}")]
    Store(#[from] StoreError),
}
