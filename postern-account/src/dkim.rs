use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::Duration,
};

use mail_auth::{
    common::{
        crypto::{RsaKey, Sha256},
        headers::HeaderWriter,
    },
    dkim::{DkimSigner as Signer, Done},
};
use postern_common::cache::TtlCache;

use crate::{config::CacheConfig, error::DkimError, model::Domain, store::Datastore};

type DomainSigner = Signer<RsaKey<Sha256>, Done>;

pub const DEFAULT_SELECTOR: &str = "default";

const SIGNED_HEADERS: [&str; 9] = [
    "From",
    "To",
    "Cc",
    "Subject",
    "Date",
    "Message-ID",
    "Reply-To",
    "MIME-Version",
    "Content-Type",
];

/// Signs outgoing mail with the per-domain RSA key.
///
/// Parsed keys are cached per domain id.
pub struct DkimSigner {
    store: Arc<dyn Datastore>,
    selector: String,
    signers: TtlCache<i64, Arc<DomainSigner>>,
    ttl: Duration,
}

impl Debug for DkimSigner {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("DkimSigner")
            .field("selector", &self.selector)
            .field("cached", &self.signers.len())
            .finish_non_exhaustive()
    }
}

impl DkimSigner {
    pub fn new(store: Arc<dyn Datastore>, selector: impl Into<String>, config: &CacheConfig) -> Self {
        Self {
            store,
            selector: selector.into(),
            signers: TtlCache::with_capacity(config.capacity),
            ttl: CacheConfig::secs(config.dkim_secs),
        }
    }

    async fn signer(&self, domain: &Domain) -> Result<Arc<DomainSigner>, DkimError> {
        if let Some(signer) = self.signers.get(&domain.id) {
            return Ok(signer);
        }

        let pem = self
            .store
            .dkim_private_key(domain.id)
            .await?
            .ok_or_else(|| DkimError::MissingKey(domain.name.clone()))?;

        let key = RsaKey::<Sha256>::from_rsa_pem(&pem).map_err(|err| DkimError::InvalidKey {
            domain: domain.name.clone(),
            reason: err.to_string(),
        })?;

        let signer = Arc::new(
            Signer::from_key(key)
                .domain(domain.name.clone())
                .selector(self.selector.clone())
                .headers(SIGNED_HEADERS),
        );

        self.signers
            .insert_with_ttl(domain.id, Arc::clone(&signer), self.ttl);

        Ok(signer)
    }

    /// Prepend a `DKIM-Signature` header to `message`.
    ///
    /// # Errors
    /// If the domain is not verified, has no usable key, or signing fails
    #[tracing::instrument(level = "trace", skip(self, message), fields(domain = %domain.name))]
    pub async fn sign(&self, domain: &Domain, message: &[u8]) -> Result<Vec<u8>, DkimError> {
        if !domain.is_usable() {
            return Err(DkimError::DomainNotVerified(domain.name.clone()));
        }

        let signature = self
            .signer(domain)
            .await?
            .sign(message)
            .map_err(|err| DkimError::Signing {
                domain: domain.name.clone(),
                reason: err.to_string(),
            })?;

        let header = signature.to_header();
        let mut signed = Vec::with_capacity(header.len() + message.len());
        signed.extend_from_slice(header.as_bytes());
        signed.extend_from_slice(message);

        Ok(signed)
    }
}
