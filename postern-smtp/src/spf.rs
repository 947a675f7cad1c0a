//! Sender Policy Framework checks made at `MAIL FROM`.

use core::fmt::{self, Display, Formatter};
use std::{io, net::IpAddr};

use async_trait::async_trait;
use mail_auth::SpfResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfOutcome {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
}

impl SpfOutcome {
    /// Only an explicit `-all` style failure rejects the sender.
    pub const fn rejects(self) -> bool {
        matches!(self, Self::Fail)
    }
}

impl From<SpfResult> for SpfOutcome {
    fn from(result: SpfResult) -> Self {
        match result {
            SpfResult::Pass => Self::Pass,
            SpfResult::Fail => Self::Fail,
            SpfResult::SoftFail => Self::SoftFail,
            SpfResult::Neutral => Self::Neutral,
            SpfResult::TempError => Self::TempError,
            SpfResult::PermError => Self::PermError,
            SpfResult::None => Self::None,
        }
    }
}

impl Display for SpfOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "SPF Pass",
            Self::Fail => "SPF Fail",
            Self::SoftFail => "SPF SoftFail",
            Self::Neutral => "SPF Neutral",
            Self::None => "SPF None",
            Self::TempError => "SPF TempError",
            Self::PermError => "SPF PermError",
        })
    }
}

#[async_trait]
pub trait SpfVerifier: fmt::Debug + Send + Sync {
    /// Evaluate `sender` for a client at `ip` that greeted with `helo`.
    async fn verify(&self, ip: IpAddr, helo: &str, sender: &str) -> SpfOutcome;
}

/// DNS backed verification through `mail-auth`.
pub struct MailAuthSpf {
    resolver: mail_auth::Resolver,
    host_domain: String,
}

impl fmt::Debug for MailAuthSpf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailAuthSpf")
            .field("host_domain", &self.host_domain)
            .finish_non_exhaustive()
    }
}

impl MailAuthSpf {
    /// # Errors
    /// If the system resolver configuration cannot be read
    pub fn from_system_conf(host_domain: impl Into<String>) -> io::Result<Self> {
        Ok(Self {
            resolver: mail_auth::Resolver::new_system_conf()
                .map_err(|err| io::Error::other(err.to_string()))?,
            host_domain: host_domain.into(),
        })
    }
}

#[async_trait]
impl SpfVerifier for MailAuthSpf {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn verify(&self, ip: IpAddr, helo: &str, sender: &str) -> SpfOutcome {
        self.resolver
            .verify_spf_sender(ip, helo, &self.host_domain, sender)
            .await
            .result()
            .into()
    }
}

/// Always answers with the same outcome.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpf(pub SpfOutcome);

#[async_trait]
impl SpfVerifier for FixedSpf {
    async fn verify(&self, _ip: IpAddr, _helo: &str, _sender: &str) -> SpfOutcome {
        self.0
    }
}
