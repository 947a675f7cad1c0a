pub mod client;
pub mod command;
pub mod connection;
pub mod context;
pub mod error;
pub mod extensions;
pub mod handler;
pub mod rdns;
pub mod session;
pub mod spf;
pub mod state;

use std::{net::SocketAddr, sync::Arc};

use postern_common::{
    Signal,
    config::ServerTimeouts,
    error::{ProtocolError, SessionError},
    traits::protocol::{Protocol, SessionHandler},
};
use serde::Deserialize;
use tokio::net::TcpStream;

pub use crate::{
    command::MailParameters,
    connection::TlsContext,
    context::ListenerMode,
    handler::{InboundHandler, Services, SubmissionHandler, TransactionHandler},
    session::{Session, SessionConfig},
    state::State,
};

const MAX_MESSAGE_SIZE: usize = 25 * 1024 * 1024;

const fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

/// Serves both listener modes from one set of handlers.
#[derive(Clone)]
pub struct Smtp {
    inbound: Arc<InboundHandler>,
    submission: Arc<SubmissionHandler>,
}

impl Smtp {
    pub fn new(services: &Services) -> Self {
        Self {
            inbound: Arc::new(InboundHandler::new(services.clone())),
            submission: Arc::new(SubmissionHandler::new(services.clone())),
        }
    }

    fn handler(&self, mode: ListenerMode) -> Arc<dyn TransactionHandler> {
        match mode {
            ListenerMode::Inbound => Arc::clone(&self.inbound) as Arc<dyn TransactionHandler>,
            ListenerMode::Submission => Arc::clone(&self.submission) as Arc<dyn TransactionHandler>,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SmtpArgs {
    #[serde(default)]
    pub mode: ListenerMode,
    #[serde(default)]
    pub tls: Option<TlsContext>,
    /// Host name used in the greeting and trace headers.
    #[serde(default)]
    pub banner: String,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub timeouts: ServerTimeouts,
}

impl SmtpArgs {
    #[must_use]
    pub fn builder() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: ListenerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the TLS context for STARTTLS support
    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsContext>) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig::builder()
            .with_mode(self.mode)
            .with_tls_context(self.tls.clone())
            .with_banner(self.banner.clone())
            .with_max_message_size(self.max_message_size)
            .with_timeouts(self.timeouts)
            .build()
    }
}

impl Protocol for Smtp {
    type Session = Session<TcpStream>;
    type Args = SmtpArgs;

    fn ty() -> &'static str {
        "SMTP"
    }

    #[tracing::instrument(level = "trace", skip(self, stream, args))]
    fn handle(&self, stream: TcpStream, peer: SocketAddr, args: &Self::Args) -> Self::Session {
        Session::create(stream, peer, self.handler(args.mode), args.session_config())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn validate(&self, args: &Self::Args) -> Result<(), ProtocolError> {
        if let Some(tls) = args.tls.as_ref() {
            if !tls.certificate.try_exists()? {
                return Err(ProtocolError::InvalidConfiguration {
                    field: String::from("tls.certificate"),
                    reason: format!("Unable to find TLS Certificate {}", tls.certificate.display()),
                });
            }

            if !tls.key.try_exists()? {
                return Err(ProtocolError::InvalidConfiguration {
                    field: String::from("tls.key"),
                    reason: format!("Unable to find TLS Key {}", tls.key.display()),
                });
            }

            tls.acceptor()
                .map_err(|err| ProtocolError::InvalidConfiguration {
                    field: String::from("tls"),
                    reason: err.to_string(),
                })?;
        }

        if args.banner.is_empty() && args.mode == ListenerMode::Submission {
            tracing::warn!("Submission listener has no banner, falling back to $HOSTNAME");
        }

        Ok(())
    }
}

impl SessionHandler for Session<TcpStream> {
    async fn run(self, signal: tokio::sync::broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        Self::run(self, signal).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn args_defaults() {
        let args: SmtpArgs = ron::from_str("(mode: Submission, banner: \"smtp.test\")").unwrap();

        assert_eq!(args.mode, ListenerMode::Submission);
        assert_eq!(args.max_message_size, MAX_MESSAGE_SIZE);
        assert!(args.tls.is_none());
    }

    #[test]
    fn missing_certificate_is_rejected() {
        let args = SmtpArgs::builder().with_tls(Some(TlsContext {
            certificate: PathBuf::from("/nonexistent/cert.pem"),
            key: PathBuf::from("/nonexistent/key.pem"),
        }));

        let store = Arc::new(postern_account::MemoryDatastore::default());
        let services = test_services(store);
        assert!(Smtp::new(&services).validate(&args).is_err());
    }

    fn test_services(store: Arc<postern_account::MemoryDatastore>) -> Services {
        let config = postern_account::CacheConfig::default();
        Services {
            resolver: Arc::new(postern_account::Resolver::new(store.clone(), &config)),
            signer: Arc::new(postern_account::DkimSigner::new(store.clone(), "default", &config)),
            authenticator: Arc::new(postern_account::Authenticator::new(store, &config)),
            publisher: postern_queue::Publisher::new(Arc::new(postern_queue::MemoryBroker::default())),
            spf: Arc::new(spf::FixedSpf(spf::SpfOutcome::Pass)),
            rdns: Arc::new(rdns::StaticReverseLookup::default()),
        }
    }
}
