use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use postern_common::{config::ClientTimeouts, envelope::Envelope, internal};
use tokio::net::{TcpSocket, TcpStream};

use crate::{
    dns::{MailServer, MxResolver},
    error::DeliveryError,
    transaction::SmtpTransaction,
};

/// Opens outbound connections from a fixed source address.
#[derive(Debug, Clone, Copy)]
pub struct Dialer {
    source: IpAddr,
    timeout: Duration,
}

impl Dialer {
    pub const fn new(source: IpAddr, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Connect to the first address of `server` in the source's family.
    ///
    /// # Errors
    /// A dial failure when no address accepts a connection, [`DeliveryError::Bind`]
    /// when the source address is unusable.
    pub async fn dial(&self, server: &MailServer) -> Result<TcpStream, DeliveryError> {
        let address = server.address();
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((server.host.as_str(), server.port))
            .await
            .map_err(|source| DeliveryError::HostLookup {
                server: address.clone(),
                source,
            })?
            .filter(|candidate| candidate.is_ipv4() == self.source.is_ipv4())
            .collect();

        let mut last = DeliveryError::NoAddress {
            server: address.clone(),
            source_ip: self.source,
        };

        for candidate in candidates {
            let socket = match candidate {
                SocketAddr::V4(_) => TcpSocket::new_v4(),
                SocketAddr::V6(_) => TcpSocket::new_v6(),
            }
            .map_err(|source| DeliveryError::Bind {
                ip: self.source,
                source,
            })?;

            socket
                .bind(SocketAddr::new(self.source, 0))
                .map_err(|source| DeliveryError::Bind {
                    ip: self.source,
                    source,
                })?;

            match tokio::time::timeout(self.timeout, socket.connect(candidate)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(source)) => {
                    last = DeliveryError::Dial {
                        server: address.clone(),
                        source,
                    };
                }
                Err(_) => {
                    last = DeliveryError::DialTimeout {
                        server: address.clone(),
                        timeout: self.timeout,
                    };
                }
            }
        }

        Err(last)
    }
}

/// Delivers envelopes to their recipient's mail exchangers.
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    mx: Arc<MxResolver>,
    dialer: Dialer,
    helo: String,
    session_deadline: Duration,
    accept_invalid_certs: bool,
}

impl DeliveryEngine {
    pub fn new(
        mx: Arc<MxResolver>,
        source: IpAddr,
        helo: impl Into<String>,
        timeouts: ClientTimeouts,
    ) -> Self {
        Self {
            mx,
            dialer: Dialer::new(source, timeouts.dial()),
            helo: helo.into(),
            session_deadline: timeouts.session(),
            accept_invalid_certs: false,
        }
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn helo(&self) -> &str {
        &self.helo
    }

    /// Try each mail exchanger in preference order until one accepts a connection.
    ///
    /// Returns the server used and its final reply. Only a failure to connect moves on
    /// to the next host, anything after that is the outcome.
    ///
    /// # Errors
    /// The address, resolution or dialog failure that ended the attempt, or
    /// [`DeliveryError::Unreachable`] when no host could be reached.
    #[tracing::instrument(level = "debug", skip(self, envelope), fields(id = %envelope.id, to = %envelope.to))]
    pub async fn deliver(&self, envelope: &Envelope) -> Result<(MailServer, String), DeliveryError> {
        let recipient = envelope.recipient()?;
        let domain = recipient.domain();

        let servers = self
            .mx
            .resolve(domain)
            .await
            .map_err(|source| DeliveryError::Dns {
                domain: domain.to_string(),
                source,
            })?;

        let mut last = None;
        for server in servers.iter() {
            match self.attempt(envelope, server).await {
                Ok(reply) => return Ok((server.clone(), reply)),
                Err(err) if err.is_dial_failure() => {
                    internal!(level = WARN, "{}: {err}", envelope.id);
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(DeliveryError::Unreachable {
            domain: domain.to_string(),
            attempts: servers.len(),
            last: last.map(|err| err.to_string()).unwrap_or_default(),
        })
    }

    /// Connecting is bounded by the dial timeout per address; the session
    /// deadline starts once a connection is open.
    async fn attempt(&self, envelope: &Envelope, server: &MailServer) -> Result<String, DeliveryError> {
        let stream = self.dialer.dial(server).await?;
        internal!(level = DEBUG, "{}: connected to {}", envelope.id, server.address());

        let dialog = SmtpTransaction::new(envelope, server, &self.helo)
            .accept_invalid_certs(self.accept_invalid_certs)
            .execute(stream);

        tokio::time::timeout(self.session_deadline, dialog)
            .await
            .unwrap_or_else(|_| {
                Err(DeliveryError::Deadline {
                    server: server.address(),
                    deadline: self.session_deadline,
                })
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{config::MxConfig, dns::StaticMx};

    fn engine(lookup: StaticMx) -> DeliveryEngine {
        engine_with(lookup, ClientTimeouts::default())
    }

    fn engine_with(lookup: StaticMx, timeouts: ClientTimeouts) -> DeliveryEngine {
        DeliveryEngine::new(
            Arc::new(MxResolver::new(Arc::new(lookup), MxConfig::default())),
            IpAddr::from([127, 0, 0, 1]),
            "mx1.postern.test",
            timeouts,
        )
    }

    fn to_other() -> Envelope {
        Envelope {
            to: String::from("dest@other.com"),
            ..Envelope::default()
        }
    }

    #[tokio::test]
    async fn malformed_recipient_never_resolves() {
        let envelope = Envelope {
            to: String::from("not-an-address"),
            ..Envelope::default()
        };

        assert!(matches!(
            engine(StaticMx::default()).deliver(&envelope).await,
            Err(DeliveryError::Recipient(_))
        ));
    }

    #[tokio::test]
    async fn missing_exchangers_are_reported() {
        let envelope = Envelope {
            to: String::from("dest@nowhere.test"),
            ..Envelope::default()
        };

        let err = engine(StaticMx::default()).deliver(&envelope).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Dns { .. }));
        assert!(!err.is_dial_failure());
    }

    #[tokio::test]
    async fn unreachable_hosts_exhaust_the_list() {
        let closed = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let lookup = StaticMx::default().with(
            "other.com",
            vec![
                MailServer::new("127.0.0.1", 10).with_port(closed),
                MailServer::new("127.0.0.1", 20).with_port(closed),
            ],
        );
        let envelope = Envelope {
            to: String::from("dest@other.com"),
            ..Envelope::default()
        };

        let err = engine(lookup).deliver(&envelope).await.unwrap_err();
        assert!(
            matches!(err, DeliveryError::Unreachable { attempts: 2, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn session_deadline_does_not_cover_the_dial() {
        let closed = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let lookup = StaticMx::default().with(
            "other.com",
            vec![MailServer::new("127.0.0.1", 10).with_port(closed)],
        );
        let timeouts = ClientTimeouts {
            dial_secs: 5,
            session_secs: 0,
        };

        let err = engine_with(lookup, timeouts)
            .deliver(&to_other())
            .await
            .unwrap_err();
        assert!(
            matches!(err, DeliveryError::Unreachable { attempts: 1, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn silent_servers_hit_the_session_deadline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let held = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let lookup = StaticMx::default().with(
            "other.com",
            vec![MailServer::new("127.0.0.1", 10).with_port(port)],
        );
        let timeouts = ClientTimeouts {
            dial_secs: 5,
            session_secs: 1,
        };

        let err = engine_with(lookup, timeouts)
            .deliver(&to_other())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Deadline { .. }), "{err}");
        assert!(!err.is_dial_failure());

        held.abort();
    }
}
