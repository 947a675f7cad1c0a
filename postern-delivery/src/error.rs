//! Delivery failures.
//!
//! Only a failure to reach a host moves delivery on to the next mail exchanger.
//! Everything that happens once a host has answered is the outcome for that envelope.

use core::{
    fmt::{self, Display, Formatter},
    time::Duration,
};
use std::{io, net::IpAddr};

use postern_common::address::AddressError;
use postern_smtp::client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DnsError {
    /// The lookup succeeded but named no mail exchangers.
    #[error("no mail exchangers for {0}")]
    NoMailServers(String),

    #[error("MX lookup for {domain} failed: {source}")]
    LookupFailed {
        domain: String,
        #[source]
        source: hickory_resolver::ResolveError,
    },

    #[error("unable to build DNS resolver: {0}")]
    Configuration(#[source] hickory_resolver::ResolveError),
}

impl DnsError {
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::LookupFailed { .. })
    }
}

/// The point in the dialog where a remote server said no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Greeting,
    Ehlo,
    Helo,
    StartTls,
    MailFrom,
    RcptTo,
    Data,
    Message,
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Greeting => "greeting",
            Self::Ehlo => "EHLO",
            Self::Helo => "HELO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Message => "end of data",
        })
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("bad destination: {0}")]
    Recipient(#[from] AddressError),

    #[error("resolve mail servers for {domain}: {source}")]
    Dns {
        domain: String,
        #[source]
        source: DnsError,
    },

    #[error("resolve address of {server}: {source}")]
    HostLookup {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("{server} has no address reachable from {source_ip}")]
    NoAddress { server: String, source_ip: IpAddr },

    #[error("bind outbound socket to {ip}: {source}")]
    Bind {
        ip: IpAddr,
        #[source]
        source: io::Error,
    },

    #[error("dial {server}: {source}")]
    Dial {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("dial {server}: timed out after {}s", timeout.as_secs())]
    DialTimeout { server: String, timeout: Duration },

    /// The remote answered with a 4xx or 5xx reply.
    #[error("{stage} rejected by {server}: {code} {message}")]
    Rejected {
        server: String,
        stage: Stage,
        code: u16,
        message: String,
    },

    #[error("{stage} with {server} failed: {source}")]
    Protocol {
        server: String,
        stage: Stage,
        #[source]
        source: ClientError,
    },

    #[error("dialog with {server} exceeded {}s", deadline.as_secs())]
    Deadline { server: String, deadline: Duration },

    /// Every mail exchanger failed to accept a connection.
    #[error("no mail server for {domain} accepted a connection ({attempts} tried), last: {last}")]
    Unreachable {
        domain: String,
        attempts: usize,
        last: String,
    },

    #[error("{ip} resolves to {found:?}, expected {expected}")]
    ReverseDns {
        ip: IpAddr,
        expected: String,
        found: Vec<String>,
    },
}

impl DeliveryError {
    /// Whether the next mail exchanger should be tried.
    #[must_use]
    pub const fn is_dial_failure(&self) -> bool {
        matches!(
            self,
            Self::HostLookup { .. }
                | Self::NoAddress { .. }
                | Self::Dial { .. }
                | Self::DialTimeout { .. }
        )
    }

    /// The reply code when the remote rejected the message.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn protocol(server: &str, stage: Stage, source: ClientError) -> Self {
        match source {
            ClientError::Rejected { code, message } => Self::Rejected {
                server: server.to_string(),
                stage,
                code,
                message,
            },
            source => Self::Protocol {
                server: server.to_string(),
                stage,
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn only_connection_failures_fail_over() {
        let dial = DeliveryError::Dial {
            server: String::from("mx1.example.com:25"),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(dial.is_dial_failure());

        let timeout = DeliveryError::DialTimeout {
            server: String::from("mx1.example.com:25"),
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_dial_failure());

        let rejected = DeliveryError::protocol(
            "mx1.example.com:25",
            Stage::RcptTo,
            ClientError::Rejected {
                code: 550,
                message: String::from("5.1.1 user unknown"),
            },
        );
        assert!(!rejected.is_dial_failure());
        assert_eq!(rejected.code(), Some(550));

        let dropped = DeliveryError::protocol(
            "mx1.example.com:25",
            Stage::Data,
            ClientError::ConnectionClosed,
        );
        assert!(!dropped.is_dial_failure());
        assert_eq!(dropped.code(), None);
    }

    #[test]
    fn rejection_carries_the_remote_text() {
        let err = DeliveryError::Rejected {
            server: String::from("mx.other.com:25"),
            stage: Stage::RcptTo,
            code: 550,
            message: String::from("5.1.1 user unknown"),
        };

        assert_eq!(
            err.to_string(),
            "RCPT TO rejected by mx.other.com:25: 550 5.1.1 user unknown"
        );
    }
}
