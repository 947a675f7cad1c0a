//! Fan a message out from an alias to each of its destinations.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use postern_account::{DkimError, ReturnPath, StoreError, return_path};
use postern_common::{
    envelope::{Envelope, EnvelopeKind, QueueLevel},
    internal,
    record::Metric,
    status::Status,
};
use postern_queue::QueueError;
use thiserror::Error;

use super::Services;
use crate::{connection::TlsInfo, context::Context, state::ForwardTransaction};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("load destinations for alias {alias_id}: {source}")]
    Destinations {
        alias_id: i64,
        #[source]
        source: StoreError,
    },

    #[error("alias {0} has no destinations")]
    NoDestinations(i64),

    #[error("store return path {id}: {source}")]
    ReturnPath {
        id: ulid::Ulid,
        #[source]
        source: StoreError,
    },

    #[error("sign message for {destination}: {source}")]
    Sign {
        destination: String,
        #[source]
        source: DkimError,
    },

    #[error("queue message for {destination}: {source}")]
    Queue {
        destination: String,
        #[source]
        source: QueueError,
    },
}

impl ForwardError {
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Destinations { .. } | Self::ReturnPath { .. } => true,
            Self::NoDestinations(_) => false,
            Self::Sign { source, .. } => source.is_transient(),
            Self::Queue { source, .. } => source.is_transient(),
        }
    }

    pub const fn status(&self) -> Status {
        if self.is_transient() {
            Status::ActionUnavailable
        } else {
            Status::TransactionFailed
        }
    }
}

/// Everything the trace header records about the hop into this server.
#[derive(Debug, Clone, Copy)]
pub struct Hop<'a> {
    pub helo: &'a str,
    pub rdns: &'a str,
    pub ip: IpAddr,
    pub server: &'a str,
    pub tls: Option<&'a TlsInfo>,
}

pub fn received_header(hop: &Hop<'_>, id: &str, recipient: &str, date: DateTime<Utc>) -> String {
    let tls = hop.tls.map_or_else(String::new, |info| {
        format!("\r\n\t(version={} cipher={});", info.proto(), info.cipher())
    });

    format!(
        "Received: from {} ({} [{}]) by {} with ESMTP id {id} for <{recipient}>;{tls}\r\n\t{}\r\n",
        hop.helo,
        hop.rdns,
        hop.ip,
        hop.server,
        date.to_rfc2822()
    )
}

/// Queue one signed copy of `message` per destination of the alias.
///
/// Returns the number of envelopes queued. A failure part way through leaves
/// the earlier copies queued.
pub(super) async fn forward(
    services: &Services,
    transaction: &ForwardTransaction,
    message: &[u8],
    ctx: &Context,
) -> Result<usize, ForwardError> {
    let ForwardTransaction {
        id,
        recipient,
        domain,
        alias,
    } = transaction;

    let ip = ctx.peer.ip();
    let rdns = services
        .rdns
        .lookup(ip)
        .await
        .into_iter()
        .next()
        .unwrap_or_else(|| String::from("unknown"));
    let helo = ctx.helo.as_deref().unwrap_or_default();
    let hop = Hop {
        helo,
        rdns: &rdns,
        ip,
        server: &ctx.banner,
        tls: ctx.tls.as_ref(),
    };

    // Bounces arrive with a null sender and are forwarded the same way, with
    // nowhere to return them to
    let return_path = match &ctx.sender {
        Some(sender) => {
            let address = return_path::address_for(recipient, *id);
            let row = ReturnPath {
                id: *id,
                account_id: alias.account_id,
                alias_id: alias.id,
                return_to: sender.to_string(),
                created_at: Utc::now(),
            };

            services
                .resolver
                .store()
                .insert_return_path(&row)
                .await
                .map_err(|source| ForwardError::ReturnPath { id: *id, source })?;

            address
        }
        None => String::new(),
    };

    let destinations = services
        .resolver
        .store()
        .destinations_for_alias(alias.id)
        .await
        .map_err(|source| ForwardError::Destinations {
            alias_id: alias.id,
            source,
        })?;

    if destinations.is_empty() {
        return Err(ForwardError::NoDestinations(alias.id));
    }

    let now = Utc::now();
    let mut queued = 0;

    for destination in &destinations {
        let received = received_header(&hop, &id.to_string(), &destination.address, now);

        let mut composed =
            Vec::with_capacity(return_path.len() + received.len() + message.len() + 20);
        composed.extend_from_slice(format!("Return-Path: <{return_path}>\r\n").as_bytes());
        composed.extend_from_slice(received.as_bytes());
        composed.extend_from_slice(message);

        let signed = services
            .signer
            .sign(domain, &composed)
            .await
            .map_err(|source| ForwardError::Sign {
                destination: destination.address.clone(),
                source,
            })?;

        let envelope = Envelope {
            id: *id,
            kind: EnvelopeKind::Forward,
            from: recipient.to_string(),
            return_path: Some(return_path.clone()),
            via: recipient.to_string(),
            to: destination.address.clone(),
            message: signed,
            account_id: alias.account_id,
            domain_id: domain.id,
            alias_id: alias.id,
            destination_id: destination.id,
            queue_level: QueueLevel::Medium,
            status: String::new(),
            bounce: None,
        };

        services
            .publisher
            .envelope(&envelope)
            .await
            .map_err(|source| ForwardError::Queue {
                destination: destination.address.clone(),
                source,
            })?;

        if let Err(err) = services.publisher.metric(&Metric::inbound_forward(&envelope)).await {
            internal!(level = WARN, "Unable to publish forward metric for {id}: {err}");
        }

        queued += 1;
    }

    Ok(queued)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use postern_account::{DkimError, StoreError};
    use postern_common::status::Status;
    use pretty_assertions::assert_eq;

    use super::{ForwardError, Hop, received_header};

    #[test]
    fn received_without_tls() {
        let date = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let hop = Hop {
            helo: "client.example.org",
            rdns: "mail.example.org",
            ip: "192.0.2.10".parse().unwrap(),
            server: "mx.postern.test",
            tls: None,
        };

        assert_eq!(
            received_header(&hop, "01HQ", "dest@other.com", date),
            "Received: from client.example.org (mail.example.org [192.0.2.10]) by mx.postern.test \
             with ESMTP id 01HQ for <dest@other.com>;\r\n\tFri, 1 Mar 2024 12:30:00 +0000\r\n"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ForwardError::NoDestinations(3).status(), Status::TransactionFailed);
        assert_eq!(
            ForwardError::Destinations {
                alias_id: 3,
                source: StoreError::Unavailable(String::from("down")),
            }
            .status(),
            Status::ActionUnavailable
        );
        assert_eq!(
            ForwardError::Sign {
                destination: String::from("dest@other.com"),
                source: DkimError::MissingKey(String::from("example.com")),
            }
            .status(),
            Status::TransactionFailed
        );
    }
}
