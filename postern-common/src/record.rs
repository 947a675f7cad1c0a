//! Records published on the `logs` and `metrics` topics.

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::envelope::{Envelope, QueueLevel, base64_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Send,
    Reject,
    Bounce,
}

impl Display for EntryType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Send => "SND",
            Self::Reject => "REJ",
            Self::Bounce => "BNC",
        })
    }
}

/// A log line for one accepted, rejected or attempted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub time: DateTime<Utc>,
    pub id: Ulid,
    pub account_id: i64,
    pub domain_id: i64,
    pub alias_id: i64,
    pub destination_id: i64,
    pub from: String,
    pub via: String,
    pub to: String,
    pub etype: EntryType,
    pub status: String,
    #[serde(default)]
    pub bounce: Option<String>,
    pub queue_level: QueueLevel,
    #[serde(with = "base64_bytes", default)]
    pub message: Vec<u8>,
}

impl Entry {
    /// A send record. The message body is not kept.
    pub fn sent(envelope: &Envelope) -> Self {
        Self::from_envelope(envelope, EntryType::Send, Vec::new())
    }

    /// A bounce record, keeping the message for inspection.
    pub fn bounced(envelope: &Envelope) -> Self {
        Self::from_envelope(envelope, EntryType::Bounce, envelope.message.clone())
    }

    fn from_envelope(envelope: &Envelope, etype: EntryType, message: Vec<u8>) -> Self {
        Self {
            time: Utc::now(),
            id: envelope.id,
            account_id: envelope.account_id,
            domain_id: envelope.domain_id,
            alias_id: envelope.alias_id,
            destination_id: envelope.destination_id,
            from: envelope.from.clone(),
            via: envelope.via.clone(),
            to: envelope.to.clone(),
            etype,
            status: envelope.status.clone(),
            bounce: envelope.bounce.clone(),
            queue_level: envelope.queue_level,
            message,
        }
    }

    /// A rejection made during an SMTP session, before any envelope exists.
    pub fn rejected(id: Ulid, from: &str, to: &str, status: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            id,
            account_id: 0,
            domain_id: 0,
            alias_id: 0,
            destination_id: 0,
            from: from.to_string(),
            via: String::new(),
            to: to.to_string(),
            etype: EntryType::Reject,
            status: status.into(),
            bounce: None,
            queue_level: QueueLevel::default(),
            message: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_ids(mut self, account_id: i64, domain_id: i64, alias_id: i64) -> Self {
        self.account_id = account_id;
        self.domain_id = domain_id;
        self.alias_id = alias_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Metric {
    /// No alias or return path matched an inbound recipient.
    InboundReject {
        time: DateTime<Utc>,
        from: String,
        to: String,
        domain_id: i64,
    },
    /// A message was queued for one destination.
    InboundForward {
        time: DateTime<Utc>,
        from: String,
        domain_id: i64,
        alias_id: i64,
        destination_id: i64,
    },
    /// A forwarded message bounced at its destination.
    InboundBounce {
        time: DateTime<Utc>,
        from: String,
        domain_id: i64,
        alias_id: i64,
        destination_id: i64,
        reason: String,
        #[serde(with = "base64_bytes")]
        message: Vec<u8>,
    },
}

impl Metric {
    pub fn inbound_reject(from: &str, to: &str, domain_id: i64) -> Self {
        Self::InboundReject {
            time: Utc::now(),
            from: from.to_string(),
            to: to.to_string(),
            domain_id,
        }
    }

    pub fn inbound_forward(envelope: &Envelope) -> Self {
        Self::InboundForward {
            time: Utc::now(),
            from: envelope.from.clone(),
            domain_id: envelope.domain_id,
            alias_id: envelope.alias_id,
            destination_id: envelope.destination_id,
        }
    }

    pub fn inbound_bounce(envelope: &Envelope, reason: &str) -> Self {
        Self::InboundBounce {
            time: Utc::now(),
            from: envelope.from.clone(),
            domain_id: envelope.domain_id,
            alias_id: envelope.alias_id,
            destination_id: envelope.destination_id,
            reason: reason.to_string(),
            message: envelope.message.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use ulid::Ulid;

    use super::{Entry, EntryType, Metric};
    use crate::envelope::Envelope;

    #[test]
    fn entry_type_display() {
        assert_eq!(EntryType::Send.to_string(), "SND");
        assert_eq!(EntryType::Reject.to_string(), "REJ");
        assert_eq!(EntryType::Bounce.to_string(), "BNC");
    }

    #[test]
    fn sends_drop_the_message() {
        let envelope = Envelope {
            message: b"body".to_vec(),
            ..Envelope::default()
        };

        assert!(Entry::sent(&envelope).message.is_empty());
        assert_eq!(Entry::bounced(&envelope).message, b"body");
    }

    #[test]
    fn rejections_carry_partial_ids() {
        let entry = Entry::rejected(Ulid::nil(), "a@b.com", "c@d.com", "unknown recipient")
            .with_ids(3, 4, 0);
        assert_eq!(entry.etype, EntryType::Reject);
        assert_eq!((entry.account_id, entry.domain_id, entry.alias_id), (3, 4, 0));
    }

    #[test]
    fn metrics_are_tagged() {
        let json = serde_json::to_value(Metric::inbound_reject("a@b.com", "c@d.com", 9)).unwrap();
        assert_eq!(json["type"], "InboundReject");
        assert_eq!(json["domain_id"], 9);
    }
}
