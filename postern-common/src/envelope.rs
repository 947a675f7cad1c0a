use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::address::{AddressError, EmailAddress};

/// Priority tier an envelope is published on. Chosen once, at enqueue time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueLevel {
    High,
    #[default]
    Medium,
    Low,
}

impl QueueLevel {
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Display for QueueLevel {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl core::str::FromStr for QueueLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown queue level '{other}'")),
        }
    }
}

/// How an envelope came to be queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Fanned out from an alias to one of its destinations.
    #[default]
    Forward,
    /// Sent by an authenticated account holder.
    Submission,
    /// Arrived at a generated return-path address and is headed back to the original sender.
    BounceReturn,
}

/// One queued message with exactly one recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Ulid,
    pub kind: EnvelopeKind,
    pub from: String,
    /// Used as the `MAIL FROM` for delivery when present.
    #[serde(default)]
    pub return_path: Option<String>,
    pub via: String,
    pub to: String,
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
    pub account_id: i64,
    pub domain_id: i64,
    pub alias_id: i64,
    pub destination_id: i64,
    pub queue_level: QueueLevel,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub bounce: Option<String>,
}

impl Envelope {
    /// The reverse path to present when delivering this envelope.
    pub fn mail_from(&self) -> &str {
        self.return_path.as_deref().unwrap_or(&self.from)
    }

    /// # Errors
    /// If the recipient is not a well formed address
    pub fn recipient(&self) -> Result<EmailAddress, AddressError> {
        EmailAddress::parse(&self.to)
    }
}

/// Serialise raw message bytes as standard base64.
pub mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    /// Propagates serializer failures
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// # Errors
    /// If the value is not valid base64
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use ulid::Ulid;

    use super::{Envelope, EnvelopeKind, QueueLevel};

    #[test]
    fn mail_from_prefers_return_path() {
        let mut envelope = Envelope {
            from: "alias@example.com".to_string(),
            ..Envelope::default()
        };
        assert_eq!(envelope.mail_from(), "alias@example.com");

        envelope.return_path = Some("alias=01ARZ3NDEKTSV4RRFFQ69G5FAV@example.com".to_string());
        assert_eq!(
            envelope.mail_from(),
            "alias=01ARZ3NDEKTSV4RRFFQ69G5FAV@example.com"
        );
    }

    #[test]
    fn json_message_is_base64() {
        let envelope = Envelope {
            id: Ulid::new(),
            kind: EnvelopeKind::Submission,
            to: "dest@other.com".to_string(),
            message: b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
            queue_level: QueueLevel::High,
            ..Envelope::default()
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["message"], "U3ViamVjdDogaGkNCg0KYm9keQ0K");
        assert_eq!(json["queue_level"], "high");

        let decoded: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, envelope);
    }
}
