use std::io;

use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unable to encode or decode queue payload: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("message {0} is not in flight")]
    NotInFlight(Ulid),

    #[error("invalid queue configuration: {0}")]
    Config(String),
}

impl QueueError {
    /// Whether the broker itself is failing, as opposed to a bad payload.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
