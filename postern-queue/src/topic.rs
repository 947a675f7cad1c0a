use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use postern_common::envelope::QueueLevel;

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Emails(QueueLevel),
    Bounces,
    Logs,
    Metrics,
}

impl Topic {
    pub const ALL: [Self; 6] = [
        Self::Emails(QueueLevel::High),
        Self::Emails(QueueLevel::Medium),
        Self::Emails(QueueLevel::Low),
        Self::Bounces,
        Self::Logs,
        Self::Metrics,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Emails(QueueLevel::High) => "emails.high",
            Self::Emails(QueueLevel::Medium) => "emails.medium",
            Self::Emails(QueueLevel::Low) => "emails.low",
            Self::Bounces => "bounces",
            Self::Logs => "logs",
            Self::Metrics => "metrics",
        }
    }
}

impl Display for Topic {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

impl FromStr for Topic {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.name() == s)
            .ok_or_else(|| QueueError::UnknownTopic(s.to_string()))
    }
}
