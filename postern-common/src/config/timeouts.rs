//! Timeout configuration for both sides of the SMTP pipeline.
//!
//! Values are whole seconds so they read naturally in the config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts applied while receiving mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Time allowed for each command line (RFC 5321 suggests 5 minutes)
    #[serde(default = "defaults::server_command_secs")]
    pub command_secs: u64,

    /// Time allowed between lines of message data
    #[serde(default = "defaults::server_data_secs")]
    pub data_secs: u64,

    /// Maximum total connection duration
    #[serde(default = "defaults::server_connection_secs")]
    pub connection_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::server_command_secs(),
            data_secs: defaults::server_data_secs(),
            connection_secs: defaults::server_connection_secs(),
        }
    }
}

impl ServerTimeouts {
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    pub const fn connection(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }
}

/// Timeouts applied while delivering mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// TCP connect timeout per MX host
    #[serde(default = "defaults::client_dial_secs")]
    pub dial_secs: u64,

    /// Deadline for the whole SMTP dialog with one host, counted once connected
    #[serde(default = "defaults::client_session_secs")]
    pub session_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            dial_secs: defaults::client_dial_secs(),
            session_secs: defaults::client_session_secs(),
        }
    }
}

impl ClientTimeouts {
    pub const fn dial(&self) -> Duration {
        Duration::from_secs(self.dial_secs)
    }

    pub const fn session(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }
}

mod defaults {
    pub const fn server_command_secs() -> u64 {
        300
    }

    pub const fn server_data_secs() -> u64 {
        180
    }

    pub const fn server_connection_secs() -> u64 {
        1800
    }

    pub const fn client_dial_secs() -> u64 {
        10
    }

    pub const fn client_session_secs() -> u64 {
        60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let client = ClientTimeouts::default();
        assert_eq!(client.dial(), Duration::from_secs(10));
        assert_eq!(client.session(), Duration::from_secs(60));

        let server = ServerTimeouts::default();
        assert_eq!(server.command(), Duration::from_secs(300));
    }
}
