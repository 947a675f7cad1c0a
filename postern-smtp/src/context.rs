use std::{borrow::Cow, net::SocketAddr, sync::Arc};

use postern_account::{Account, Domain};
use postern_common::{address::EmailAddress, status::Status};
use serde::Deserialize;
use ulid::Ulid;

use crate::{command::MailParameters, connection::TlsInfo};

/// Which policy a listener applies: anonymous relay or authenticated submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ListenerMode {
    #[default]
    Inbound,
    Submission,
}

/// Everything the state machine and handlers know about one connection.
#[derive(Debug, Clone)]
pub struct Context {
    /// Opaque id quoted back to clients in replies, for support correlation.
    pub id: Ulid,
    pub peer: SocketAddr,
    pub mode: ListenerMode,
    pub banner: Arc<str>,
    pub helo: Option<String>,
    pub extended: bool,
    pub tls: Option<TlsInfo>,
    pub max_message_size: usize,
    pub account: Option<Arc<Account>>,
    pub sender: Option<EmailAddress>,
    pub params: MailParameters,
    /// Resolved at `MAIL FROM` on the submission port.
    pub sender_domain: Option<Domain>,
    pub response: Option<(Status, Cow<'static, str>)>,
}

impl Context {
    pub fn new(peer: SocketAddr, mode: ListenerMode, banner: Arc<str>) -> Self {
        Self {
            id: Ulid::new(),
            peer,
            mode,
            banner,
            helo: None,
            extended: false,
            tls: None,
            max_message_size: 0,
            account: None,
            sender: None,
            params: MailParameters::new(),
            sender_domain: None,
            response: None,
        }
    }

    /// The sender as it appears in logs, empty for the null reverse-path.
    pub fn sender_str(&self) -> String {
        self.sender
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    pub fn respond(&mut self, status: Status, message: impl Into<Cow<'static, str>>) {
        self.response = Some((status, message.into()));
    }

    /// Forget the current mail transaction; greeting, TLS and authentication survive.
    pub fn reset_transaction(&mut self) {
        self.sender = None;
        self.params = MailParameters::new();
        self.sender_domain = None;
    }

    /// Forget everything negotiated so far, as after a TLS upgrade.
    pub fn reset_session(&mut self) {
        self.reset_transaction();
        self.helo = None;
        self.extended = false;
        self.account = None;
    }
}
