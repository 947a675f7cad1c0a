use postern_common::status::Status;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    State,
    context::ListenerMode,
    extensions::Extension,
    session::Session,
    state::Reading,
};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// The replies for the state the session is now in.
    ///
    /// A reply recorded on the context wins. Otherwise the state supplies its
    /// own, and entering `DATA` or `STARTTLS` moves the session on.
    pub(super) fn response(&mut self) -> Vec<String> {
        if let Some((status, message)) = self.context.response.take() {
            return vec![format!("{status} {message}")];
        }

        match &self.state {
            State::Ehlo(ehlo) => {
                let greeting = format!("{} says hello to {}", self.context.banner, ehlo.id);
                let extensions = self.extensions();

                let mut lines = Vec::with_capacity(extensions.len() + 1);
                lines.push(greeting);
                lines.extend(extensions.iter().map(ToString::to_string));

                let last = lines.len() - 1;
                lines
                    .into_iter()
                    .enumerate()
                    .map(|(index, line)| {
                        let separator = if index == last { ' ' } else { '-' };
                        format!("{}{separator}{line}", Status::Ok)
                    })
                    .collect()
            }
            State::Helo(helo) => vec![format!(
                "{} {} says hello to {}",
                Status::Ok,
                self.context.banner,
                helo.id
            )],
            State::StartTls(_) if self.tls_context.is_some() => {
                vec![format!("{} 2.0.0 Ready to start TLS", Status::ServiceReady)]
            }
            State::StartTls(_) => {
                self.state = State::greeted(&self.context);
                vec![format!("{} 4.7.0 TLS not available", Status::TlsUnavailable)]
            }
            State::Data(data) => {
                let transaction = data.transaction.clone();
                self.state = State::Reading(Reading { transaction });
                self.message.clear();
                self.partial_line = false;

                let max = self.context.max_message_size;
                if let Some(size) = self.context.params.size()
                    && max > 0
                {
                    self.message.reserve(size.min(max));
                }

                vec![format!(
                    "{} End data with <CR><LF>.<CR><LF>",
                    Status::StartMailInput
                )]
            }
            State::Auth(_) => self
                .state
                .challenge()
                .map(|challenge| vec![format!("{} {challenge}", Status::AuthContinue)])
                .unwrap_or_default(),
            State::Quit(_) => vec![format!("{} 2.0.0 Bye", Status::GoodBye)],
            State::Reject(_) => vec![format!("{} 4.3.0 closing connection", Status::Unavailable)],
            _ => Vec::new(),
        }
    }

    fn extensions(&self) -> Vec<Extension> {
        let mut extensions = vec![Extension::Size(self.context.max_message_size)];

        if self.tls_context.is_some() && self.context.tls.is_none() {
            extensions.push(Extension::Starttls);
        }

        if self.context.mode == ListenerMode::Submission {
            extensions.push(Extension::Auth);
        }

        extensions.push(Extension::EightBitMime);
        extensions.push(Extension::Pipelining);
        extensions
    }
}
