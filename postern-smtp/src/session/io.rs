use postern_common::{incoming, status::Status, traits::FiniteStateMachine};
use tokio::io::{AsyncRead, AsyncWrite};

use super::Session;
use crate::{
    State,
    command::Command,
    state::{self, PostDot},
};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Process one line from the client, returning the replies to send.
    pub(super) async fn receive(&mut self, line: &[u8]) -> Vec<String> {
        match self.state {
            State::Reading(_) => self.receive_data(line).await,
            State::Auth(_) => self.receive_sasl(line).await,
            _ => self.receive_command(line).await,
        }
    }

    async fn receive_command(&mut self, line: &[u8]) -> Vec<String> {
        let command = Command::try_from(line).unwrap_or_else(|e| e);

        incoming!("{command}");

        if let Some(size) = command.size()
            && matches!(self.state, State::Ehlo(_) | State::Helo(_))
            && self.context.max_message_size > 0
            && size > self.context.max_message_size
        {
            self.context.respond(
                Status::ExceededStorage,
                format!(
                    "5.3.4 declared size {size} exceeds maximum of {} bytes",
                    self.context.max_message_size
                ),
            );
            return self.response();
        }

        let current = std::mem::take(&mut self.state);
        self.state = current.transition(command, &mut self.context);

        tracing::debug!("Transitioned to {}", self.state);

        // A transition that kept the state has already decided the reply
        if self.context.response.is_none() {
            self.emit().await;
        }

        self.response()
    }

    async fn receive_sasl(&mut self, line: &[u8]) -> Vec<String> {
        // Credentials are never logged
        incoming!("<sasl response>");

        let Ok(text) = core::str::from_utf8(line) else {
            self.context
                .respond(Status::ParameterError, "5.5.2 cannot decode response");
            self.state = State::greeted(&self.context);
            return self.response();
        };

        let current = std::mem::take(&mut self.state);
        self.state = current.sasl_response(text, &mut self.context);

        if self.context.response.is_none() {
            self.emit().await;
        }

        self.response()
    }

    async fn receive_data(&mut self, line: &[u8]) -> Vec<String> {
        let continuation = self.partial_line;
        self.partial_line = !line.ends_with(b"\n");

        if !continuation && matches!(line, b".\r\n" | b".\n") {
            let State::Reading(reading) = std::mem::take(&mut self.state) else {
                return Vec::new();
            };

            tracing::debug!("Received {} message bytes", self.message.len());

            self.state = State::PostDot(PostDot {
                transaction: reading.transaction,
            });
            self.emit().await;
            return self.response();
        }

        // RFC 5321 4.5.2
        let chunk = if !continuation && line.starts_with(b".") {
            &line[1..]
        } else {
            line
        };

        let max = self.context.max_message_size;
        if max > 0 && self.message.len().saturating_add(chunk.len()) > max {
            self.message.clear();
            self.context.respond(
                Status::ExceededStorage,
                format!("5.3.4 message exceeds maximum size of {max} bytes"),
            );
            self.state = State::Reject(state::Reject);
            return self.response();
        }

        self.message.extend_from_slice(chunk);
        Vec::new()
    }
}
