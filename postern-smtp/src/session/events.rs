use postern_common::{internal, status::Status};
use tokio::io::{AsyncRead, AsyncWrite};

use super::Session;
use crate::{
    State,
    state::{Accepted, Auth, AuthStep, MailFrom},
};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Run the transaction handler for the state just entered.
    ///
    /// The handler sets the reply. When it refuses, the session falls back to
    /// where it stood before the command.
    pub(super) async fn emit(&mut self) {
        let handler = std::sync::Arc::clone(&self.handler);
        let ctx = &mut self.context;
        let mut handled = true;

        self.state = match std::mem::take(&mut self.state) {
            State::MailFrom(mail) => {
                if handler.validate_mail_from(ctx).await {
                    State::MailFrom(mail)
                } else {
                    ctx.reset_transaction();
                    State::greeted(ctx)
                }
            }

            State::RcptTo(rcpt) => match handler.validate_rcpt_to(&rcpt.recipient, ctx).await {
                Some(transaction) => State::Accepted(Accepted { transaction }),
                None => rcpt.previous.map_or_else(
                    || {
                        State::MailFrom(MailFrom {
                            sender: ctx.sender.clone(),
                        })
                    },
                    |transaction| State::Accepted(Accepted { transaction }),
                ),
            },

            State::Auth(Auth {
                step: AuthStep::Credentials { username, password },
                ..
            }) => {
                handler.authenticate(&username, &password, ctx).await;
                State::greeted(ctx)
            }

            State::PostDot(post) => {
                let message = std::mem::take(&mut self.message);
                handler
                    .handle_message(&post.transaction, message, ctx)
                    .await;
                ctx.reset_transaction();
                State::greeted(ctx)
            }

            other => {
                handled = false;
                other
            }
        };

        if handled && self.context.response.is_none() {
            internal!(level = WARN, "Transaction handler left no reply");
            self.context.respond(
                Status::ActionUnavailable,
                format!("4.3.0 temporary failure ({})", self.context.id),
            );
        }
    }
}
