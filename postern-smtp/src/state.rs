use core::fmt::{self, Display, Formatter};

use base64::Engine;
use postern_account::{Alias, Domain, ReturnPath};
use postern_common::{address::EmailAddress, status::Status, traits::FiniteStateMachine};
use ulid::Ulid;

use crate::{
    command::{AuthMechanism, Command, HeloVariant},
    context::{Context, ListenerMode},
};

/// A recipient that resolved through an alias on one of our domains.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardTransaction {
    pub id: Ulid,
    pub recipient: EmailAddress,
    pub domain: Domain,
    pub alias: Alias,
}

/// A recipient that is a return-path address we generated for an earlier forward.
#[derive(Debug, Clone, PartialEq)]
pub struct BounceReturnTransaction {
    pub recipient: EmailAddress,
    pub domain: Domain,
    pub return_path: ReturnPath,
}

/// An authenticated account sending as one of its own domains.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionTransaction {
    pub id: Ulid,
    pub recipient: EmailAddress,
    pub domain: Domain,
}

/// How a message will be handled, fixed when its recipient is accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    Forward(ForwardTransaction),
    BounceReturn(BounceReturnTransaction),
    Submission(SubmissionTransaction),
}

impl Transaction {
    /// The envelope id: fresh for forwards and submissions, the original one for bounce returns.
    pub const fn id(&self) -> Ulid {
        match self {
            Self::Forward(forward) => forward.id,
            Self::BounceReturn(bounce) => bounce.return_path.id,
            Self::Submission(submission) => submission.id,
        }
    }

    pub const fn recipient(&self) -> &EmailAddress {
        match self {
            Self::Forward(ForwardTransaction { recipient, .. })
            | Self::BounceReturn(BounceReturnTransaction { recipient, .. })
            | Self::Submission(SubmissionTransaction { recipient, .. }) => recipient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ehlo {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helo {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTls;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// `AUTH PLAIN` without an initial response
    PlainResponse,
    LoginUsername,
    LoginPassword { username: String },
    /// Ready to be checked
    Credentials { username: String, password: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub mechanism: AuthMechanism,
    pub step: AuthStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailFrom {
    pub sender: Option<EmailAddress>,
}

/// A recipient waiting to be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RcptTo {
    pub recipient: String,
    /// The recipient accepted before this one, kept if this one is rejected.
    pub previous: Option<Transaction>,
}

/// Recipient resolved, the transaction kind is decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub transaction: Transaction,
}

/// Collecting message lines until the end-of-data marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostDot {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quit;

/// The connection is being dropped by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reject;

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Connect(Connect),
    Ehlo(Ehlo),
    Helo(Helo),
    StartTls(StartTls),
    Auth(Auth),
    MailFrom(MailFrom),
    RcptTo(RcptTo),
    Accepted(Accepted),
    Data(Data),
    Reading(Reading),
    PostDot(PostDot),
    Quit(Quit),
    Reject(Reject),
}

impl Default for State {
    fn default() -> Self {
        Self::Connect(Connect)
    }
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Reading(_) | Self::PostDot(_) => "",
            Self::Connect(_) => "Connect",
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
            Self::StartTls(_) => "STARTTLS",
            Self::Auth(_) => "AUTH",
            Self::MailFrom(_) => "MAIL",
            Self::RcptTo(_) | Self::Accepted(_) => "RCPT",
            Self::Data(_) => "DATA",
            Self::Quit(_) => "QUIT",
            Self::Reject(_) => "Rejected",
        })
    }
}

const USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
const PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

fn decode(response: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(response.trim())
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// `authzid NUL authcid NUL passwd` from RFC 4616.
fn decode_plain(response: &str) -> Option<(String, String)> {
    let decoded = decode(response)?;
    let mut parts = decoded.split('\0');

    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(username), Some(password), None) if !username.is_empty() => {
            Some((username.to_string(), password.to_string()))
        }
        _ => None,
    }
}

impl State {
    /// The state a greeted client returns to between transactions.
    pub fn greeted(ctx: &Context) -> Self {
        match &ctx.helo {
            Some(id) if ctx.extended => Self::Ehlo(Ehlo { id: id.clone() }),
            Some(id) => Self::Helo(Helo { id: id.clone() }),
            None => Self::Connect(Connect),
        }
    }

    const fn is_greeted(&self) -> bool {
        matches!(self, Self::Ehlo(_) | Self::Helo(_))
    }

    /// The challenge to send while an AUTH exchange waits on the client.
    pub const fn challenge(&self) -> Option<&'static str> {
        match self {
            Self::Auth(Auth {
                step: AuthStep::PlainResponse,
                ..
            }) => Some(""),
            Self::Auth(Auth {
                step: AuthStep::LoginUsername,
                ..
            }) => Some(USERNAME_CHALLENGE),
            Self::Auth(Auth {
                step: AuthStep::LoginPassword { .. },
                ..
            }) => Some(PASSWORD_CHALLENGE),
            _ => None,
        }
    }

    fn begin_auth(mechanism: AuthMechanism, initial: Option<String>, ctx: &mut Context) -> Self {
        let step = match (mechanism, initial) {
            (AuthMechanism::Plain, None) => AuthStep::PlainResponse,
            (AuthMechanism::Login, None) => AuthStep::LoginUsername,
            (AuthMechanism::Plain, Some(initial)) => {
                return Self::Auth(Auth {
                    mechanism,
                    step: AuthStep::PlainResponse,
                })
                .sasl_response(&initial, ctx);
            }
            (AuthMechanism::Login, Some(initial)) => {
                return Self::Auth(Auth {
                    mechanism,
                    step: AuthStep::LoginUsername,
                })
                .sasl_response(&initial, ctx);
            }
        };

        Self::Auth(Auth { mechanism, step })
    }

    /// Feed one client line into an AUTH exchange.
    #[must_use]
    pub fn sasl_response(self, line: &str, ctx: &mut Context) -> Self {
        let Self::Auth(Auth { mechanism, step }) = self else {
            return self;
        };

        if line.trim() == "*" {
            ctx.respond(Status::ParameterError, "5.7.0 authentication cancelled");
            return Self::greeted(ctx);
        }

        let next = match step {
            AuthStep::PlainResponse => decode_plain(line)
                .map(|(username, password)| AuthStep::Credentials { username, password }),
            AuthStep::LoginUsername => decode(line).map(|username| AuthStep::LoginPassword { username }),
            AuthStep::LoginPassword { username } => {
                decode(line).map(|password| AuthStep::Credentials { username, password })
            }
            AuthStep::Credentials { .. } => None,
        };

        next.map_or_else(
            || {
                ctx.respond(Status::ParameterError, "5.5.2 cannot decode response");
                Self::greeted(ctx)
            },
            |step| Self::Auth(Auth { mechanism, step }),
        )
    }

    /// Whether the connection should be closed after replying.
    pub const fn should_close(&self) -> bool {
        matches!(self, Self::Quit(_) | Self::Reject(_))
    }

    pub const fn in_transaction(&self) -> bool {
        matches!(
            self,
            Self::MailFrom(_)
                | Self::RcptTo(_)
                | Self::Accepted(_)
                | Self::Data(_)
                | Self::Reading(_)
        )
    }
}

impl FiniteStateMachine for State {
    type Input = Command;
    type Context = Context;

    /// Protocol sequencing only. A transition that keeps the current state sets
    /// its reply on the context; one that moves on leaves the reply to the
    /// transaction handler or the new state.
    fn transition(self, command: Command, ctx: &mut Context) -> Self {
        match (self, command) {
            (_, Command::Quit) => Self::Quit(Quit),

            (state, Command::Noop) => {
                ctx.respond(Status::Ok, "2.0.0 Ok");
                state
            }
            (state, Command::Help) => {
                ctx.respond(Status::HelpMessage, "2.0.0 See https://www.rfc-editor.org/rfc/rfc5321");
                state
            }
            (state, Command::Invalid(reason)) => {
                tracing::debug!("Unrecognised command: {reason}");
                ctx.respond(Status::SyntaxError, "5.5.2 syntax error");
                state
            }

            // A new greeting starts over from the top
            (_, Command::Helo(HeloVariant::Ehlo(id))) => {
                ctx.reset_transaction();
                ctx.helo = Some(id.clone());
                ctx.extended = true;
                Self::Ehlo(Ehlo { id })
            }
            (_, Command::Helo(HeloVariant::Helo(id))) => {
                ctx.reset_transaction();
                ctx.helo = Some(id.clone());
                ctx.extended = false;
                Self::Helo(Helo { id })
            }

            (Self::Connect(_), Command::Rset) => {
                ctx.respond(Status::Ok, "2.0.0 Ok");
                Self::Connect(Connect)
            }
            (_, Command::Rset) => {
                ctx.reset_transaction();
                ctx.respond(Status::Ok, "2.0.0 Ok");
                Self::greeted(ctx)
            }

            (state, Command::StartTLS) if state.is_greeted() => {
                if !ctx.extended || ctx.tls.is_some() {
                    ctx.respond(Status::InvalidCommandSequence, "5.5.1 STARTTLS not available");
                    state
                } else {
                    Self::StartTls(StartTls)
                }
            }

            (state, Command::Auth(mechanism, initial)) if state.is_greeted() => match ctx.mode {
                ListenerMode::Inbound => {
                    ctx.respond(
                        Status::InvalidCommandSequence,
                        "5.5.1 authentication not enabled",
                    );
                    state
                }
                ListenerMode::Submission if ctx.account.is_some() => {
                    ctx.respond(Status::InvalidCommandSequence, "5.5.1 already authenticated");
                    state
                }
                ListenerMode::Submission => Self::begin_auth(mechanism, initial, ctx),
            },

            (state, Command::MailFrom(sender, params)) if state.is_greeted() => {
                ctx.sender.clone_from(&sender);
                ctx.params = params;
                Self::MailFrom(MailFrom { sender })
            }

            (Self::MailFrom(_), Command::RcptTo(recipient)) => Self::RcptTo(RcptTo {
                recipient,
                previous: None,
            }),
            (Self::Accepted(accepted), Command::RcptTo(recipient)) => Self::RcptTo(RcptTo {
                recipient,
                previous: Some(accepted.transaction),
            }),

            (Self::Accepted(accepted), Command::Data) => Self::Data(Data {
                transaction: accepted.transaction,
            }),
            (state @ Self::MailFrom(_), Command::Data) => {
                ctx.respond(
                    Status::InvalidCommandSequence,
                    "5.5.1 valid RCPT command required",
                );
                state
            }

            (state, _) => {
                ctx.respond(
                    Status::InvalidCommandSequence,
                    "5.5.1 bad sequence of commands",
                );
                state
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use std::sync::Arc;

    use postern_account::{Alias, Domain};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::command::MailParameters;

    fn context(mode: ListenerMode) -> Context {
        Context::new("127.0.0.1:2525".parse().unwrap(), mode, Arc::from("mx.test"))
    }

    fn forward() -> Transaction {
        Transaction::Forward(ForwardTransaction {
            id: Ulid::new(),
            recipient: EmailAddress::parse("user@example.com").unwrap(),
            domain: Domain {
                id: 10,
                account_id: 1,
                name: String::from("example.com"),
                verified_at: Some(chrono::Utc::now()),
                deleted_at: None,
            },
            alias: Alias::new(100, 1, 10, "^user$"),
        })
    }

    fn greeted(ctx: &mut Context) -> State {
        State::default().transition(
            Command::Helo(HeloVariant::Ehlo("client.example.com".to_string())),
            ctx,
        )
    }

    #[test]
    fn connect_to_ehlo() {
        let mut ctx = context(ListenerMode::Inbound);
        let state = greeted(&mut ctx);

        assert!(matches!(state, State::Ehlo(_)));
        assert_eq!(ctx.helo.as_deref(), Some("client.example.com"));
        assert!(ctx.extended);
        assert!(ctx.response.is_none());
    }

    #[test]
    fn mail_requires_greeting() {
        let mut ctx = context(ListenerMode::Inbound);
        let state = State::default().transition(Command::MailFrom(None, MailParameters::new()), &mut ctx);

        assert_eq!(state, State::Connect(Connect));
        assert_eq!(ctx.response.unwrap().0, Status::InvalidCommandSequence);
    }

    #[test]
    fn data_requires_recipient() {
        let mut ctx = context(ListenerMode::Inbound);
        let state = greeted(&mut ctx).transition(Command::MailFrom(None, MailParameters::new()), &mut ctx);
        let state = state.transition(Command::Data, &mut ctx);

        assert!(matches!(state, State::MailFrom(_)));
        assert_eq!(ctx.response.unwrap().0, Status::InvalidCommandSequence);
    }

    #[test]
    fn second_recipient_remembers_the_first() {
        let mut ctx = context(ListenerMode::Inbound);
        let transaction = forward();
        let state = State::Accepted(Accepted {
            transaction: transaction.clone(),
        });

        let state = state.transition(Command::RcptTo(String::from("other@example.com")), &mut ctx);
        assert_eq!(
            state,
            State::RcptTo(RcptTo {
                recipient: String::from("other@example.com"),
                previous: Some(transaction),
            })
        );
    }

    #[test]
    fn accepted_carries_transaction_into_data() {
        let mut ctx = context(ListenerMode::Inbound);
        let transaction = forward();
        let state = State::Accepted(Accepted {
            transaction: transaction.clone(),
        })
        .transition(Command::Data, &mut ctx);

        assert_eq!(state, State::Data(Data { transaction }));
    }

    #[test]
    fn rset_clears_transaction() {
        let mut ctx = context(ListenerMode::Inbound);
        let state = greeted(&mut ctx).transition(
            Command::MailFrom(
                Some(EmailAddress::parse("sender@example.org").unwrap()),
                MailParameters::new(),
            ),
            &mut ctx,
        );
        assert!(ctx.sender.is_some());

        let state = state.transition(Command::Rset, &mut ctx);
        assert!(matches!(state, State::Ehlo(_)));
        assert!(ctx.sender.is_none());
        assert_eq!(ctx.response.unwrap().0, Status::Ok);
    }

    #[test]
    fn prevent_starttls_during_transaction() {
        let mut ctx = context(ListenerMode::Inbound);
        let state = State::MailFrom(MailFrom { sender: None });
        let state = state.transition(Command::StartTLS, &mut ctx);

        assert!(matches!(state, State::MailFrom(_)));
        assert_eq!(ctx.response.unwrap().0, Status::InvalidCommandSequence);
    }

    #[test]
    fn auth_refused_on_inbound_port() {
        let mut ctx = context(ListenerMode::Inbound);
        let state = greeted(&mut ctx).transition(Command::Auth(AuthMechanism::Login, None), &mut ctx);

        assert!(matches!(state, State::Ehlo(_)));
        assert_eq!(
            ctx.response,
            Some((
                Status::InvalidCommandSequence,
                "5.5.1 authentication not enabled".into()
            ))
        );
    }

    #[test]
    fn auth_plain_with_initial_response() {
        let mut ctx = context(ListenerMode::Submission);
        // "\0alice\0hunter2"
        let state = greeted(&mut ctx).transition(
            Command::Auth(AuthMechanism::Plain, Some(String::from("AGFsaWNlAGh1bnRlcjI="))),
            &mut ctx,
        );

        assert_eq!(
            state,
            State::Auth(Auth {
                mechanism: AuthMechanism::Plain,
                step: AuthStep::Credentials {
                    username: String::from("alice"),
                    password: String::from("hunter2"),
                },
            })
        );
    }

    #[test]
    fn auth_login_exchange() {
        let mut ctx = context(ListenerMode::Submission);
        let state = greeted(&mut ctx).transition(Command::Auth(AuthMechanism::Login, None), &mut ctx);
        assert_eq!(state.challenge(), Some(USERNAME_CHALLENGE));

        let state = state.sasl_response("YWxpY2U=", &mut ctx);
        assert_eq!(state.challenge(), Some(PASSWORD_CHALLENGE));

        let state = state.sasl_response("aHVudGVyMg==", &mut ctx);
        assert!(matches!(
            state,
            State::Auth(Auth {
                step: AuthStep::Credentials { .. },
                ..
            })
        ));
    }

    #[test]
    fn auth_cancel_and_garbage() {
        let mut ctx = context(ListenerMode::Submission);
        let state = greeted(&mut ctx).transition(Command::Auth(AuthMechanism::Plain, None), &mut ctx);
        let state = state.sasl_response("*", &mut ctx);
        assert!(matches!(state, State::Ehlo(_)));

        let state = state.transition(Command::Auth(AuthMechanism::Plain, Some(String::from("%%%"))), &mut ctx);
        assert!(matches!(state, State::Ehlo(_)));
        assert_eq!(ctx.response.unwrap().0, Status::ParameterError);
    }

    #[test]
    fn quit_from_any_state() {
        let mut ctx = context(ListenerMode::Inbound);

        let state = State::default().transition(Command::Quit, &mut ctx);
        assert!(state.should_close());

        let state = State::Accepted(Accepted {
            transaction: forward(),
        })
        .transition(Command::Quit, &mut ctx);
        assert!(matches!(state, State::Quit(_)));
    }
}
