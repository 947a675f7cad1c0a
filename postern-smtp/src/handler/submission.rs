use async_trait::async_trait;
use postern_account::AuthError;
use postern_common::{
    address::EmailAddress,
    envelope::{Envelope, EnvelopeKind, QueueLevel},
    internal,
    status::Status,
};
use ulid::Ulid;

use super::{Services, TransactionHandler};
use crate::{
    context::Context,
    state::{SubmissionTransaction, Transaction},
};

/// Mail sent by an authenticated account from one of its own domains.
#[derive(Debug, Clone)]
pub struct SubmissionHandler {
    services: Services,
}

impl SubmissionHandler {
    pub const fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl TransactionHandler for SubmissionHandler {
    #[tracing::instrument(level = "debug", skip(self, password, ctx), fields(id = %ctx.id))]
    async fn authenticate(&self, username: &str, password: &str, ctx: &mut Context) -> bool {
        match self.services.authenticator.authenticate(username, password).await {
            Ok(account) => {
                internal!(level = INFO, "Authenticated {username}");
                ctx.account = Some(account);
                ctx.respond(Status::AuthSucceeded, "2.7.0 authentication successful");
                true
            }
            Err(AuthError::Unsupported) => {
                ctx.respond(Status::ParameterNotImplemented, "5.5.4 unsupported");
                false
            }
            Err(AuthError::InvalidCredentials) => {
                internal!(level = INFO, "Authentication failed for {username}");
                ctx.respond(Status::AuthFailed, "5.7.8 authentication failed");
                false
            }
            Err(err @ AuthError::Store(_)) => {
                internal!(level = ERROR, "Authentication for {username} failed: {err}");
                ctx.respond(
                    Status::ActionUnavailable,
                    format!("4.3.0 temporary authentication failure ({})", ctx.id),
                );
                false
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %ctx.id))]
    async fn validate_mail_from(&self, ctx: &mut Context) -> bool {
        let Some(account) = ctx.account.clone() else {
            ctx.respond(Status::AuthRequired, "5.7.0 authentication required");
            return false;
        };

        let Some(sender) = ctx.sender.as_ref().map(ToString::to_string) else {
            ctx.respond(Status::Error, "5.7.1 sender domain not permitted");
            return false;
        };

        match self.services.resolver.resolve_domain(&sender).await {
            Ok(domain) if domain.account_id == account.id => {
                ctx.sender_domain = Some(domain);
                ctx.respond(Status::Ok, "2.1.0 Ok");
                true
            }
            Err(err) if err.is_transient() => {
                internal!(level = WARN, "Domain lookup for {sender} failed: {err}");
                ctx.respond(
                    Status::ActionUnavailable,
                    format!("4.3.0 temporary failure, try again later ({})", ctx.id),
                );
                false
            }
            _ => {
                internal!(
                    level = INFO,
                    "{} may not send as {sender}",
                    account.username
                );
                ctx.respond(Status::Error, "5.7.1 sender domain not permitted");
                false
            }
        }
    }

    async fn validate_rcpt_to(&self, recipient: &str, ctx: &mut Context) -> Option<Transaction> {
        let Some(domain) = ctx.sender_domain.clone() else {
            ctx.respond(Status::InvalidCommandSequence, "5.5.1 sender not accepted");
            return None;
        };

        match EmailAddress::parse(recipient) {
            Ok(recipient) => {
                ctx.respond(Status::Ok, "2.1.5 Ok");
                Some(Transaction::Submission(SubmissionTransaction {
                    id: Ulid::new(),
                    recipient,
                    domain,
                }))
            }
            Err(err) => {
                ctx.respond(Status::ParameterError, format!("5.1.3 {err}"));
                None
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %ctx.id, envelope = %transaction.id()))]
    async fn handle_message(
        &self,
        transaction: &Transaction,
        message: Vec<u8>,
        ctx: &mut Context,
    ) -> bool {
        let (Transaction::Submission(submission), Some(account)) = (transaction, ctx.account.clone())
        else {
            ctx.respond(
                Status::TransactionFailed,
                format!("5.3.0 unable to relay this message ({})", ctx.id),
            );
            return false;
        };

        let signed = match self.services.signer.sign(&submission.domain, &message).await {
            Ok(signed) => signed,
            Err(err) => {
                internal!(level = ERROR, "Signing {} failed: {err}", submission.id);
                let (status, code) = if err.is_transient() {
                    (Status::ActionUnavailable, "4.3.0")
                } else {
                    (Status::TransactionFailed, "5.3.0")
                };
                ctx.respond(status, format!("{code} unable to relay this message ({})", ctx.id));
                return false;
            }
        };

        let sender = ctx.sender_str();
        let envelope = Envelope {
            id: submission.id,
            kind: EnvelopeKind::Submission,
            from: sender.clone(),
            return_path: None,
            via: sender,
            to: submission.recipient.to_string(),
            message: signed,
            account_id: account.id,
            domain_id: submission.domain.id,
            alias_id: 0,
            destination_id: 0,
            queue_level: QueueLevel::High,
            status: String::new(),
            bounce: None,
        };

        match self.services.publisher.envelope(&envelope).await {
            Ok(()) => {
                internal!(level = INFO, "Queued submission {} for {}", envelope.id, envelope.to);
                ctx.respond(Status::Ok, format!("2.0.0 Ok: queued as {}", envelope.id));
                true
            }
            Err(err) => {
                internal!(level = ERROR, "Unable to queue submission {}: {err}", envelope.id);
                let (status, code) = if err.is_transient() {
                    (Status::ActionUnavailable, "4.3.0")
                } else {
                    (Status::TransactionFailed, "5.3.0")
                };
                ctx.respond(status, format!("{code} unable to relay this message ({})", ctx.id));
                false
            }
        }
    }
}
