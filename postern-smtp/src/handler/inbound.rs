use async_trait::async_trait;
use postern_common::{
    address::EmailAddress,
    envelope::{Envelope, EnvelopeKind, QueueLevel},
    internal,
    record::{Entry, Metric},
    status::Status,
};
use ulid::Ulid;

use super::{Services, TransactionHandler, forward};
use crate::{
    context::Context,
    state::{BounceReturnTransaction, ForwardTransaction, Transaction},
};

/// Mail arriving from the internet for one of our domains.
#[derive(Debug, Clone)]
pub struct InboundHandler {
    services: Services,
}

impl InboundHandler {
    pub const fn new(services: Services) -> Self {
        Self { services }
    }

    async fn log_reject(&self, ctx: &Context, to: &str, status: &str, ids: (i64, i64, i64)) {
        let (account_id, domain_id, alias_id) = ids;
        let entry =
            Entry::rejected(ctx.id, &ctx.sender_str(), to, status).with_ids(account_id, domain_id, alias_id);

        if let Err(err) = self.services.publisher.entry(&entry).await {
            internal!(level = WARN, "Unable to publish reject log for {to}: {err}");
        }
    }

    async fn reject_recipient(&self, ctx: &mut Context, to: &str, ids: (i64, i64, i64), reason: String) {
        internal!(level = INFO, "Rejecting recipient {to}: {reason}");

        self.log_reject(ctx, to, &reason, ids).await;

        let metric = Metric::inbound_reject(&ctx.sender_str(), to, ids.1);
        if let Err(err) = self.services.publisher.metric(&metric).await {
            internal!(level = WARN, "Unable to publish reject metric for {to}: {err}");
        }

        ctx.respond(Status::Error, format!("5.1.1 unknown recipient ({})", ctx.id));
    }

    fn temporary(ctx: &mut Context) {
        ctx.respond(
            Status::ActionUnavailable,
            format!("4.3.0 temporary failure, try again later ({})", ctx.id),
        );
    }

    async fn bounce_return(
        &self,
        bounce: &BounceReturnTransaction,
        message: Vec<u8>,
        ctx: &mut Context,
    ) -> bool {
        let return_path = &bounce.return_path;
        let envelope = Envelope {
            id: return_path.id,
            kind: EnvelopeKind::BounceReturn,
            from: ctx.sender_str(),
            return_path: None,
            via: bounce.recipient.to_string(),
            to: return_path.return_to.clone(),
            message,
            account_id: return_path.account_id,
            domain_id: bounce.domain.id,
            alias_id: return_path.alias_id,
            destination_id: 0,
            queue_level: QueueLevel::Low,
            status: String::new(),
            bounce: Some(String::from("Returned")),
        };

        match self.services.publisher.envelope(&envelope).await {
            Ok(()) => {
                internal!(
                    level = INFO,
                    "Returning bounce for {} to {}",
                    envelope.id,
                    envelope.to
                );
                ctx.respond(Status::Ok, format!("2.0.0 Ok: queued as {}", envelope.id));
                true
            }
            Err(err) => {
                internal!(level = ERROR, "Unable to queue returned bounce {}: {err}", envelope.id);
                let status = if err.is_transient() {
                    Status::ActionUnavailable
                } else {
                    Status::TransactionFailed
                };
                let code = if err.is_transient() { "4.3.0" } else { "5.3.0" };
                ctx.respond(status, format!("{code} unable to relay this message ({})", ctx.id));
                false
            }
        }
    }
}

#[async_trait]
impl TransactionHandler for InboundHandler {
    #[tracing::instrument(level = "debug", skip_all, fields(id = %ctx.id, peer = %ctx.peer))]
    async fn validate_mail_from(&self, ctx: &mut Context) -> bool {
        let helo = ctx.helo.clone().unwrap_or_default();
        let sender = ctx
            .sender
            .as_ref()
            .map_or_else(|| format!("postmaster@{helo}"), ToString::to_string);

        let outcome = self
            .services
            .spf
            .verify(ctx.peer.ip(), &helo, &sender)
            .await;

        internal!(level = DEBUG, "SPF for {sender} from {}: {outcome}", ctx.peer.ip());

        if outcome.rejects() {
            self.log_reject(ctx, "", &outcome.to_string(), (0, 0, 0)).await;
            ctx.respond(Status::Error, format!("5.7.23 spf check failed ({})", ctx.id));
            return false;
        }

        ctx.respond(Status::Ok, "2.1.0 Ok");
        true
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(id = %ctx.id))]
    async fn validate_rcpt_to(&self, recipient: &str, ctx: &mut Context) -> Option<Transaction> {
        let resolver = &self.services.resolver;

        let domain = match resolver.resolve_domain(recipient).await {
            Ok(domain) => domain,
            Err(err) if err.is_transient() => {
                internal!(level = WARN, "Domain lookup for {recipient} failed: {err}");
                Self::temporary(ctx);
                return None;
            }
            Err(err) => {
                self.reject_recipient(ctx, recipient, err.partial_ids(), err.to_string())
                    .await;
                return None;
            }
        };

        // The domain resolved so the address parses
        let address = EmailAddress::parse(recipient).ok()?;

        match resolver.resolve_return_path(recipient).await {
            Ok(return_path) => {
                internal!(
                    level = DEBUG,
                    "{recipient} is the return path of {}",
                    return_path.id
                );
                ctx.respond(Status::Ok, "2.1.5 Ok");
                return Some(Transaction::BounceReturn(BounceReturnTransaction {
                    recipient: address,
                    domain,
                    return_path,
                }));
            }
            Err(err) if err.is_transient() => {
                internal!(level = WARN, "Return path lookup for {recipient} failed: {err}");
                Self::temporary(ctx);
                return None;
            }
            Err(_) => {}
        }

        match resolver.resolve_alias(recipient).await {
            Ok(alias) => {
                ctx.respond(Status::Ok, "2.1.5 Ok");
                Some(Transaction::Forward(ForwardTransaction {
                    id: Ulid::new(),
                    recipient: address,
                    domain,
                    alias,
                }))
            }
            Err(err) if err.is_transient() => {
                internal!(level = WARN, "Alias lookup for {recipient} failed: {err}");
                Self::temporary(ctx);
                None
            }
            Err(err) => {
                self.reject_recipient(ctx, recipient, err.partial_ids(), err.to_string())
                    .await;
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
        match transaction {
            Transaction::BounceReturn(bounce) => self.bounce_return(bounce, message, ctx).await,
            Transaction::Forward(forward) => {
                match forward::forward(&self.services, forward, &message, ctx).await {
                    Ok(queued) => {
                        internal!(
                            level = INFO,
                            "Forwarded {} to {queued} destination(s)",
                            forward.id
                        );
                        ctx.respond(Status::Ok, format!("2.0.0 Ok: queued as {}", forward.id));
                        true
                    }
                    Err(err) => {
                        internal!(level = ERROR, "Forwarding {} failed: {err}", forward.id);
                        let status = err.status();
                        let code = if status.is_temporary() { "4.3.0" } else { "5.3.0" };
                        ctx.respond(status, format!("{code} unable to relay this message ({})", ctx.id));
                        false
                    }
                }
            }
            Transaction::Submission(_) => {
                ctx.respond(
                    Status::TransactionFailed,
                    format!("5.3.0 unable to relay this message ({})", ctx.id),
                );
                false
            }
        }
    }
}
