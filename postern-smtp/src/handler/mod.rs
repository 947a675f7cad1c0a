//! Business rules applied between protocol transitions.
//!
//! The state machine decides what a command means; a [`TransactionHandler`]
//! decides whether it is allowed and does the work. Each listener mode has its
//! own handler: [`InboundHandler`] relays to aliases and accepts returning
//! bounces, [`SubmissionHandler`] sends for authenticated accounts.

mod forward;
mod inbound;
mod submission;

use std::sync::Arc;

use async_trait::async_trait;
use postern_account::{Authenticator, DkimSigner, Resolver};
use postern_common::status::Status;
use postern_queue::Publisher;

pub use self::{
    forward::{ForwardError, Hop, received_header},
    inbound::InboundHandler,
    submission::SubmissionHandler,
};
use crate::{context::Context, rdns::ReverseLookup, spf::SpfVerifier, state::Transaction};

/// Shared collaborators every handler draws on.
#[derive(Debug, Clone)]
pub struct Services {
    pub resolver: Arc<Resolver>,
    pub signer: Arc<DkimSigner>,
    pub authenticator: Arc<Authenticator>,
    pub publisher: Publisher,
    pub spf: Arc<dyn SpfVerifier>,
    pub rdns: Arc<dyn ReverseLookup>,
}

/// Validation and work for the states that need it.
///
/// Every method records the reply to send on [`Context::response`]. Returning
/// `false` (or `None`) keeps the session where it was before the command.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    async fn authenticate(&self, _username: &str, _password: &str, ctx: &mut Context) -> bool {
        ctx.respond(
            Status::InvalidCommandSequence,
            "5.5.1 authentication not enabled",
        );
        false
    }

    async fn validate_mail_from(&self, ctx: &mut Context) -> bool;

    async fn validate_rcpt_to(&self, recipient: &str, ctx: &mut Context) -> Option<Transaction>;

    async fn handle_message(
        &self,
        transaction: &Transaction,
        message: Vec<u8>,
        ctx: &mut Context,
    ) -> bool;
}
