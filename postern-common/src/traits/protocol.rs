use std::{fmt::Debug, net::SocketAddr};

use serde::Deserialize;
use tokio::net::TcpStream;

use crate::{
    Signal,
    error::{ProtocolError, SessionError},
};

pub trait SessionHandler {
    fn run(
        self,
        signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

/// A protocol served by a [`Listener`](crate::listener::Listener).
///
/// `Args` is the per-listener configuration read from the config file; everything
/// else a session needs (datastores, brokers) lives on the protocol value itself.
pub trait Protocol: Send + Sync {
    type Session: SessionHandler + Send + 'static;
    type Args: Clone + Debug + Send + Sync + for<'a> Deserialize<'a>;

    fn handle(&self, stream: TcpStream, peer: SocketAddr, args: &Self::Args) -> Self::Session;

    ///
    /// Validate the arguments being provided to the protocol
    ///
    /// # Errors
    /// When the arguments are unusable, for example TLS certificate paths that do not exist
    ///
    fn validate(&self, args: &Self::Args) -> Result<(), ProtocolError>;

    fn ty() -> &'static str;
}
