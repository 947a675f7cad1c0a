use std::{net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::{
    Signal,
    error::ListenerError,
    internal,
    traits::protocol::{Protocol, SessionHandler},
};

/// One listening socket and the protocol arguments for its sessions.
///
/// In RON: `(socket: "[::]:25", args: (..))`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig<Args> {
    pub socket: SocketAddr,
    pub args: Args,
}

pub struct Listener<Proto: Protocol> {
    protocol: Arc<Proto>,
    socket: SocketAddr,
    args: Proto::Args,
}

impl<Proto: Protocol + 'static> Listener<Proto> {
    pub fn new(protocol: Arc<Proto>, config: ListenerConfig<Proto::Args>) -> Self {
        Self {
            protocol,
            socket: config.socket,
            args: config.args,
        }
    }

    /// # Errors
    /// If the protocol rejects this listener's arguments
    pub fn init(&self) -> Result<(), ListenerError> {
        Ok(self.protocol.validate(&self.args)?)
    }

    /// Accept connections until a shutdown signal arrives, then wait for open sessions.
    ///
    /// # Errors
    /// If the socket cannot be bound or accepting fails
    #[tracing::instrument(level = "trace", skip_all, fields(socket = %self.socket))]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        internal!("Serving {} on {:?} with {:?}", Proto::ty(), self.socket, self.args);

        let listener =
            TcpListener::bind(self.socket)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: self.socket.to_string(),
                    source,
                })?;

        let mut sessions: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown)) {
                        internal!(
                            level = INFO,
                            "{} Listener {} received Shutdown signal, finishing sessions ...",
                            Proto::ty(),
                            self.socket
                        );
                        join_all(sessions).await;
                        return Ok(());
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = connection.map_err(ListenerError::AcceptFailed)?;
                    tracing::debug!("Connection received on {} from {peer}", self.socket);

                    let session = self.protocol.handle(stream, peer, &self.args);
                    let signal = shutdown.resubscribe();

                    sessions.retain(|handle| !handle.is_finished());
                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run(signal).await {
                            internal!(level = ERROR, "Error: {err}");
                        }
                    }));
                }
            }
        }
    }
}
