use std::{net::SocketAddr, sync::Arc, time::Instant};

use postern_common::{
    Signal, config::ServerTimeouts, error::SessionError, internal, outgoing, status::Status,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    State,
    connection::{Connection, TlsContext},
    context::{Context, ListenerMode},
    handler::TransactionHandler,
    state,
};

mod events;
mod io;
mod response;

/// Longest command line accepted, CRLF included.
pub(crate) const COMMAND_LINE_LIMIT: usize = 4096;
/// Message lines longer than this are read in pieces.
pub(crate) const DATA_LINE_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: ListenerMode,
    pub tls_context: Option<TlsContext>,
    pub banner: String,
    pub max_message_size: usize,
    pub timeouts: ServerTimeouts,
}

impl SessionConfig {
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    mode: ListenerMode,
    tls_context: Option<TlsContext>,
    banner: String,
    max_message_size: usize,
    timeouts: ServerTimeouts,
}

impl SessionConfigBuilder {
    #[must_use]
    pub const fn with_mode(mut self, mode: ListenerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the TLS context for STARTTLS support
    #[must_use]
    pub fn with_tls_context(mut self, tls_context: Option<TlsContext>) -> Self {
        self.tls_context = tls_context;
        self
    }

    /// Set the server banner hostname
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// A value of 0 means no limit is enforced.
    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            mode: self.mode,
            tls_context: self.tls_context,
            banner: self.banner,
            max_message_size: self.max_message_size,
            timeouts: self.timeouts,
        }
    }
}

/// One client connection, from greeting to close.
pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    pub(super) state: State,
    pub(super) context: Context,
    pub(super) connection: Connection<Stream>,
    pub(super) handler: Arc<dyn TransactionHandler>,
    pub(super) tls_context: Option<TlsContext>,
    /// Message bytes collected so far, already dot-unstuffed.
    pub(super) message: Vec<u8>,
    /// The last data read stopped at the line limit, not at a line end.
    pub(super) partial_line: bool,
    timeouts: ServerTimeouts,
    start_time: Instant,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        handler: Arc<dyn TransactionHandler>,
        config: SessionConfig,
    ) -> Self {
        let banner: Arc<str> = if config.banner.is_empty() {
            std::env::var("HOSTNAME")
                .unwrap_or_else(|_| String::from("localhost"))
                .into()
        } else {
            config.banner.into()
        };

        let mut context = Context::new(peer, config.mode, banner);
        context.max_message_size = config.max_message_size;

        Self {
            state: State::default(),
            context,
            connection: Connection::new(stream),
            handler,
            tls_context: config.tls_context,
            message: Vec::new(),
            partial_line: false,
            timeouts: config.timeouts,
            start_time: Instant::now(),
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), SessionError> {
        outgoing!("{line}");

        self.connection.send(&line).await.map_err(|err| {
            internal!(level = ERROR, "{err}");
            SessionError::Protocol(format!("Failed to send response: {err}"))
        })?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(peer = %self.context.peer, id = %self.context.id))]
    pub async fn run(
        mut self,
        mut signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        internal!("Connected");

        let greeting = format!("{} {} ESMTP", Status::ServiceReady, self.context.banner);
        self.send(&greeting).await?;

        let mut line = Vec::with_capacity(COMMAND_LINE_LIMIT);
        // Shutdown arrived mid-transaction; close once it completes
        let mut draining = false;

        loop {
            if self.start_time.elapsed() >= self.timeouts.connection() {
                tracing::warn!(
                    peer = %self.context.peer,
                    max_secs = self.timeouts.connection_secs,
                    "Connection exceeded maximum lifetime, closing"
                );
                let _ = self
                    .send(&format!("{} 4.4.2 connection lifetime exceeded", Status::Unavailable))
                    .await;
                return Err(SessionError::Timeout(self.timeouts.connection_secs));
            }

            let reading = matches!(self.state, State::Reading(_));
            let (timeout, limit) = if reading {
                (self.timeouts.data(), DATA_LINE_LIMIT)
            } else {
                (self.timeouts.command(), COMMAND_LINE_LIMIT)
            };

            // A read cut short by the signal keeps its bytes in `line`
            let read = tokio::select! {
                _ = signal.recv(), if !draining => {
                    if self.state.in_transaction() {
                        internal!(level = DEBUG, "Shutdown requested, finishing the current transaction");
                        draining = true;
                        continue;
                    }
                    self.shut_down().await;
                    return Ok(());
                }
                read = tokio::time::timeout(timeout, self.connection.receive_line(&mut line, limit)) => read,
            };

            let read = match read {
                Err(_) => {
                    tracing::warn!(
                        peer = %self.context.peer,
                        state = %self.state,
                        timeout_secs = timeout.as_secs(),
                        "Client connection timed out"
                    );
                    let _ = self
                        .send(&format!("{} 4.4.2 timeout exceeded", Status::Unavailable))
                        .await;
                    return Err(SessionError::Timeout(timeout.as_secs()));
                }
                Ok(Err(err)) => return Err(SessionError::Protocol(err.to_string())),
                Ok(Ok(read)) => read,
            };

            // The peer has closed the connection
            if read == 0 {
                internal!("Connection closed");
                return Ok(());
            }

            let replies = self.receive(&line).await;
            line.clear();
            for reply in replies {
                self.send(&reply).await?;
            }

            if self.state.should_close() {
                internal!("Connection closed");
                return Ok(());
            }

            if draining && !self.state.in_transaction() {
                self.shut_down().await;
                return Ok(());
            }

            if matches!(self.state, State::StartTls(_)) {
                self = self.upgrade().await?;
            }
        }
    }

    async fn shut_down(&mut self) {
        internal!(level = DEBUG, "Shutting down session");
        let _ = self
            .send(&format!("{} 4.3.2 server shutting down", Status::Unavailable))
            .await;
    }

    async fn upgrade(mut self) -> Result<Self, SessionError> {
        let Some(tls_context) = self.tls_context.as_ref() else {
            return Err(SessionError::Protocol(String::from("TLS is not configured")));
        };

        let acceptor = tls_context
            .acceptor()
            .map_err(|err| SessionError::Protocol(err.to_string()))?;

        let (connection, info) = self
            .connection
            .upgrade(&acceptor)
            .await
            .map_err(|err| SessionError::Protocol(err.to_string()))?;

        internal!(
            level = DEBUG,
            "Connection upgraded with {} {}",
            info.proto(),
            info.cipher()
        );

        self.connection = connection;
        self.context.reset_session();
        self.context.tls = Some(info);
        self.state = State::Connect(state::Connect);
        self.message.clear();

        Ok(self)
    }
}
