//! A scripted SMTP server for delivery tests.
//!
//! Every reply can be overridden through the builder, and everything the
//! client sends is recorded for later assertions.
#![allow(dead_code)]

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use postern_smtp::TlsContext;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::TlsAcceptor;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// The dot-stuffed body, without the terminating `.` line
    MessageContent(Vec<u8>),
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct Script {
    greeting: Reply,
    ehlo: Option<(u16, Vec<String>)>,
    helo: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    quit: Reply,
    /// Offer STARTTLS and upgrade with this when the client asks
    tls: Option<TlsAcceptor>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.other.com ESMTP"),
            ehlo: Some((
                250,
                vec![String::from("mock.other.com"), String::from("SIZE 10000000")],
            )),
            helo: Reply::new(250, "mock.other.com"),
            mail_from: Reply::new(250, "2.1.0 Ok"),
            rcpt_to: Reply::new(250, "2.1.5 Ok"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "2.0.0 Ok: queued as MOCK"),
            quit: Reply::new(221, "2.0.0 Bye"),
            tls: None,
        }
    }
}

fn ehlo_bytes(code: u16, lines: &[String]) -> Vec<u8> {
    let mut response = String::new();
    for (index, line) in lines.iter().enumerate() {
        let separator = if index + 1 == lines.len() { ' ' } else { '-' };
        let _ = write!(&mut response, "{code}{separator}{line}\r\n");
    }
    response.into_bytes()
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    async fn handle_client(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), BoxError> {
        let Some(stream) = Self::dialog(stream, &script, &commands, false).await? else {
            return Ok(());
        };
        let Some(acceptor) = script.tls.as_ref() else {
            return Ok(());
        };

        let stream = acceptor.accept(stream).await?;
        Self::dialog(stream, &script, &commands, true).await?;
        Ok(())
    }

    /// Serve commands until the client leaves. Hands the stream back when
    /// the client asked for an upgrade.
    async fn dialog<S: AsyncRead + AsyncWrite + Unpin>(
        stream: S,
        script: &Script,
        commands: &RwLock<Vec<SmtpCommand>>,
        secure: bool,
    ) -> Result<Option<S>, BoxError> {
        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        let offer_tls = script.tls.is_some() && !secure;

        if !secure {
            stream.write_all(&script.greeting.to_bytes()).await?;
        }

        loop {
            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), stream.read_line(&mut line)).await
            else {
                return Ok(None);
            };
            if read? == 0 {
                return Ok(None);
            }

            let text = line.trim_end();
            let (verb, rest) = text.split_once(' ').unwrap_or((text, ""));

            let (reply, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (
                    script.ehlo.as_ref().map_or_else(
                        || Reply::new(502, "5.5.2 EHLO not supported").to_bytes(),
                        |(code, lines)| {
                            let mut lines = lines.clone();
                            if offer_tls {
                                lines.push(String::from("STARTTLS"));
                            }
                            ehlo_bytes(*code, &lines)
                        },
                    ),
                    SmtpCommand::Ehlo(rest.to_string()),
                ),
                "HELO" => (script.helo.to_bytes(), SmtpCommand::Helo(rest.to_string())),
                "MAIL" => (
                    script.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(rest.to_string()),
                ),
                "RCPT" => (
                    script.rcpt_to.to_bytes(),
                    SmtpCommand::RcptTo(rest.to_string()),
                ),
                "DATA" => (script.data.to_bytes(), SmtpCommand::Data),
                "STARTTLS" if offer_tls => {
                    commands.write().await.push(SmtpCommand::StartTls);
                    stream
                        .write_all(&Reply::new(220, "2.0.0 Ready to start TLS").to_bytes())
                        .await?;
                    stream.flush().await?;
                    return Ok(Some(stream.into_inner()));
                }
                "STARTTLS" => (
                    Reply::new(454, "4.7.0 TLS not available").to_bytes(),
                    SmtpCommand::StartTls,
                ),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    stream.write_all(&script.quit.to_bytes()).await?;
                    stream.flush().await?;
                    return Ok(None);
                }
                _ => (
                    Reply::new(500, "5.5.2 unknown command").to_bytes(),
                    SmtpCommand::Other(text.to_string()),
                ),
            };

            let reading_data = command == SmtpCommand::Data && script.data.code == 354;
            commands.write().await.push(command);
            stream.write_all(&reply).await?;
            stream.flush().await?;

            if reading_data {
                let mut content = Vec::new();
                loop {
                    line.clear();
                    if stream.read_line(&mut line).await? == 0 {
                        return Ok(None);
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.extend_from_slice(line.as_bytes());
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                stream.write_all(&script.data_end.to_bytes()).await?;
                stream.flush().await?;
            }
        }
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    /// `None` makes the server refuse EHLO so clients fall back to HELO.
    #[must_use]
    pub fn with_ehlo(mut self, ehlo: Option<(u16, Vec<String>)>) -> Self {
        self.script.ehlo = ehlo;
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    /// Advertise STARTTLS and complete the handshake with the test certificate.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        let fixtures = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../postern-smtp/tests/fixtures/tls");
        let context = TlsContext {
            certificate: fixtures.join("cert.pem"),
            key: fixtures.join("key.pem"),
        };
        self.script.tls = Some(context.acceptor().expect("test certificate loads"));
        self
    }

    /// Bind to a random local port and start serving.
    ///
    /// # Errors
    /// If the listener cannot be bound
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let server = MockSmtpServer {
            addr,
            commands: Arc::clone(&commands),
            connections: Arc::clone(&connections),
            shutdown: Arc::clone(&shutdown),
        };

        tokio::spawn(async move {
            while !shutdown.load(Ordering::SeqCst) {
                let Ok(Ok((stream, _))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                connections.fetch_add(1, Ordering::SeqCst);
                let script = Arc::clone(&script);
                let commands = Arc::clone(&commands);
                tokio::spawn(async move {
                    if let Err(err) = MockSmtpServer::handle_client(stream, script, commands).await {
                        eprintln!("mock server client error: {err}");
                    }
                });
            }
        });

        Ok(server)
    }
}
