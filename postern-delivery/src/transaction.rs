//! One outbound SMTP dialog over an established connection.

use postern_common::{envelope::Envelope, internal};
use postern_smtp::client::{ClientError, Response, SmtpClient};
use tokio::net::TcpStream;

use crate::{
    dns::MailServer,
    error::{DeliveryError, Stage},
};

pub struct SmtpTransaction<'a> {
    envelope: &'a Envelope,
    server: &'a MailServer,
    helo: &'a str,
    accept_invalid_certs: bool,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(envelope: &'a Envelope, server: &'a MailServer, helo: &'a str) -> Self {
        Self {
            envelope,
            server,
            helo,
            accept_invalid_certs: false,
        }
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Deliver the envelope and return the server's final reply.
    ///
    /// # Errors
    /// The first reply or I/O failure that stops the dialog
    #[tracing::instrument(
        level = "debug",
        skip(self, stream),
        fields(server = %self.server.address(), id = %self.envelope.id)
    )]
    pub async fn execute(self, stream: TcpStream) -> Result<String, DeliveryError> {
        let mut client = SmtpClient::from_stream(stream, self.server.host.clone())
            .accept_invalid_certs(self.accept_invalid_certs);

        let greeting = client.read_greeting().await;
        self.check(Stage::Greeting, greeting)?;

        let mut capabilities = self.hello(&mut client).await?;

        if capabilities.as_ref().is_some_and(|ehlo| ehlo.has_extension("STARTTLS")) {
            let response = client.starttls().await;
            let response = self.check(Stage::StartTls, response)?;
            internal!(
                level = DEBUG,
                "STARTTLS with {}: {}",
                self.server.host,
                response.message()
            );

            let ehlo = client.ehlo(self.helo).await;
            capabilities = Some(self.check(Stage::Ehlo, ehlo)?);
        }

        let size = capabilities
            .as_ref()
            .filter(|ehlo| ehlo.has_extension("SIZE"))
            .map(|_| self.envelope.message.len());

        let response = client.mail_from(self.envelope.mail_from(), size).await;
        self.check(Stage::MailFrom, response)?;

        let response = client.rcpt_to(&self.envelope.to).await;
        self.check(Stage::RcptTo, response)?;

        let response = client.data().await;
        self.check(Stage::Data, response)?;

        let response = client.send_message(&self.envelope.message).await;
        let accepted = self.check(Stage::Message, response)?;

        // The message is the remote's responsibility from here
        if let Err(err) = client.quit().await {
            internal!(
                level = DEBUG,
                "QUIT to {} after delivery failed: {err}",
                self.server.host
            );
        }

        Ok(accepted.message())
    }

    /// `EHLO`, falling back to `HELO` for servers that refuse it.
    ///
    /// Returns the EHLO reply when there is one.
    async fn hello(&self, client: &mut SmtpClient) -> Result<Option<Response>, DeliveryError> {
        let ehlo = client.ehlo(self.helo).await;
        match ehlo {
            Ok(response) if response.is_success() => Ok(Some(response)),
            Ok(response) => {
                internal!(
                    level = DEBUG,
                    "{} refused EHLO ({}), trying HELO",
                    self.server.host,
                    response.code
                );
                let helo = client.helo(self.helo).await;
                self.check(Stage::Helo, helo)?;
                Ok(None)
            }
            Err(source) => Err(DeliveryError::protocol(
                &self.server.address(),
                Stage::Ehlo,
                source,
            )),
        }
    }

    fn check(
        &self,
        stage: Stage,
        response: Result<Response, ClientError>,
    ) -> Result<Response, DeliveryError> {
        response
            .and_then(Response::ensure_success)
            .map_err(|source| DeliveryError::protocol(&self.server.address(), stage, source))
    }
}
