use std::{fs::File, io::BufReader as StdBufReader, path::Path, sync::Arc};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ProtocolVersion, ServerConfig, ServerConnection, SupportedCipherSuite,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
    server::TlsStream,
};

use crate::error::{ConnectionResult, TlsError, TlsResult};

#[derive(Clone, Debug, Deserialize)]
pub struct TlsContext {
    pub certificate: std::path::PathBuf,
    pub key: std::path::PathBuf,
}

impl TlsContext {
    /// Load the certificate chain and key into an acceptor.
    ///
    /// # Errors
    /// If either file is missing or unreadable, or rustls rejects the pair
    pub fn acceptor(&self) -> TlsResult<TlsAcceptor> {
        let certs = load_certs(&self.certificate).map_err(|e| TlsError::CertificateLoad {
            path: self.certificate.display().to_string(),
            source: e,
        })?;
        let key = load_key(&self.key)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn load_certs(path: &Path) -> std::io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut StdBufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let key_error = |reason: String| TlsError::KeyLoad {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = StdBufReader::new(File::open(path).map_err(|e| key_error(e.to_string()))?);

    match rustls_pemfile::read_one(&mut reader).map_err(|e| key_error(e.to_string()))? {
        Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
        Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
        Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
        _ => Err(key_error(String::from(
            "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)",
        ))),
    }
}

/// What a STARTTLS handshake negotiated.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    version: ProtocolVersion,
    cipher: SupportedCipherSuite,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> TlsResult<Self> {
        Ok(Self {
            version: conn
                .protocol_version()
                .ok_or(TlsError::ProtocolInfoMissing("protocol version"))?,
            cipher: conn
                .negotiated_cipher_suite()
                .ok_or(TlsError::ProtocolInfoMissing("cipher suite"))?,
        })
    }

    pub fn proto(&self) -> String {
        self.version.as_str().unwrap_or("unknown").to_string()
    }

    pub fn cipher(&self) -> String {
        self.cipher.suite().as_str().unwrap_or("unknown").to_string()
    }
}

/// A client connection, buffered for line reads.
///
/// Upgrading discards anything still buffered from the plain text phase, so
/// commands pipelined behind STARTTLS are never interpreted.
pub enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    Plain { stream: BufReader<Stream> },
    Tls { stream: Box<BufReader<TlsStream<Stream>>> },
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self::Plain {
            stream: BufReader::new(stream),
        }
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    #[tracing::instrument(level = "trace", skip_all)]
    pub(crate) async fn send<S: core::fmt::Display + Send + Sync>(
        &mut self,
        response: &S,
    ) -> ConnectionResult<usize> {
        let buffer = format!("{response}\r\n");

        match self {
            Self::Plain { stream } => {
                stream.write_all(buffer.as_bytes()).await?;
                stream.flush().await?;
            }
            Self::Tls { stream } => {
                stream.write_all(buffer.as_bytes()).await?;
                stream.flush().await?;
            }
        }

        Ok(buffer.len())
    }

    /// Read up to and including the next `\n`, at most `limit` bytes.
    ///
    /// Returns 0 once the peer has closed the connection.
    pub(crate) async fn receive_line(
        &mut self,
        buf: &mut Vec<u8>,
        limit: usize,
    ) -> ConnectionResult<usize> {
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);

        Ok(match self {
            Self::Plain { stream } => (&mut *stream).take(limit).read_until(b'\n', buf).await?,
            Self::Tls { stream } => {
                (&mut **stream)
                    .take(limit)
                    .read_until(b'\n', buf)
                    .await?
            }
        })
    }

    #[tracing::instrument(level = "trace", skip_all)]
    pub(crate) async fn upgrade(self, acceptor: &TlsAcceptor) -> TlsResult<(Self, TlsInfo)> {
        tracing::debug!("Upgrading connection ...");

        match self {
            Self::Plain { stream } => {
                let stream = acceptor.accept(stream.into_inner()).await?;
                let info = TlsInfo::of(stream.get_ref().1)?;

                Ok((
                    Self::Tls {
                        stream: Box::new(BufReader::new(stream)),
                    },
                    info,
                ))
            }
            Self::Tls { .. } => Err(TlsError::AlreadyTls),
        }
    }
}
