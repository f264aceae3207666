//! Byte streams for the two legs of a connection.
//!
//! Plain and TLS legs read and write the same way; the pipeline never
//! looks at which one it holds. The choice is made once, when the origin
//! leg is opened.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

use crate::net::tls::TlsContext;

/// Origin port whose traffic is intercepted as TLS.
pub const HTTPS_PORT: u16 = 443;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connecting to {destination} timed out after {after:?}")]
    ConnectTimeout {
        destination: SocketAddr,
        after: Duration,
    },

    #[error("connecting to {destination}: {source}")]
    Connect {
        destination: SocketAddr,
        source: io::Error,
    },

    #[error("TLS connection to port 443 but no certificate is configured")]
    TlsUnavailable,

    #[error("client TLS handshake: {0}")]
    ClientHandshake(#[source] io::Error),

    #[error("origin TLS handshake: {0}")]
    OriginHandshake(#[source] io::Error),

    #[error("TLS handshake as {role:?} timed out after {after:?}")]
    HandshakeTimeout { role: TlsRole, after: Duration },
}

/// One leg of a proxied connection.
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Which end of the handshake a TLS leg played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}

impl Transport {
    pub fn tls_role(&self) -> Option<TlsRole> {
        match self {
            Transport::Plain(_) => None,
            Transport::Tls(stream) => match stream.as_ref() {
                TlsStream::Client(_) => Some(TlsRole::Client),
                TlsStream::Server(_) => Some(TlsRole::Server),
            },
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Both legs of an intercepted connection.
#[derive(Debug)]
pub struct Legs {
    pub client: Transport,
    pub server: Transport,
}

/// Dial `destination` and wrap both legs.
///
/// Connections headed for port 443 are TLS on both sides. Every step is
/// bounded by `timeout`: the TCP connect and each of the two handshakes.
pub async fn open(
    client: TcpStream,
    destination: SocketAddr,
    tls: &TlsContext,
    timeout: Duration,
) -> Result<Legs, TransportError> {
    let intercept = destination.port() == HTTPS_PORT;
    if intercept && !tls.can_accept() {
        return Err(TransportError::TlsUnavailable);
    }

    let server = tokio::time::timeout(timeout, TcpStream::connect(destination))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            destination,
            after: timeout,
        })?
        .map_err(|source| TransportError::Connect {
            destination,
            source,
        })?;
    let _ = server.set_nodelay(true);

    if !intercept {
        return Ok(Legs {
            client: Transport::Plain(client),
            server: Transport::Plain(server),
        });
    }
    intercept_tls(client, server, destination, tls, timeout).await
}

/// Terminate the client's TLS, then handshake with the origin using the
/// name the client asked for, or the destination IP when it sent no SNI.
pub(crate) async fn intercept_tls(
    client: TcpStream,
    server: TcpStream,
    destination: SocketAddr,
    tls: &TlsContext,
    timeout: Duration,
) -> Result<Legs, TransportError> {
    let accepted = tokio::time::timeout(timeout, tls.accept(client))
        .await
            .map_err(|_| TransportError::HandshakeTimeout {
            role: TlsRole::Server,
            after: timeout,
        })?;
    let client = accepted
        .ok_or(TransportError::TlsUnavailable)?
        .map_err(TransportError::ClientHandshake)?;

    let name = client
        .get_ref()
        .1
        .server_name()
        .and_then(|sni| ServerName::try_from(sni.to_string()).ok())
        .unwrap_or_else(|| ServerName::from(destination.ip()));
    tracing::debug!(server_name = ?name, "Client handshake complete");

    let server = tokio::time::timeout(timeout, tls.connect(name, server))
        .await
        .map_err(|_| TransportError::HandshakeTimeout {
            role: TlsRole::Client,
            after: timeout,
        })?
        .map_err(TransportError::OriginHandshake)?;

    Ok(Legs {
        client: Transport::Tls(Box::new(TlsStream::from(client))),
        server: Transport::Tls(Box::new(TlsStream::from(server))),
    })
}
