//! TLS configuration and certificate loading.
//!
//! Intercepted HTTPS terminates here twice: the client leg is accepted
//! with the configured certificate, the origin leg is dialled as an
//! ordinary TLS client.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Acceptor for client legs and connector for origin legs.
#[derive(Clone)]
pub struct TlsContext {
    acceptor: Option<TlsAcceptor>,
    connector: TlsConnector,
}

impl TlsContext {
    /// Build from configuration. Without a `[tls]` section the context can
    /// still dial origins but refuses to intercept client handshakes.
    pub fn from_config(config: Option<&TlsConfig>) -> Result<Self, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ca) = config.and_then(|c| c.origin_ca_path.as_deref()) {
            for cert in load_certs(Path::new(ca))? {
                roots.add(cert)?;
            }
        }
        let client_config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let acceptor = match config {
            Some(tls) => {
                let certs = load_certs(Path::new(&tls.cert_path))?;
                let key = load_key(Path::new(&tls.key_path))?;
                let server_config = ServerConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()?
                    .with_no_client_auth()
                    .with_single_cert(certs, key)?;
                tracing::info!(cert = %tls.cert_path, "TLS interception enabled");
                Some(TlsAcceptor::from(Arc::new(server_config)))
            }
            None => None,
        };

        Ok(Self {
            acceptor,
            connector: TlsConnector::from(Arc::new(client_config)),
        })
    }

    pub fn can_accept(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Complete the server-side handshake with an intercepted client.
    ///
    /// Returns `None` when no certificate is configured.
    pub async fn accept(
        &self,
        stream: TcpStream,
    ) -> Option<std::io::Result<server::TlsStream<TcpStream>>> {
        let acceptor = self.acceptor.as_ref()?;
        Some(acceptor.accept(stream).await)
    }

    /// Complete the client-side handshake with an origin.
    pub async fn connect(
        &self,
        name: ServerName<'static>,
        stream: TcpStream,
    ) -> std::io::Result<client::TlsStream<TcpStream>> {
        self.connector.connect(name, stream).await
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("intercepts", &self.can_accept())
            .finish()
    }
}
