//! TLS for the local listener.
//!
//! Local clients connect over plain `ws://` unless the listener is given a
//! PEM certificate and key, in which case every accepted socket goes
//! through a rustls handshake before the WebSocket upgrade.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::TransportError;

/// Server-side TLS acceptor built from PEM files. Cheap to clone.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}

impl TlsAcceptor {
    /// Loads a certificate chain and its private key.
    ///
    /// # Errors
    /// [`TransportError::Certificate`] if either file can't be read,
    /// holds nothing usable, or the key doesn't fit the certificate.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, TransportError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let certs = load_certificates(cert_path)?;
        if certs.is_empty() {
            return Err(TransportError::certificate(
                cert_path,
                "no certificates found in file",
            ));
        }
        let key = load_private_key(key_path)?;

        let provider = rustls::crypto::ring::default_provider();
        let config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::certificate(cert_path, e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::certificate(cert_path, e.to_string()))?;

        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Runs the server side of the TLS handshake.
    pub async fn accept(
        &self,
        stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>, TransportError> {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TransportError::Handshake(format!("TLS: {e}")))
    }
}

fn load_certificates(
    path: &Path,
) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::certificate(path, e.to_string()))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::certificate(path, e.to_string()))
}

fn load_private_key(
    path: &Path,
) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::certificate(path, e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TransportError::certificate(path, e.to_string()))?
        .ok_or_else(|| {
            TransportError::certificate(path, "no private key found in file")
        })
}

// ---------------------------------------------------------------------------
// ClientStream
// ---------------------------------------------------------------------------

/// Byte stream under a local client's WebSocket: plain TCP, or TCP
/// wrapped in server-side TLS.
pub enum ClientStream {
    Plain(TcpStream),
    /// Boxed, the TLS state dwarfs a `TcpStream`.
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientStream {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pem_files_missing_cert() {
        let err = TlsAcceptor::from_pem_files(
            "/nonexistent/cert.pem",
            "/nonexistent/key.pem",
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Certificate { .. }));
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }

    #[test]
    fn test_from_pem_files_empty_cert_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("empty.pem");
        std::fs::write(&cert, "").unwrap();

        let err = TlsAcceptor::from_pem_files(&cert, dir.path().join("key.pem"))
            .unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }
}
