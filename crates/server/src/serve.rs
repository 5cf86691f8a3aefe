//! TCP/TLS listener.
//!
//! Connections are served by hyper directly rather than through
//! `axum::serve` so that the client certificates of a TLS session can be
//! attached to each request as a [`PeerCertificates`] extension.

use crate::error::ServeError;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use larder_core::config::TlsConfig;
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerConfig, WebPkiClientVerifier};
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

/// Certificates presented by the client during the TLS handshake, leaf first.
#[derive(Clone, Debug)]
pub struct PeerCertificates(pub Arc<Vec<CertificateDer<'static>>>);

impl PeerCertificates {
    /// The client's own (leaf) certificate.
    pub fn first(&self) -> Option<&CertificateDer<'static>> {
        self.0.first()
    }
}

/// Build the rustls server configuration from PEM files.
///
/// With `client_cas` set, client certificates are verified against those
/// CAs. Clients without a certificate are still admitted unless
/// `require_client_cert` is set.
pub fn load_tls_config(config: &TlsConfig) -> Result<Arc<ServerConfig>, ServeError> {
    let certs = load_certs(&config.cert)?;
    let key = load_private_key(&config.key)?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder =
        ServerConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

    let builder = match &config.client_cas {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if config.require_client_cert {
                verifier.build()?
            } else {
                verifier.allow_unauthenticated().build()?
            };
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut server_config = builder.with_single_cert(certs, key)?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(server_config))
}

fn open(path: &Path) -> Result<BufReader<std::fs::File>, ServeError> {
    std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|source| ServeError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServeError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ServeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ServeError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServeError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| ServeError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ServeError::NoPrivateKey(path.to_path_buf()))
}

/// Accept connections until `shutdown` resolves.
///
/// Each connection runs on its own task. A failed TLS handshake only drops
/// that connection.
pub async fn serve<F>(
    listener: TcpListener,
    router: Router,
    tls: Option<TlsAcceptor>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    loop {
        let (stream, remote) = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down listener");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // typically EMFILE
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let router = router.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => {
                        let peer = stream
                            .get_ref()
                            .1
                            .peer_certificates()
                            .filter(|certs| !certs.is_empty())
                            .map(|certs| PeerCertificates(Arc::new(certs.to_vec())));
                        serve_connection(stream, remote, peer, router).await;
                    }
                    Err(e) => {
                        tracing::debug!(remote = %remote, error = %e, "TLS handshake failed");
                    }
                },
                None => serve_connection(stream, remote, None, router).await,
            }
        });
    }
}

async fn serve_connection<S>(
    stream: S,
    remote: SocketAddr,
    peer: Option<PeerCertificates>,
    router: Router,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut req: hyper::Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(remote));
        if let Some(peer) = &peer {
            req.extensions_mut().insert(peer.clone());
        }
        router.clone().oneshot(req.map(Body::new))
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        tracing::debug!(remote = %remote, error = %e, "Connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn write_pair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_load_tls_config_without_client_auth() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        let config = load_tls_config(&TlsConfig {
            cert,
            key,
            client_cas: None,
            require_client_cert: false,
        })
        .unwrap();
        assert_eq!(config.alpn_protocols.len(), 2);
    }

    #[test]
    fn test_load_tls_config_with_client_cas() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        for require_client_cert in [false, true] {
            load_tls_config(&TlsConfig {
                cert: cert.clone(),
                key: key.clone(),
                client_cas: Some(cert.clone()),
                require_client_cert,
            })
            .unwrap();
        }
    }

    #[test]
    fn test_missing_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = write_pair(dir.path());

        let err = load_tls_config(&TlsConfig {
            cert: cert.clone(),
            key: cert.clone(),
            client_cas: None,
            require_client_cert: false,
        })
        .unwrap_err();
        assert!(matches!(err, ServeError::NoPrivateKey(_)));

        let err = load_tls_config(&TlsConfig {
            cert: dir.path().join("missing.pem"),
            key: cert,
            client_cas: None,
            require_client_cert: false,
        })
        .unwrap_err();
        assert!(matches!(err, ServeError::Read { .. }));
    }

    #[test]
    fn test_empty_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = write_pair(dir.path());
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, b"").unwrap();

        let err = load_tls_config(&TlsConfig {
            cert: empty,
            key,
            client_cas: None,
            require_client_cert: false,
        })
        .unwrap_err();
        assert!(matches!(err, ServeError::NoCertificates(_)));
    }
}
