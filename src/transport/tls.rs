//! TLS-over-TCP transport.
//!
//! Mirrors the source's `SslChannel`: optional client certificate (mutual
//! TLS) on the connect side, required certificate+key on the listen side,
//! optional CA verification, and hostname checking disabled by default —
//! redteam infra routinely terminates TLS on a bare IP or a cert that was
//! never issued for the name the operator is dialing.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use super::{tcp, ChannelProtocol, StreamTransport};
use crate::error::TransportError;

/// TLS options shared by the `connect` and `listen` CLI surfaces.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub cert: Option<std::path::PathBuf>,
    pub key: Option<std::path::PathBuf>,
    pub password: Option<String>,
    pub ca_cert: Option<std::path::PathBuf>,
}

/// Accepts any certificate unconditionally. Used when no CA is configured,
/// matching the source's `verify_mode = CERT_NONE`.
#[derive(Debug)]
struct AcceptAnyVerifier;

impl ServerCertVerifier for AcceptAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        // Accept whatever scheme shows up; we never reject on signature grounds.
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Verifies the certificate chain against a configured CA, but — unlike the
/// stock `WebPkiServerVerifier` — does not fail a chain that is otherwise
/// valid except for a hostname/SAN mismatch. Matches the source's
/// `check_hostname = False` with `verify_mode = CERT_REQUIRED`.
#[derive(Debug)]
struct CaOnlyVerifier {
    inner: Arc<dyn ServerCertVerifier>,
}

impl ServerCertVerifier for CaOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(err) => {
                // Only swallow the name-mismatch class of failure; anything
                // about expiry, untrusted issuer or a bad signature still fails.
                if err.to_string().to_lowercase().contains("not valid for name") {
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(err)
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let data = std::fs::read(path).map_err(TransportError::Io)?;
    rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TransportError::TlsHandshake(err.to_string()))
}

fn load_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let data = std::fs::read(path).map_err(TransportError::Io)?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|err| TransportError::TlsHandshake(err.to_string()))?
        .ok_or_else(|| TransportError::TlsHandshake("no private key found".to_string()))
}

fn build_verifier(opts: &TlsOptions) -> Result<Arc<dyn ServerCertVerifier>, TransportError> {
    match &opts.ca_cert {
        Some(ca) => {
            let certs = load_certs(ca)?;
            let mut roots = RootCertStore::empty();
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|err| TransportError::TlsHandshake(err.to_string()))?;
            }
            let inner = WebPkiServerVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|err| TransportError::TlsHandshake(err.to_string()))?;
            Ok(Arc::new(CaOnlyVerifier { inner }))
        }
        None => Ok(Arc::new(AcceptAnyVerifier)),
    }
}

fn build_client_config(opts: &TlsOptions) -> Result<ClientConfig, TransportError> {
    let verifier = build_verifier(opts)?;
    let builder = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier);
    let config = match (&opts.cert, &opts.key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|err| TransportError::TlsHandshake(err.to_string()))?
        }
        _ => builder.with_no_client_auth(),
    };
    Ok(config)
}

fn build_server_config(opts: &TlsOptions) -> Result<ServerConfig, TransportError> {
    let cert_path = opts
        .cert
        .as_ref()
        .ok_or_else(|| TransportError::TlsHandshake("listener requires --cert".to_string()))?;
    let key_path = opts
        .key
        .as_ref()
        .ok_or_else(|| TransportError::TlsHandshake("listener requires --key".to_string()))?;
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| TransportError::TlsHandshake(err.to_string()))
}

pub async fn connect(host: &str, port: u16, opts: &TlsOptions) -> Result<StreamTransport, TransportError> {
    let candidates = tcp::resolve(host, port).await?;
    let config = Arc::new(build_client_config(opts)?);
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::TlsHandshake(format!("invalid server name {host}")))?;
    let mut last_err = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(tcp_stream) => {
                let _ = tcp_stream.set_nodelay(true);
                match connector.connect(server_name.clone(), tcp_stream).await {
                    Ok(tls_stream) => {
                        return Ok(StreamTransport::new(
                            Box::new(tls_stream),
                            addr.to_string(),
                            ChannelProtocol::Tls,
                        ))
                    }
                    Err(err) => {
                        last_err = Some(TransportError::TlsHandshake(err.to_string()));
                    }
                }
            }
            Err(err) => last_err = Some(TransportError::from(err)),
        }
    }
    Err(last_err.unwrap_or(TransportError::Resolve {
        host: host.to_string(),
        port,
    }))
}

/// Wrap an already-accepted socket on the listener side. A handshake
/// failure here must not kill the listener — the caller logs and continues.
pub async fn from_accepted(
    stream: TcpStream,
    remote: std::net::SocketAddr,
    opts: &TlsOptions,
) -> Result<StreamTransport, TransportError> {
    let _ = stream.set_nodelay(true);
    let config = Arc::new(build_server_config(opts)?);
    let acceptor = TlsAcceptor::from(config);
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|err| TransportError::TlsHandshake(err.to_string()))?;
    Ok(StreamTransport::new(
        Box::new(tls_stream),
        remote.to_string(),
        ChannelProtocol::Tls,
    ))
}
