use crate::types::{DispatcherConfig, ProtocolError};
use crate::utils::timeout_result;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::ring::default_provider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use url::Url;

const ALPN_H2: &[u8] = b"h2";

/// Accepts any server certificate. Only installed when
/// `DispatcherConfig::accept_invalid_certs` is set.
#[derive(Debug)]
pub struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Where a dispatcher connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Target {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }
}

pub fn parse_target(target: &str) -> Result<Target, ProtocolError> {
    let url = Url::parse(target)
        .map_err(|e| ProtocolError::InvalidTarget(format!("{} ({})", target, e)))?;

    let (tls, default_port) = match url.scheme() {
        "https" | "h2" => (true, 443),
        "http" | "h2c" => (false, 80),
        other => {
            return Err(ProtocolError::InvalidTarget(format!(
                "Unsupported scheme '{}' in '{}'",
                other, target
            )))
        }
    };

    let host = url
        .host_str()
        .ok_or_else(|| ProtocolError::InvalidTarget(format!("Target '{}' is missing a host", target)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    Ok(Target {
        host,
        port: url.port().unwrap_or(default_port),
        tls,
    })
}

pub enum TransportStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

fn server_name_from_str(name: &str) -> Result<ServerName<'static>, ProtocolError> {
    ServerName::try_from(name.to_string())
        .map_err(|_| ProtocolError::InvalidTarget(format!("Invalid server name: {}", name)))
}

fn build_tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let builder = ClientConfig::builder();
    let mut config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    TlsConnector::from(Arc::new(config))
}

async fn connect_tcp(target: &Target, config: &DispatcherConfig) -> Result<TcpStream, ProtocolError> {
    timeout_result(config.timeouts.connect, async {
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| {
                ProtocolError::ConnectionFailed(format!("{}: {}", target.authority(), e))
            })?;
        stream.set_nodelay(true)?;
        Ok::<TcpStream, ProtocolError>(stream)
    })
    .await
}

pub async fn create_tcp_stream(
    target: &Target,
    config: &DispatcherConfig,
) -> Result<TransportStream, ProtocolError> {
    let stream = connect_tcp(target, config).await?;
    Ok(TransportStream::Tcp(stream))
}

/// TLS connection that must negotiate `h2` through ALPN.
pub async fn create_tls_stream(
    target: &Target,
    config: &DispatcherConfig,
) -> Result<TransportStream, ProtocolError> {
    // rustls >= 0.23 needs a process-wide crypto provider
    let _ = default_provider().install_default();
    let tcp_stream = connect_tcp(target, config).await?;

    let connector = build_tls_connector(config.accept_invalid_certs);
    let server_name = server_name_from_str(&target.host)?;

    let tls_stream = timeout_result(config.timeouts.connect, async {
        connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| ProtocolError::ConnectionFailed(format!("TLS handshake failed: {}", e)))
    })
    .await?;

    let (_, session) = tls_stream.get_ref();
    if session.alpn_protocol() != Some(ALPN_H2) {
        return Err(ProtocolError::ConnectionFailed(format!(
            "{} did not negotiate h2 via ALPN",
            target.authority()
        )));
    }

    Ok(TransportStream::Tls(Box::new(tls_stream)))
}

pub async fn connect(
    target: &Target,
    config: &DispatcherConfig,
) -> Result<TransportStream, ProtocolError> {
    if target.tls {
        create_tls_stream(target, config).await
    } else {
        create_tcp_stream(target, config).await
    }
}
