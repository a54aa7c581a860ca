//! Opens an unauthenticated TLS connection to the upstream and returns the
//! leaf certificate it presents. Called once at startup per proxy instance.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::error::NetworkError;

/// Accepts any certificate the upstream presents. Deliberate and not a bug:
/// the tool's purpose is interception, and real upstream verification would
/// reject the very CA-swap this proxy exists to perform.
#[derive(Debug)]
pub struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
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
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Build a `ClientConfig` with certificate verification disabled, shared by
/// the startup certificate fetch and the per-connection upstream dial.
pub fn insecure_client_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth()
}

/// Dial `upstream` (`host:port`), complete a TLS handshake with verification
/// disabled, and return the leaf certificate the peer presented.
pub async fn fetch_upstream_certificate(
    upstream: &str,
) -> Result<CertificateDer<'static>, NetworkError> {
    let (host, _) = split_host_port(upstream);
    let connector = TlsConnector::from(Arc::new(insecure_client_config()));

    let tcp = tokio::net::TcpStream::connect(upstream)
        .await
        .map_err(|source| NetworkError::Dial {
            upstream: upstream.to_string(),
            source,
        })?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| NetworkError::Dial {
            upstream: upstream.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid hostname"),
        })?;

    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|source| NetworkError::Dial {
            upstream: upstream.to_string(),
            source,
        })?;

    let (_, session) = tls.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or(NetworkError::EmptyChain)?;
    let leaf = chain.first().ok_or(NetworkError::EmptyChain)?;
    Ok(leaf.clone().into_owned())
}

fn split_host_port(addr: &str) -> (&str, &str) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (addr, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_port() {
        assert_eq!(split_host_port("example.com:443"), ("example.com", "443"));
    }

    #[tokio::test]
    async fn dial_failure_yields_network_error() {
        // Port 0 never accepts connections; this exercises the error path
        // without depending on network access.
        let err = fetch_upstream_certificate("127.0.0.1:0").await.unwrap_err();
        assert!(matches!(err, NetworkError::Dial { .. }));
    }
}
