//! TLS configuration for the inbound listener: presents the forged server
//! certificate, requests a client certificate but never verifies it against
//! a trust root.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, DistinguishedName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, ServerConfig, SignatureScheme};
use x509_cert::der::Encode;

use crate::ca::CaCredential;
use crate::error::TlsError;
use crate::forge::ForgedCertificate;

/// Requests a client certificate (so token-only clients can still omit one)
/// but accepts whatever is presented without chain validation. The client
/// may present a certificate signed by any CA, or none at all; both paths
/// succeed the handshake (tolerating both mTLS and bearer-token clients).
#[derive(Debug)]
pub struct RequestButDontVerifyClientCert {
    hint_subjects: Vec<DistinguishedName>,
}

impl RequestButDontVerifyClientCert {
    pub fn new(client_ca: &CaCredential) -> Self {
        let subject_der = client_ca
            .leaf
            .tbs_certificate
            .subject
            .to_der()
            .unwrap_or_default();
        Self {
            hint_subjects: vec![DistinguishedName::from(subject_der)],
        }
    }
}

impl ClientCertVerifier for RequestButDontVerifyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.hint_subjects
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
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

/// Build the inbound listener's TLS configuration: forged server identity,
/// minimum TLS 1.2, client cert requested-but-not-verified.
pub fn build_server_config(
    forged_server_cert: &ForgedCertificate,
    client_ca: &CaCredential,
) -> Result<ServerConfig, TlsError> {
    let verifier = Arc::new(RequestButDontVerifyClientCert::new(client_ca));

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            forged_server_cert.chain.clone(),
            forged_server_cert.private_key.clone_key(),
        )
        .map_err(TlsError::Handshake)?;

    Ok(config)
}
