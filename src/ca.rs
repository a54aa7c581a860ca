//! Parses a PEM-encoded CA certificate and private key pair into an
//! in-memory signing credential, shared read-only by all connection
//! handlers until shutdown.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use rustls_pemfile::Item;
use sha2::Sha256;
use x509_cert::der::{Decode, Encode};
use x509_cert::name::Name;
use x509_cert::Certificate;

use crate::error::ConfigError;

/// An immutable CA signing credential: the parsed leaf certificate, its DER
/// bytes (appended to every forged chain so peers can validate the forged
/// leaf against it), and a PKCS#1v1.5/SHA-256 signing key usable to mint new
/// leaves.
pub struct CaCredential {
    pub leaf: Certificate,
    pub cert_der: Vec<u8>,
    pub signing_key: SigningKey<Sha256>,
}

impl CaCredential {
    /// The CA's subject DN, overwritten onto every leaf it forges as the
    /// issuer.
    pub fn subject(&self) -> &Name {
        &self.leaf.tbs_certificate.subject
    }
}

/// Load a CA credential from PEM-encoded certificate and key files.
///
/// Fails with [`ConfigError`] on malformed PEM, an absent or undecodable
/// key, a cert/key mismatch in count, a private key whose public component
/// does not match the certificate's `SubjectPublicKeyInfo`, or a certificate
/// whose `basicConstraints.cA` is not `true`.
pub fn load_ca_pem(cert_path: &Path, key_path: &Path) -> Result<CaCredential, ConfigError> {
    let cert_bytes = std::fs::read(cert_path).map_err(|source| ConfigError::Io {
        path: cert_path.display().to_string(),
        source,
    })?;
    let key_bytes = std::fs::read(key_path).map_err(|source| ConfigError::Io {
        path: key_path.display().to_string(),
        source,
    })?;

    let mut cert_reader = BufReader::new(&cert_bytes[..]);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .filter_map(|item| item.ok())
        .collect();
    let path_str = cert_path.display().to_string();
    if certs.is_empty() {
        return Err(ConfigError::NoCertificate(path_str));
    }
    if certs.len() > 1 {
        return Err(ConfigError::MultipleCertificates(path_str));
    }
    let cert_der = certs.into_iter().next().unwrap().to_vec();
    let leaf = Certificate::from_der(&cert_der)?;

    if !is_certificate_authority(&leaf) {
        return Err(ConfigError::NotACertificateAuthority);
    }

    let mut key_reader = BufReader::new(&key_bytes[..]);
    let key_path_str = key_path.display().to_string();
    let mut der_keys: Vec<Vec<u8>> = rustls_pemfile::read_all(&mut key_reader)
        .filter_map(|item| match item.ok()? {
            Item::Pkcs1Key(key) => Some(key.secret_pkcs1_der().to_vec()),
            Item::Pkcs8Key(key) => Some(key.secret_pkcs8_der().to_vec()),
            _ => None,
        })
        .collect();
    if der_keys.is_empty() {
        return Err(ConfigError::NoPrivateKey(key_path_str));
    }
    if der_keys.len() > 1 {
        return Err(ConfigError::MultiplePrivateKeys(key_path_str));
    }
    let der_key = der_keys.pop().unwrap();

    let private_key = RsaPrivateKey::from_pkcs1_der(&der_key)
        .map_err(|e| e.to_string())
        .or_else(|_| RsaPrivateKey::from_pkcs8_der(&der_key).map_err(|e| e.to_string()))
        .map_err(|reason| ConfigError::MalformedKey {
            path: key_path_str.clone(),
            reason,
        })?;
    let public_key_der = private_key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| ConfigError::MalformedKey {
            path: key_path_str.clone(),
            reason: e.to_string(),
        })?;
    let cert_spki_der = leaf.tbs_certificate.subject_public_key_info.to_der()?;
    if public_key_der.as_bytes() != cert_spki_der.as_slice() {
        return Err(ConfigError::KeyCertificateMismatch { path: key_path_str });
    }

    let signing_key = SigningKey::<Sha256>::new(private_key);

    Ok(CaCredential {
        leaf,
        cert_der,
        signing_key,
    })
}

fn is_certificate_authority(cert: &Certificate) -> bool {
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return false;
    };
    for ext in extensions.iter() {
        if ext.extn_id == const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS {
            if let Ok(bc) = x509_cert::ext::pkix::BasicConstraints::from_der(ext.extn_value.as_bytes()) {
                return bc.ca;
            }
        }
    }
    false
}

/// Parse a DER-encoded certificate, used to turn a peer's presented
/// certificate (client handshake, or the fetched upstream leaf) into the
/// template passed to the certificate forger.
pub fn parse_leaf(der: &rustls::pki_types::CertificateDer<'_>) -> Result<Certificate, ConfigError> {
    Ok(Certificate::from_der(der.as_ref())?)
}

/// Shared, reference-counted handle to a loaded CA credential.
pub type SharedCa = Arc<CaCredential>;
