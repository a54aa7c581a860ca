//! Given a CA credential and a template certificate, mints a new leaf with a
//! freshly generated RSA keypair, signed by the CA, cloning identity fields
//! from the template.

use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{ExtendedKeyUsage, KeyUsage, SubjectAltName};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

use crate::ca::CaCredential;
use crate::error::CryptoError;

const RSA_KEY_BITS: usize = 2048;

/// A freshly minted leaf certificate, the RSA private key bound to it, and
/// the chain (leaf followed by the signing CA certificate) ready to hand to
/// the TLS layer.
pub struct ForgedCertificate {
    /// Leaf DER followed by the CA certificate DER.
    pub chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub leaf: Certificate,
}

/// Mint a new leaf certificate cloning `template`'s identity fields, signed
/// by `ca`.
///
/// Fields copied verbatim: serial number, subject, notBefore/notAfter,
/// keyUsage, extKeyUsage, IP and DNS SANs. The issuer is overwritten with
/// the CA's subject; `basicConstraints.cA` is not propagated (the forged
/// leaf is never itself a CA).
pub fn forge_certificate(
    ca: &CaCredential,
    template: &Certificate,
) -> Result<ForgedCertificate, CryptoError> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
    let public_key = private_key.to_public_key();

    let spki_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(CryptoError::Spki)?;
    let spki = SubjectPublicKeyInfoOwned::from_pem(spki_pem.as_bytes())?;

    let tbs = &template.tbs_certificate;
    let serial_number = SerialNumber::new(tbs.serial_number.as_bytes())?;
    let validity = tbs.validity.clone();
    let subject = tbs.subject.clone();

    let mut builder = CertificateBuilder::new(
        Profile::Leaf {
            issuer: ca.subject().clone(),
            enable_key_agreement: false,
            enable_key_encipherment: true,
        },
        serial_number,
        validity,
        subject,
        spki,
        ca.signing_key.clone(),
    )
    .map_err(CryptoError::Signing)?;

    if let Some(key_usage) = cloned_key_usage(template) {
        builder
            .add_extension(&key_usage)
            .map_err(CryptoError::Signing)?;
    }
    if let Some(eku) = cloned_extended_key_usage(template) {
        builder.add_extension(&eku).map_err(CryptoError::Signing)?;
    }
    if let Some(san) = cloned_ip_and_dns_sans(template) {
        builder.add_extension(&san).map_err(CryptoError::Signing)?;
    }

    let certificate = builder.build().map_err(CryptoError::Signing)?;
    let leaf_der = certificate.to_der()?;

    let mut chain = Vec::with_capacity(2);
    chain.push(CertificateDer::from(leaf_der).into_owned());
    chain.push(CertificateDer::from(ca.cert_der.clone()).into_owned());

    let pkcs8_der = private_key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    let private_key_der = PrivateKeyDer::try_from(pkcs8_der.as_bytes().to_vec())
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
        .clone_key();

    Ok(ForgedCertificate {
        chain,
        private_key: private_key_der,
        leaf: certificate,
    })
}

fn cloned_key_usage(template: &Certificate) -> Option<KeyUsage> {
    let extensions = template.tbs_certificate.extensions.as_ref()?;
    let ext = extensions
        .iter()
        .find(|ext| ext.extn_id == const_oid::db::rfc5280::ID_CE_KEY_USAGE)?;
    KeyUsage::from_der(ext.extn_value.as_bytes()).ok()
}

fn cloned_extended_key_usage(template: &Certificate) -> Option<ExtendedKeyUsage> {
    let extensions = template.tbs_certificate.extensions.as_ref()?;
    let ext = extensions
        .iter()
        .find(|ext| ext.extn_id == const_oid::db::rfc5280::ID_CE_EXT_KEY_USAGE)?;
    ExtendedKeyUsage::from_der(ext.extn_value.as_bytes()).ok()
}

fn cloned_ip_and_dns_sans(template: &Certificate) -> Option<SubjectAltName> {
    let extensions = template.tbs_certificate.extensions.as_ref()?;
    let ext = extensions
        .iter()
        .find(|ext| ext.extn_id == const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME)?;
    let san = SubjectAltName::from_der(ext.extn_value.as_bytes()).ok()?;
    let filtered: Vec<GeneralName> = san
        .0
        .into_iter()
        .filter(|name| matches!(name, GeneralName::IpAddress(_) | GeneralName::DnsName(_)))
        .collect();
    if filtered.is_empty() {
        None
    } else {
        Some(SubjectAltName(filtered))
    }
}
