//! Shared test fixtures: a self-signed root CA and disposable leaf
//! certificate templates, built with the same `x509-cert`/`rsa` stack the
//! crate itself uses for forging, since the workspace carries no
//! certificate-generation-only crate like `rcgen`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use rand::rngs::OsRng;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use rustls::pki_types::PrivateKeyDer;
use sha2::Sha256;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::EncodePem;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{ExtendedKeyUsage, KeyUsage, KeyUsages, SubjectAltName};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

pub struct GeneratedCa {
    pub cert_pem: String,
    pub key_pem: String,
    pub signing_key: SigningKey<Sha256>,
    pub subject: Name,
}

/// Build a fresh, self-signed root CA with a random RSA-2048 key.
pub fn generate_ca(subject: &str) -> GeneratedCa {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
    let public_key = private_key.to_public_key();
    let spki_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .expect("spki pem");
    let spki = SubjectPublicKeyInfoOwned::from_pem(spki_pem.as_bytes()).expect("spki parse");

    let subject = Name::from_str(subject).expect("parse subject");
    let serial_number = SerialNumber::from(rand::random::<u64>());
    let validity = Validity::from_now(StdDuration::from_secs(3600)).expect("validity");
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());

    let builder = CertificateBuilder::new(
        Profile::Root,
        serial_number,
        validity,
        subject.clone(),
        spki,
        signing_key.clone(),
    )
    .expect("ca builder");

    let certificate = builder.build().expect("ca build");

    let cert_pem = certificate
        .to_pem(LineEnding::LF)
        .expect("cert to pem");
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("key to pem")
        .to_string();

    GeneratedCa {
        cert_pem,
        key_pem,
        signing_key,
        subject,
    }
}

/// Write `cert_pem`/`key_pem` to files under `dir`, returning their paths.
pub fn write_ca_files(dir: &std::path::Path, prefix: &str, ca: &GeneratedCa) -> (PathBuf, PathBuf) {
    let cert_path = dir.join(format!("{prefix}.crt"));
    let key_path = dir.join(format!("{prefix}.key"));
    std::fs::write(&cert_path, &ca.cert_pem).expect("write cert");
    std::fs::write(&key_path, &ca.key_pem).expect("write key");
    (cert_path, key_path)
}

/// Build a leaf certificate template with identity fields a forger should
/// clone: subject, key usage, extended key usage, and IP/DNS SANs. Signed by
/// `ca` so it parses as a well-formed certificate, though `forge_certificate`
/// only reads its `tbs_certificate` fields and ignores the signature.
///
/// Returns the certificate alongside the PKCS#8 DER of its own private key,
/// since a real TLS listener presenting this certificate needs the matching
/// key.
pub fn generate_template_leaf(
    ca: &GeneratedCa,
    subject: &str,
    dns_san: &str,
) -> (Certificate, PrivateKeyDer<'static>) {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
    let public_key = private_key.to_public_key();
    let spki_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .expect("spki pem");
    let spki = SubjectPublicKeyInfoOwned::from_pem(spki_pem.as_bytes()).expect("spki parse");

    let subject = Name::from_str(subject).expect("parse subject");
    let serial_number = SerialNumber::from(rand::random::<u64>());
    let validity = Validity::from_now(StdDuration::from_secs(3600)).expect("validity");

    let mut builder = CertificateBuilder::new(
        Profile::Leaf {
            issuer: ca.subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: true,
        },
        serial_number,
        validity,
        subject,
        spki,
        ca.signing_key.clone(),
    )
    .expect("leaf builder");

    builder
        .add_extension(&KeyUsage(KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment))
        .expect("key usage ext");
    builder
        .add_extension(&ExtendedKeyUsage(vec![
            const_oid::db::rfc5280::ID_KP_SERVER_AUTH,
        ]))
        .expect("eku ext");
    builder
        .add_extension(&SubjectAltName(vec![GeneralName::DnsName(
            dns_san.try_into().expect("dns name"),
        )]))
        .expect("san ext");

    let certificate = builder.build().expect("leaf build");
    let pkcs8_der = private_key.to_pkcs8_der().expect("key to pkcs8");
    let key_der = PrivateKeyDer::try_from(pkcs8_der.as_bytes().to_vec()).expect("key der");

    (certificate, key_der)
}
