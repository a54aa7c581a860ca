//! Property tests for the certificate-forging invariants: issuer cloning,
//! chain-of-trust, and key-pair consistency, exercised over randomized
//! template subject/SAN combinations.

mod support;

use mtls_intercept::ca::load_ca_pem;
use mtls_intercept::forge::forge_certificate;
use proptest::prelude::*;
use rsa::pkcs1v15::Signature;
use rsa::signature::{Keypair, Verifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;

fn dns_sans(cert: &x509_cert::Certificate) -> Vec<String> {
    let extensions = cert
        .tbs_certificate
        .extensions
        .as_ref()
        .expect("template and forged leaves both carry extensions");
    let ext = extensions
        .iter()
        .find(|e| e.extn_id == const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME)
        .expect("SAN extension present");
    let san = SubjectAltName::from_der(ext.extn_value.as_bytes()).expect("valid SAN encoding");
    san.0
        .into_iter()
        .filter_map(|name| match name {
            GeneralName::DnsName(s) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

fn arb_subject() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9]{1,12}".prop_map(|name| format!("CN={name},O=engineers"))
}

fn arb_dns_san() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{1,10}".prop_map(|label| format!("{label}.example.internal"))
}

proptest! {
    /// A forged leaf's issuer DN always equals the signing CA's subject DN,
    /// regardless of what subject the template certificate carried.
    #[test]
    fn forged_issuer_matches_ca_subject(subject in arb_subject(), dns in arb_dns_san()) {
        let dir = tempfile::tempdir().unwrap();
        let ca = support::generate_ca("CN=proxy-ca,O=engineers");
        let (cert_path, key_path) = support::write_ca_files(dir.path(), "ca", &ca);
        let credential = load_ca_pem(&cert_path, &key_path).unwrap();

        let (template, _template_key) = support::generate_template_leaf(&ca, &subject, &dns);
        let forged = forge_certificate(&credential, &template).unwrap();

        prop_assert_eq!(
            forged.leaf.tbs_certificate.issuer.to_string(),
            credential.subject().to_string()
        );
    }

    /// The chain handed to a peer always carries the CA certificate
    /// immediately after the leaf.
    #[test]
    fn chain_includes_ca_certificate_after_leaf(subject in arb_subject(), dns in arb_dns_san()) {
        let dir = tempfile::tempdir().unwrap();
        let ca = support::generate_ca("CN=proxy-ca,O=engineers");
        let (cert_path, key_path) = support::write_ca_files(dir.path(), "ca", &ca);
        let credential = load_ca_pem(&cert_path, &key_path).unwrap();

        let (template, _template_key) = support::generate_template_leaf(&ca, &subject, &dns);
        let forged = forge_certificate(&credential, &template).unwrap();

        prop_assert_eq!(forged.chain.len(), 2);
        let second: CertificateDer<'_> = CertificateDer::from(credential.cert_der.clone());
        prop_assert_eq!(forged.chain[1].as_ref(), second.as_ref());
    }

    /// The private key returned alongside a forged certificate is the key
    /// whose public half was embedded in that certificate's SPKI.
    #[test]
    fn private_key_matches_forged_public_key(subject in arb_subject(), dns in arb_dns_san()) {
        let dir = tempfile::tempdir().unwrap();
        let ca = support::generate_ca("CN=proxy-ca,O=engineers");
        let (cert_path, key_path) = support::write_ca_files(dir.path(), "ca", &ca);
        let credential = load_ca_pem(&cert_path, &key_path).unwrap();

        let (template, _template_key) = support::generate_template_leaf(&ca, &subject, &dns);
        let forged = forge_certificate(&credential, &template).unwrap();

        let leaf_der = forged.chain[0].clone();
        let leaf = x509_cert::Certificate::from_der(leaf_der.as_ref()).unwrap();
        let spki_der = leaf
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .unwrap();

        let pkcs8_der = match forged.private_key.clone_key() {
            PrivateKeyDer::Pkcs8(key) => key.secret_pkcs8_der().to_vec(),
            other => panic!("expected a PKCS#8 private key, got {other:?}"),
        };
        let rsa_key: rsa::RsaPrivateKey =
            rsa::pkcs8::DecodePrivateKey::from_pkcs8_der(&pkcs8_der).unwrap();
        let public_key_der = rsa::pkcs8::EncodePublicKey::to_public_key_der(&rsa_key.to_public_key())
            .unwrap();

        prop_assert_eq!(spki_der, public_key_der.as_bytes().to_vec());
    }

    /// A forged leaf's signature verifies against the issuing CA's public
    /// key, i.e. the leaf is a certificate a peer can actually validate
    /// against that CA as trust root, not just a lookalike.
    #[test]
    fn forged_leaf_signature_verifies_against_ca(subject in arb_subject(), dns in arb_dns_san()) {
        let dir = tempfile::tempdir().unwrap();
        let ca = support::generate_ca("CN=proxy-ca,O=engineers");
        let (cert_path, key_path) = support::write_ca_files(dir.path(), "ca", &ca);
        let credential = load_ca_pem(&cert_path, &key_path).unwrap();

        let (template, _template_key) = support::generate_template_leaf(&ca, &subject, &dns);
        let forged = forge_certificate(&credential, &template).unwrap();

        let tbs_der = forged.leaf.tbs_certificate.to_der().unwrap();
        let sig_bytes = forged
            .leaf
            .signature
            .as_bytes()
            .expect("rsa signatures are byte-aligned bit strings");
        let signature = Signature::try_from(sig_bytes).expect("valid pkcs#1v1.5 signature encoding");
        let verifying_key = credential.signing_key.verifying_key();

        prop_assert!(verifying_key.verify(&tbs_der, &signature).is_ok());
    }

    /// A forged leaf's subject and DNS SANs always equal the template's,
    /// regardless of what identity the template carried.
    #[test]
    fn forged_subject_and_sans_match_template(subject in arb_subject(), dns in arb_dns_san()) {
        let dir = tempfile::tempdir().unwrap();
        let ca = support::generate_ca("CN=proxy-ca,O=engineers");
        let (cert_path, key_path) = support::write_ca_files(dir.path(), "ca", &ca);
        let credential = load_ca_pem(&cert_path, &key_path).unwrap();

        let (template, _template_key) = support::generate_template_leaf(&ca, &subject, &dns);
        let forged = forge_certificate(&credential, &template).unwrap();

        prop_assert_eq!(
            forged.leaf.tbs_certificate.subject.to_string(),
            template.tbs_certificate.subject.to_string()
        );
        prop_assert_eq!(dns_sans(&forged.leaf), dns_sans(&template));
    }
}
