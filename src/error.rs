//! Typed error taxonomy for the interception engine.
//!
//! Startup code (`main.rs`) wraps the category-specific errors below with
//! `anyhow::Context` for human-readable chains and exits with status 1.
//! Per-connection code returns the relevant category directly (`TlsError`,
//! `NetworkError`, `CryptoError`) and the caller logs-and-drops; these never
//! propagate to the listener's accept loop. `ProxyError` unifies all five
//! categories behind one type for library consumers who want a single error
//! to match on rather than threading each category through their own code.

use thiserror::Error;

/// Top-level error taxonomy, one variant per category in the design.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("tls error: {0}")]
    Tls(#[from] TlsError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Bad CA files, missing required flags, unparseable PEM. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM certificate found in {0}")]
    NoCertificate(String),

    #[error("multiple PEM certificates found in {0}, expected exactly one")]
    MultipleCertificates(String),

    #[error("no PEM private key found in {0}")]
    NoPrivateKey(String),

    #[error("multiple PEM private keys found in {0}, expected exactly one")]
    MultiplePrivateKeys(String),

    #[error("malformed private key in {path}: {reason}")]
    MalformedKey { path: String, reason: String },

    #[error("malformed certificate: {0}")]
    MalformedCertificate(#[from] x509_cert::der::Error),

    #[error("certificate is not a certificate authority (basicConstraints.cA is not true)")]
    NotACertificateAuthority,

    #[error("private key does not match public key in {path}")]
    KeyCertificateMismatch { path: String },
}

/// Dial, bind, or I/O failure. Per-connection fatal; process continues.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to connect to upstream {upstream}: {source}")]
    Dial {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream connect timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    #[error("upstream presented no certificates")]
    EmptyChain,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handshake failure with either peer. Per-connection fatal.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("tls handshake failed: {0}")]
    Handshake(#[from] rustls::Error),

    #[error("invalid private key material: {0}")]
    InvalidKey(String),

    #[error("tls configuration error: {0}")]
    Configuration(String),
}

/// Keygen or signing failure. Per-connection fatal; logged.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("rsa key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    #[error("certificate signing failed: {0}")]
    Signing(#[source] x509_cert::builder::Error),

    #[error("certificate encoding failed: {0}")]
    Encoding(#[from] x509_cert::der::Error),

    #[error("spki conversion failed: {0}")]
    Spki(#[from] x509_cert::spki::Error),

    #[error("private key encoding failed: {0}")]
    KeyEncoding(String),
}

/// HTTP framing violation. Terminates the parser loop for that connection;
/// the bridge continues opaque byte-copying until the peers close.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed HTTP/1.1 message: {0}")]
    Httparse(#[from] httparse::Error),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("invalid chunked encoding framing: {0}")]
    InvalidChunkFraming(String),

    #[error("tee pipe closed")]
    PipeClosed,
}
