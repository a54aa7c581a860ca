//! mtls-intercept library components: the certificate-forging subsystem,
//! the dual-TLS proxy pipeline, and the observer dispatch layer, exposed
//! for use by the binary entry point and by integration tests.

pub mod bridge;
pub mod ca;
pub mod cert_fetch;
pub mod config;
pub mod error;
pub mod forge;
pub mod http;
pub mod listener;
pub mod observer;
pub mod proxy;
pub mod tls;

pub use ca::{load_ca_pem, CaCredential};
pub use config::Config;
pub use error::ProxyError;
pub use forge::{forge_certificate, ForgedCertificate};
pub use proxy::Proxy;
