//! Lifecycle controller: starts the listener in a dedicated task and blocks
//! on a termination signal. On signal receipt, flips the running flag and
//! closes the listener; in-flight connections drain naturally as their
//! streams close.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::ca::SharedCa;
use crate::listener::{self, ListenerContext};
use crate::observer::ObserverRegistry;
use crate::tls;

/// One proxy instance: listen port, upstream endpoint, the forged server
/// certificate to present, and the CA credential used to sign forged
/// client certificates.
pub struct Proxy {
    port: u16,
    ctx: Arc<ListenerContext>,
}

impl Proxy {
    pub fn new(
        port: u16,
        upstream: String,
        server_tls_config: rustls::ServerConfig,
        client_ca: SharedCa,
        observers: Arc<ObserverRegistry>,
    ) -> Self {
        Self {
            port,
            ctx: Arc::new(ListenerContext {
                server_tls_config: Arc::new(server_tls_config),
                client_ca,
                upstream,
                observers,
            }),
        }
    }

    /// Runs the accept loop until `shutdown` resolves to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        listener::run(self.port, self.ctx, shutdown).await
    }
}

/// Build the inbound listener's TLS config from a freshly forged server
/// identity and the client CA used to validate-but-not-reject client certs.
pub fn build_tls_config(
    forged_server_cert: &crate::forge::ForgedCertificate,
    client_ca: &crate::ca::CaCredential,
) -> Result<rustls::ServerConfig, crate::error::TlsError> {
    tls::build_server_config(forged_server_cert, client_ca)
}

/// Blocks until SIGINT or SIGTERM is received, then signals shutdown.
pub async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(signal = "SIGINT", "received signal");
        }
        _ = sigterm.recv() => {
            info!(signal = "SIGTERM", "received signal");
        }
    }

    let _ = shutdown_tx.send(true);
}
