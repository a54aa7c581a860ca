//! Accepts inbound TCP, completes TLS as the forged server, and hands each
//! established connection off to the dual-stream bridge.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{rustls::ServerConfig, TlsAcceptor};
use tracing::{debug, info, warn};

use crate::bridge;
use crate::ca::SharedCa;
use crate::observer::ObserverRegistry;

/// Runtime state shared by every accepted connection's handler task.
pub struct ListenerContext {
    pub server_tls_config: Arc<ServerConfig>,
    pub client_ca: SharedCa,
    pub upstream: String,
    pub observers: Arc<ObserverRegistry>,
}

/// Bind `port` and run the accept loop until `shutdown` resolves. Each
/// accepted connection is handed off to its own task so a slow or hostile
/// peer cannot stall the accept loop.
pub async fn run(
    port: u16,
    ctx: Arc<ListenerContext>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    info!(listen_port = port, "server started");

    let acceptor = TlsAcceptor::from(ctx.server_tls_config.clone());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("listener shutting down");
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let acceptor = acceptor.clone();
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, acceptor, ctx).await;
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "error accepting connection");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    ctx: Arc<ListenerContext>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(err) => {
            warn!(from = %peer_addr, error = %err, "tls handshake with the client failed");
            return;
        }
    };

    let peer_certs: Vec<CertificateDer<'static>> = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.to_vec())
        .unwrap_or_default();

    debug!(from = %peer_addr, has_client_cert = !peer_certs.is_empty(), "tls handshake complete");

    bridge::bridge_connection(tls_stream, peer_addr, peer_certs, ctx).await;
}
