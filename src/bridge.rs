//! Dials the upstream and bridges the two TLS sessions: bytes flow directly
//! between client and upstream while being simultaneously teed into an
//! in-memory pipe consumed by the HTTP parser loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::warn;

use crate::cert_fetch::insecure_client_config;
use crate::forge::forge_certificate;
use crate::http::parser::run_parser_loop;
use crate::listener::ListenerContext;

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TEE_CHANNEL_CAPACITY: usize = 64;
const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Bridges one accepted, TLS-terminated client connection to the upstream.
pub async fn bridge_connection(
    client_tls: ServerTlsStream<TcpStream>,
    client_addr: SocketAddr,
    client_peer_certs: Vec<CertificateDer<'static>>,
    ctx: Arc<ListenerContext>,
) {
    let template_client_cert = client_peer_certs.first().cloned();

    let forged_client_identity = match &template_client_cert {
        Some(template_der) => match crate::ca::parse_leaf(template_der) {
            Ok(template_leaf) => match forge_certificate(&ctx.client_ca, &template_leaf) {
                Ok(forged) => Some(forged),
                Err(err) => {
                    warn!(from = %client_addr, error = %err, "failed to sign certificate for the client");
                    return;
                }
            },
            Err(err) => {
                warn!(from = %client_addr, error = %err, "failed to parse client certificate");
                return;
            }
        },
        None => None,
    };

    let upstream_tls = match dial_upstream(&ctx.upstream, forged_client_identity.as_ref()).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(from = %client_addr, upstream = %ctx.upstream, error = %err, "failed to dial upstream");
            return;
        }
    };

    let (client_read, client_write) = tokio::io::split(client_tls);
    let (upstream_read, upstream_write) = tokio::io::split(upstream_tls);

    let (req_tx, req_rx) = mpsc::channel::<std::io::Result<Bytes>>(TEE_CHANNEL_CAPACITY);
    let (resp_tx, resp_rx) = mpsc::channel::<std::io::Result<Bytes>>(TEE_CHANNEL_CAPACITY);

    let req_reader = StreamReader::new(ReceiverStream::new(req_rx));
    let resp_reader = StreamReader::new(ReceiverStream::new(resp_rx));

    let client_cert_for_events = template_client_cert
        .as_ref()
        .and_then(|der| crate::ca::parse_leaf(der).ok());

    let parser_handle = tokio::spawn(run_parser_loop(
        req_reader,
        resp_reader,
        client_addr,
        client_cert_for_events,
        ctx.observers.clone(),
    ));

    let client_to_upstream = tee_copy(client_read, upstream_write, req_tx, "client->upstream");
    let upstream_to_client = tee_copy(upstream_read, client_write, resp_tx, "upstream->client");

    let (up_result, down_result) = tokio::join!(client_to_upstream, upstream_to_client);

    if let Err(err) = up_result {
        if !is_closed_connection(&err) {
            warn!(from = %client_addr, error = %err, "error copying client->upstream");
        }
    }
    if let Err(err) = down_result {
        if !is_closed_connection(&err) {
            warn!(from = %client_addr, error = %err, "error copying upstream->client");
        }
    }

    let _ = parser_handle.await;
}

async fn dial_upstream(
    upstream: &str,
    client_identity: Option<&crate::forge::ForgedCertificate>,
) -> Result<ClientTlsStream<TcpStream>, crate::error::NetworkError> {
    let (host, _) = upstream.rsplit_once(':').unwrap_or((upstream, ""));

    let connect = async {
        let tcp = TcpStream::connect(upstream)
            .await
            .map_err(|source| crate::error::NetworkError::Dial {
                upstream: upstream.to_string(),
                source,
            })?;

        let client_config = match client_identity {
            Some(identity) => rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(
                    crate::cert_fetch::AcceptAnyServerCert,
                ))
                .with_client_auth_cert(identity.chain.clone(), identity.private_key.clone_key())
                .map_err(|source| {
                    crate::error::NetworkError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        source.to_string(),
                    ))
                })?,
            None => insecure_client_config(),
        };

        let connector = TlsConnector::from(Arc::new(client_config));
        let server_name = ServerName::try_from(host.to_string()).map_err(|_| {
            crate::error::NetworkError::Dial {
                upstream: upstream.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid hostname"),
            }
        })?;

        connector
            .connect(server_name, tcp)
            .await
            .map_err(|source| crate::error::NetworkError::Dial {
                upstream: upstream.to_string(),
                source,
            })
    };

    tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| crate::error::NetworkError::DialTimeout(UPSTREAM_CONNECT_TIMEOUT))?
}

/// Copy bytes from `reader` to `writer`, simultaneously sending each chunk
/// read to `tee`. On EOF or error, `tee` is dropped so the parser loop
/// observes a closed pipe and terminates cleanly.
async fn tee_copy<R, W>(
    mut reader: R,
    mut writer: W,
    tee: mpsc::Sender<std::io::Result<Bytes>>,
    direction: &str,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                let _ = tee.send(Err(clone_io_error(&err))).await;
                return Err(err);
            }
        };
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        if let Err(err) = writer.write_all(&chunk).await {
            let _ = tee.send(Err(clone_io_error(&err))).await;
            return Err(err);
        }
        total += n as u64;
        if tee.send(Ok(chunk)).await.is_err() {
            tracing::debug!(direction, "tee receiver dropped, continuing opaque copy");
        }
    }
    let _ = writer.shutdown().await;
    drop(tee);
    Ok(total)
}

fn clone_io_error(err: &std::io::Error) -> std::io::Error {
    std::io::Error::new(err.kind(), err.to_string())
}

/// `true` for I/O errors that just mean "the peer went away" — the
/// equivalent of a clean EOF rather than an actual fault worth warning
/// about.
fn is_closed_connection(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}
