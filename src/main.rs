//! mtls-intercept: a transparent, reverse-proxy-mode interceptor for
//! mutually-authenticated TLS traffic.
//!
//! Terminates TLS from clients while presenting a forged server identity
//! mirroring the real upstream's certificate, then originates a second TLS
//! connection to the upstream, optionally forwarding a forged copy of the
//! client's certificate. Parsed HTTP/1.1 requests and responses are exposed
//! to pluggable observers for inspection and telemetry.
//!
//! ```bash
//! mtls-intercept --upstream svc.example.internal:6443 --plugins k8sapiserver
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use mtls_intercept::cert_fetch::fetch_upstream_certificate;
use mtls_intercept::forge::forge_certificate;
use mtls_intercept::observer::apiserver_stats::ApiServerStatsObserver;
use mtls_intercept::observer::ObserverRegistry;
use mtls_intercept::{load_ca_pem, Config, Proxy};

fn main() -> Result<()> {
    let config = Config::parse();

    init_tracing(config.verbose);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

async fn run(config: Config) -> Result<()> {
    let server_ca = load_ca_pem(&config.server_ca_cert, &config.server_ca_key)
        .context("failed to load server CA PEM")?;
    tracing::debug!(common_name = %server_ca.subject(), "server CA loaded");

    let upstream_cert_der = fetch_upstream_certificate(&config.upstream)
        .await
        .context("could not fetch TLS certificate")?;
    let upstream_template = mtls_intercept::ca::parse_leaf(&upstream_cert_der)
        .context("failed to parse upstream certificate")?;
    tracing::debug!(
        common_name = %upstream_template.tbs_certificate.subject,
        "got upstream server certificate"
    );

    let forged_server_cert = forge_certificate(&server_ca, &upstream_template)
        .context("failed to create the proxy cert")?;
    tracing::debug!("spoofed certificate created");

    let client_ca = load_ca_pem(&config.client_ca_cert, &config.client_ca_key)
        .context("failed to load client CA PEM")?;
    tracing::debug!(common_name = %client_ca.subject(), "client CA loaded");

    let server_tls_config = mtls_intercept::proxy::build_tls_config(&forged_server_cert, &client_ca)
        .context("failed to build TLS listener configuration")?;

    let mut observers = ObserverRegistry::new();
    observers.register(Arc::new(ApiServerStatsObserver::new()));
    observers.enable(&config.plugins);
    observers.setup();

    let proxy = Proxy::new(
        config.port,
        config.upstream.clone(),
        server_tls_config,
        Arc::new(client_ca),
        Arc::new(observers),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_signal = mtls_intercept::proxy::wait_for_shutdown_signal(shutdown_tx);

    tokio::select! {
        result = proxy.run(shutdown_rx) => {
            result.context("proxy listener failed")?;
        }
        _ = shutdown_signal => {}
    }

    Ok(())
}
