//! Command-line surface. A single-command `clap::Parser`: this crate has
//! exactly one job, run the interception proxy.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "mtls-intercept")]
#[command(about = "reverse proxy to decrypt mTLS protected traffic", long_about = None)]
pub struct Config {
    /// Listen port
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Upstream server:port
    #[arg(short, long)]
    pub upstream: String,

    /// Server CA certificate
    #[arg(long, default_value = "./certs/server-ca.crt")]
    pub server_ca_cert: PathBuf,

    /// Server CA key
    #[arg(long, default_value = "./certs/server-ca.key")]
    pub server_ca_key: PathBuf,

    /// Client CA certificate
    #[arg(long, default_value = "./certs/client-ca.crt")]
    pub client_ca_cert: PathBuf,

    /// Client CA key
    #[arg(long, default_value = "./certs/client-ca.key")]
    pub client_ca_key: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable plugins (observer names)
    #[arg(long = "plugins")]
    pub plugins: Vec<String>,
}
