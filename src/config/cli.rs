//! Command line flags

use clap::Parser;
use std::path::PathBuf;

/// jwtproxy - JWT-verifying reverse proxy
///
/// Every flag has a matching `JWTPROXY_*` environment variable, which wins
/// when both are set.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "jwtproxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The remote backend to proxy to
    #[arg(long)]
    pub remote_url: Option<String>,

    /// Value of the Host header on outbound requests
    #[arg(long)]
    pub remote_host_header: Option<String>,

    /// JSON file mapping issuers to PEM-encoded RSA public keys
    #[arg(long)]
    pub keys: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Path of the health check endpoint
    #[arg(long)]
    pub health: Option<String>,

    /// Prefix to strip from incoming paths, e.g. /api maps /api/user?id=1 to /user?id=1
    #[arg(long)]
    pub prefix: Option<String>,

    /// Header carrying the bearer token
    #[arg(long)]
    pub auth_header: Option<String>,

    /// Prefix required of a non-default auth header (empty disables the check)
    #[arg(long)]
    pub custom_header_prefix: Option<String>,

    /// Verify backend TLS certificates
    #[arg(long)]
    pub strict_tls: Option<bool>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,
}
