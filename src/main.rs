//! jwtproxy - JWT-verifying reverse proxy

use clap::Parser;
use jwtproxy::config::{Cli, Config};
use jwtproxy::metrics::server::MetricsServer;
use jwtproxy::server::Server;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Configuration errors are fatal before anything binds.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let level = match config.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        version = jwtproxy::VERSION,
        remote = %config.upstream.remote_url,
        issuers = ?config.pipeline.keys.issuers(),
        auth_header = %config.pipeline.auth_header,
        "Starting jwtproxy"
    );

    let mut metrics = None;
    if let Some(port) = config.server.metrics_port {
        let mut server = MetricsServer::new(SocketAddr::from(([0, 0, 0, 0], port)));
        server.start().await?;
        metrics = Some(server);
    }

    let server = Server::from_config(&config).await?;
    server.run().await?;

    if let Some(mut metrics) = metrics {
        metrics.shutdown().await;
    }
    Ok(())
}
